//! Main CLI entry point: wires argv parsing (`netchunk::cli`) to the
//! upload/download/verify/repair engine and maps errors to exit codes
//! (spec.md §6).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use netchunk::chunk::now_unix;
use netchunk::cli::{Cli, Command};
use netchunk::config::Config;
use netchunk::orchestrator::Orchestrator;
use netchunk::placement::PlacementServer;
use netchunk::server::ServerHealth;
use netchunk::transport::FtpTransport;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("netchunk: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Command::Version) {
        println!("netchunk {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_path = expand_tilde(&cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    if !cli.quiet {
        let _logger = netchunk::logging::init(&config.general)
            .context("initializing logger")?;
    }
    if cli.verbose {
        info!("verbose logging enabled");
    }

    let transport = Arc::new(
        FtpTransport::new(
            config.general.max_concurrent_operations as usize,
            config.general.ftp_timeout_secs,
        )
        .with_ssl_verification(config.security.verify_ssl_certificates),
    );
    let servers: Vec<PlacementServer> = config
        .servers
        .iter()
        .map(|descriptor| PlacementServer {
            descriptor: descriptor.clone(),
            health: Arc::new(ServerHealth::new()),
        })
        .collect();

    let orchestrator = Orchestrator {
        transport: transport.clone(),
        servers,
        replication_factor: config.general.replication_factor,
        min_replicas_required: 1,
        backups_enabled: config.backups_enabled,
        max_backups: config.max_backups,
        local_storage_path: config.general.local_storage_path.clone(),
    };

    match cli.command {
        Command::Upload { local, remote } => {
            let (manifest, stats) = orchestrator
                .upload(&local, &remote, config.general.chunk_size)
                .with_context(|| format!("uploading {}", local.display()))?;
            if cli.stats {
                println!(
                    "uploaded {} bytes in {} chunks across {} servers ({} retries)",
                    stats.bytes_uploaded, stats.chunk_count, stats.servers_touched, stats.retries_incurred
                );
            }
            info!("uploaded {} as manifest {}", remote, manifest.manifest_id);
        }
        Command::Download { remote, local } => {
            let stats = orchestrator
                .download(&remote, &local)
                .with_context(|| format!("downloading {remote}"))?;
            if cli.stats {
                println!(
                    "downloaded {} bytes in {} chunks ({} retries)",
                    stats.bytes_downloaded, stats.chunk_count, stats.retries_incurred
                );
            }
        }
        Command::List => {
            let mut seen = std::collections::BTreeSet::new();
            for server in &orchestrator.servers {
                if let Ok(entries) = transport.list(&server.descriptor, "manifests/") {
                    for entry in entries {
                        if let Some(name) = entry.strip_suffix(".manifest") {
                            seen.insert(name.to_string());
                        }
                    }
                }
            }
            for name in seen {
                println!("{name}");
            }
        }
        Command::Delete { remote } => {
            orchestrator
                .delete(&remote)
                .with_context(|| format!("deleting {remote}"))?;
        }
        Command::Verify { remote, repair } => {
            let manifest = orchestrator.fetch_manifest(&remote)?;
            let report = netchunk::repair::verify(&orchestrator, &manifest);
            println!(
                "{remote} (uploaded {}): chunks_verified={} healthy={} degraded={} critical={} lost={}",
                manifest.created_at_human(),
                report.chunks_verified,
                report.healthy,
                report.degraded,
                report.critical,
                report.lost
            );
            if repair && !config.repair.auto_repair_enabled {
                info!("--repair requested but [repair] auto_repair_enabled = false; skipping");
            } else if repair {
                let mut repaired = manifest;
                for attempt in 1..=config.repair.max_repair_attempts.max(1) {
                    repaired = netchunk::repair::repair(&orchestrator, repaired, false)?;
                    let report = netchunk::repair::verify(&orchestrator, &repaired);
                    if report.degraded == 0 && report.critical == 0 {
                        break;
                    }
                    info!(
                        "repair attempt {attempt}/{} left {} degraded, {} critical chunks for {remote}",
                        config.repair.max_repair_attempts, report.degraded, report.critical
                    );
                    if attempt < config.repair.max_repair_attempts {
                        std::thread::sleep(std::time::Duration::from_secs(config.repair.repair_delay_secs));
                    }
                }
                let repaired = if config.repair.rebalancing_enabled {
                    netchunk::repair::rebalance(&orchestrator, repaired)?
                } else {
                    repaired
                };
                orchestrator.persist_manifest_everywhere(&repaired, &remote)?;
            }
        }
        Command::Health => {
            let mut all_healthy = true;
            for server in &orchestrator.servers {
                match transport.ping(&server.descriptor) {
                    Ok(latency) => {
                        server.health.record_success(latency.as_millis() as u64, now_unix());
                        println!(
                            "{}: healthy ({} ms)",
                            server.descriptor.server_id,
                            latency.as_millis()
                        );
                    }
                    Err(e) => {
                        server.health.record_failure(now_unix());
                        all_healthy = false;
                        error!("{}: unreachable: {e}", server.descriptor.server_id);
                        println!("{}: unreachable", server.descriptor.server_id);
                    }
                }
            }
            if !all_healthy {
                anyhow::bail!("not all configured servers are healthy");
            }
        }
        Command::Version => unreachable!("handled before configuration load"),
    }
    Ok(())
}

fn expand_tilde(path: &PathBuf) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.clone()
}
