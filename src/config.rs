//! Configuration loader (C9, spec.md §6). INI file, read once at process
//! start and immutable afterward; see SPEC_FULL.md §4.7.

use std::path::{Path, PathBuf};

use ini::Ini;

use crate::error::{NetChunkError, Result};
use crate::server::ServerDescriptor;

const MIN_CHUNK_SIZE: u64 = 1024 * 1024; // 1 MiB
const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024; // 64 MiB
const MAX_SERVERS: u32 = 32;

#[derive(Debug, Clone)]
pub struct GeneralConfig {
    pub chunk_size: u64,
    pub replication_factor: u32,
    pub max_concurrent_operations: u32,
    pub ftp_timeout_secs: u64,
    pub log_level: String,
    pub log_file: PathBuf,
    pub local_storage_path: PathBuf,
    pub health_monitoring_enabled: bool,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RepairConfig {
    pub auto_repair_enabled: bool,
    pub max_repair_attempts: u32,
    pub repair_delay_secs: u64,
    pub rebalancing_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub verify_ssl_certificates: bool,
    pub always_verify_integrity: bool,
    pub encrypt_chunks: bool,
}

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub health_monitoring_enabled: bool,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralConfig,
    pub servers: Vec<ServerDescriptor>,
    pub repair: RepairConfig,
    pub security: SecurityConfig,
    pub monitoring: MonitoringConfig,
    pub backups_enabled: bool,
    pub max_backups: usize,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| NetChunkError::ConfigParse(format!("{}: {e}", path.display())))?;
        Self::from_ini(&ini)
    }

    pub fn load_str(data: &str) -> Result<Self> {
        let ini = Ini::load_from_str(data)
            .map_err(|e| NetChunkError::ConfigParse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let general = parse_general(ini)?;
        let servers = parse_servers(ini)?;
        let repair = parse_repair(ini);
        let security = parse_security(ini);
        let monitoring = parse_monitoring(ini, &general);

        let config = Config {
            general,
            servers,
            repair,
            security,
            monitoring,
            backups_enabled: true,
            max_backups: 5,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation that cannot be expressed per-key (spec.md
    /// §8 S6: `R=3` with only 2 servers fails startup with
    /// `InsufficientServers`).
    pub fn validate(&self) -> Result<()> {
        if self.servers.len() < self.general.replication_factor as usize {
            return Err(NetChunkError::InsufficientServers {
                needed: self.general.replication_factor as usize,
                found: self.servers.len(),
            });
        }
        let mut ids = std::collections::HashSet::new();
        for s in &self.servers {
            if !ids.insert(&s.server_id) {
                return Err(NetChunkError::ConfigValidation {
                    section: s.server_id.clone(),
                    key: "server_id".into(),
                    reason: "duplicate server_id".into(),
                });
            }
        }
        Ok(())
    }
}

fn get<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.section(Some(section)).and_then(|s| s.get(key))
}

fn parse_size_with_suffix(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (digits, mult) = if let Some(stripped) = raw.strip_suffix(['K', 'k']) {
        (stripped, 1024u64)
    } else if let Some(stripped) = raw.strip_suffix(['M', 'm']) {
        (stripped, 1024 * 1024)
    } else if let Some(stripped) = raw.strip_suffix(['G', 'g']) {
        (stripped, 1024 * 1024 * 1024)
    } else {
        (raw, 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * mult)
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(raw)
}

fn parse_general(ini: &Ini) -> Result<GeneralConfig> {
    let chunk_size = get(ini, "general", "chunk_size")
        .and_then(parse_size_with_suffix)
        .unwrap_or(4 * 1024 * 1024)
        .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);

    let replication_factor: u32 = get(ini, "general", "replication_factor")
        .and_then(|v| v.parse().ok())
        .unwrap_or(3)
        .clamp(1, 10);

    let max_concurrent_operations: u32 = get(ini, "general", "max_concurrent_operations")
        .and_then(|v| v.parse().ok())
        .unwrap_or(8)
        .clamp(1, 32);

    let ftp_timeout_secs: u64 = get(ini, "general", "ftp_timeout")
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
        .clamp(5, 300);

    let log_level = get(ini, "general", "log_level")
        .unwrap_or("info")
        .to_string();
    let log_file = expand_home(get(ini, "general", "log_file").unwrap_or("~/.netchunk/netchunk.log"));
    let local_storage_path = expand_home(
        get(ini, "general", "local_storage_path").unwrap_or("~/.netchunk/state"),
    );

    let health_monitoring_enabled = get(ini, "general", "health_monitoring_enabled")
        .map(parse_bool)
        .unwrap_or(true);
    let health_check_interval_secs = get(ini, "general", "health_check_interval")
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);

    Ok(GeneralConfig {
        chunk_size,
        replication_factor,
        max_concurrent_operations,
        ftp_timeout_secs,
        log_level,
        log_file,
        local_storage_path,
        health_monitoring_enabled,
        health_check_interval_secs,
    })
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_servers(ini: &Ini) -> Result<Vec<ServerDescriptor>> {
    let mut servers = Vec::new();
    for n in 1..=MAX_SERVERS {
        let section = format!("server_{n}");
        let Some(s) = ini.section(Some(section.as_str())) else {
            continue;
        };
        let host = s
            .get("host")
            .ok_or_else(|| NetChunkError::ConfigValidation {
                section: section.clone(),
                key: "host".into(),
                reason: "missing required key".into(),
            })?
            .to_string();
        let port: u16 = s
            .get("port")
            .unwrap_or("21")
            .parse()
            .map_err(|_| NetChunkError::ConfigValidation {
                section: section.clone(),
                key: "port".into(),
                reason: "not a valid port number".into(),
            })?;
        let username = s.get("username").unwrap_or("anonymous").to_string();
        let password = s.get("password").unwrap_or("").to_string();
        let base_path = s.get("base_path").unwrap_or("/").to_string();
        let tls = s.get("use_ssl").map(parse_bool).unwrap_or(false);
        let passive = s.get("passive_mode").map(parse_bool).unwrap_or(true);
        let priority: u32 = s.get("priority").and_then(|v| v.parse().ok()).unwrap_or(0);

        servers.push(ServerDescriptor {
            server_id: section,
            host,
            port,
            username,
            password,
            base_path,
            tls,
            passive,
            priority,
        });
    }
    Ok(servers)
}

fn parse_repair(ini: &Ini) -> RepairConfig {
    RepairConfig {
        auto_repair_enabled: get(ini, "repair", "auto_repair_enabled")
            .map(parse_bool)
            .unwrap_or(true),
        max_repair_attempts: get(ini, "repair", "max_repair_attempts")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3),
        repair_delay_secs: get(ini, "repair", "repair_delay")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5),
        rebalancing_enabled: get(ini, "repair", "rebalancing_enabled")
            .map(parse_bool)
            .unwrap_or(false),
    }
}

fn parse_security(ini: &Ini) -> SecurityConfig {
    SecurityConfig {
        verify_ssl_certificates: get(ini, "security", "verify_ssl_certificates")
            .map(parse_bool)
            .unwrap_or(true),
        always_verify_integrity: get(ini, "security", "always_verify_integrity")
            .map(parse_bool)
            .unwrap_or(true),
        encrypt_chunks: get(ini, "security", "encrypt_chunks")
            .map(parse_bool)
            .unwrap_or(false),
    }
}

fn parse_monitoring(ini: &Ini, general: &GeneralConfig) -> MonitoringConfig {
    MonitoringConfig {
        health_monitoring_enabled: get(ini, "monitoring", "health_monitoring_enabled")
            .map(parse_bool)
            .unwrap_or(general.health_monitoring_enabled),
        health_check_interval_secs: get(ini, "monitoring", "health_check_interval")
            .and_then(|v| v.parse().ok())
            .unwrap_or(general.health_check_interval_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[general]
chunk_size = 4M
replication_factor = 3
max_concurrent_operations = 8
ftp_timeout = 30

[server_1]
host = ftp1.example.com
port = 21
username = user
password = pass
base_path = /data

[server_2]
host = ftp2.example.com
port = 21
username = user
password = pass
base_path = /data

[server_3]
host = ftp3.example.com
port = 21
username = user
password = pass
base_path = /data
"#;

    #[test]
    fn parses_chunk_size_suffix() {
        assert_eq!(parse_size_with_suffix("4M"), Some(4 * 1024 * 1024));
        assert_eq!(parse_size_with_suffix("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size_with_suffix("512K"), Some(512 * 1024));
    }

    #[test]
    fn clamps_chunk_size_to_bounds() {
        let mut data = SAMPLE.replace("chunk_size = 4M", "chunk_size = 1K");
        data = data.replace("replication_factor = 3", "replication_factor = 1");
        let cfg = Config::load_str(&data).unwrap();
        assert_eq!(cfg.general.chunk_size, MIN_CHUNK_SIZE);
    }

    #[test]
    fn loads_three_servers() {
        let cfg = Config::load_str(SAMPLE).unwrap();
        assert_eq!(cfg.servers.len(), 3);
        assert_eq!(cfg.general.replication_factor, 3);
    }

    #[test]
    fn fails_with_insufficient_servers_for_replication_factor() {
        let data = SAMPLE
            .lines()
            .take_while(|l| !l.starts_with("[server_3]"))
            .collect::<Vec<_>>()
            .join("\n");
        let err = Config::load_str(&data).unwrap_err();
        assert!(matches!(err, NetChunkError::InsufficientServers { .. }));
    }

    #[test]
    fn expands_home_directory_tilde() {
        let expanded = expand_home("~/.netchunk/state");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
