//! Standalone configuration validator (C12, spec.md §4.10). Loads and
//! validates a config file without running an operation, for use in
//! deployment pipelines ahead of rolling out a new `netchunk.conf`.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use netchunk::config::Config;

#[derive(Debug, Parser)]
#[command(name = "netchunk-config-check", about = "Validates a netchunk configuration file")]
struct Args {
    /// Path to the INI configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
}

fn main() {
    let args = Args::parse();
    match Config::load(&args.config) {
        Ok(config) => {
            println!("configuration is valid: {}", args.config.display());
            println!(
                "  servers: {}, replication_factor: {}, chunk_size: {} bytes",
                config.servers.len(),
                config.general.replication_factor,
                config.general.chunk_size
            );
        }
        Err(e) => {
            eprintln!("configuration is invalid: {}", args.config.display());
            eprintln!("  {e}");
            process::exit(1);
        }
    }
}
