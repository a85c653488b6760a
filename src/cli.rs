//! CLI front-end (C10, spec.md §6). Parses argv into a command and the
//! global flags that apply to every subcommand.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "netchunk", version, about = "Distributed file storage over a pool of FTP/FTPS servers")]
pub struct Cli {
    /// Path to the INI configuration file.
    #[arg(short = 'c', long = "config", default_value = "~/.netchunk/netchunk.conf", global = true)]
    pub config: PathBuf,

    /// Verbose logging.
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Suppress non-error output.
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Print operation statistics on completion.
    #[arg(short = 's', long = "stats", global = true)]
    pub stats: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a local file to the server pool under a remote name.
    Upload {
        local: PathBuf,
        remote: String,
    },
    /// Download a remote file to a local path.
    Download {
        remote: String,
        local: PathBuf,
    },
    /// List all manifests known to the server pool.
    List,
    /// Delete a remote file and all of its replicas.
    Delete {
        remote: String,
    },
    /// Verify chunk health for a remote file, optionally repairing it.
    Verify {
        remote: String,
        /// Attempt auto-repair on any non-healthy, non-lost chunk.
        #[arg(short = 'r', long = "repair")]
        repair: bool,
    },
    /// Probe every configured server and report reachability/latency.
    Health,
    /// Print the binary's version and exit (spec.md §6 lists this as its
    /// own subcommand, distinct from the `--version`/`-V` flag clap derives
    /// automatically from the `version` attribute above).
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upload_with_global_flags() {
        let cli = Cli::parse_from(["netchunk", "-c", "/tmp/nc.conf", "-s", "upload", "a.bin", "remote-a"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/nc.conf"));
        assert!(cli.stats);
        assert!(matches!(cli.command, Command::Upload { local, remote }
            if local == PathBuf::from("a.bin") && remote == "remote-a"));
    }

    #[test]
    fn parses_verify_with_repair_flag() {
        let cli = Cli::parse_from(["netchunk", "verify", "remote-a", "--repair"]);
        assert!(matches!(cli.command, Command::Verify { remote, repair }
            if remote == "remote-a" && repair));
    }

    #[test]
    fn parses_version_subcommand() {
        let cli = Cli::parse_from(["netchunk", "version"]);
        assert!(matches!(cli.command, Command::Version));
    }

    #[test]
    fn parses_help_subcommand() {
        // clap derives a "help" subcommand automatically alongside --help,
        // matching spec.md §6's CLI command list.
        let result = Cli::try_parse_from(["netchunk", "help"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
