//! Command-line interface (spec §6, SPEC_FULL §10.4).

use std::path::PathBuf;

use clap::Parser;

/// Multi-venue market-data feed handler.
#[derive(Debug, Parser)]
#[command(name = "feedhandler", disable_version_flag = true)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config", default_value = "feedhandler.toml")]
    pub config_path: PathBuf,

    /// Debug mode: inhibits daemonize, escalates log verbosity.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Standalone: skip connecting to the management collaborator.
    #[arg(short = 's')]
    pub standalone: bool,

    /// Which configured process block to run.
    #[arg(short = 'p', long = "process")]
    pub process: Option<String>,

    /// Print version and exit.
    #[arg(short = 'v')]
    pub version: bool,
}

/// Exit codes (spec §6).
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_process_flag() {
        let cli = Cli::parse_from(["feedhandler", "-p", "main", "-d"]);
        assert_eq!(cli.process.as_deref(), Some("main"));
        assert!(cli.debug);
        assert!(!cli.standalone);
    }

    #[test]
    fn defaults_are_sane() {
        let cli = Cli::parse_from(["feedhandler"]);
        assert!(!cli.debug);
        assert!(!cli.standalone);
        assert!(cli.process.is_none());
    }
}
