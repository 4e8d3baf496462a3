//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Fault-injecting HTTP proxy - delays, forced errors and connection aborts
#[derive(Parser, Debug)]
#[command(name = "fault-injector")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "FAULT_INJECTOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "FAULT_INJECTOR_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "FAULT_INJECTOR_HOST")]
    pub host: Option<String>,

    /// Upstream base URL to proxy to (echo handler if unset)
    #[arg(short, long, env = "FAULT_INJECTOR_UPSTREAM")]
    pub upstream: Option<String>,

    /// Seed for fault decisions, for reproducible runs
    #[arg(long, env = "FAULT_INJECTOR_SEED", global = true)]
    pub seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "FAULT_INJECTOR_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "FAULT_INJECTOR_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the fault-injecting server (default)
    Serve,

    /// Validate the configuration and print the fault stack
    Check {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

/// Output format for `check`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table
    Text,
    /// JSON document
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_server_mode() {
        let cli = Cli::try_parse_from(["fault-injector"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "fault-injector",
            "--port",
            "8081",
            "--upstream",
            "http://127.0.0.1:9000",
            "--seed",
            "3",
            "serve",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(8081));
        assert_eq!(cli.upstream.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(cli.seed, Some(3));
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_check_json() {
        let cli = Cli::try_parse_from(["fault-injector", "check", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Check {
                format: OutputFormat::Json
            })
        ));
    }
}
