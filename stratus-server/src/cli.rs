use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "stratus-server")]
#[command(about = "Aggregates storage-network statistics from every area scheduler")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the TOML configuration file
    #[arg(short, long, env = "STRATUS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, env = "STRATUS_ENV_FILE", global = true)]
    pub env_file: Option<PathBuf>,

    /// Emit JSON logs regardless of log.format
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the scheduled pipeline until interrupted (default)
    Run,
    /// Load and validate configuration, print warnings, and exit
    CheckConfig,
    /// Print the schedulers currently registered with the coordination service
    ListSchedulers {
        /// Only list schedulers serving this area
        #[arg(long)]
        area: Option<String>,
    },
    /// Execute a single tick immediately, wait for its writes, and exit
    RunOnce {
        /// Also run the maintenance tasks once
        #[arg(long, default_value_t = false)]
        maintenance: bool,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let cli = Cli::try_parse_from(["stratus-server"]).unwrap();
        assert_eq!(cli.command(), Command::Run);
        assert!(!cli.json_logs);
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "stratus-server",
            "list-schedulers",
            "--area",
            "eu-west",
            "--config",
            "/etc/stratus.toml",
        ])
        .unwrap();
        assert_eq!(
            cli.command(),
            Command::ListSchedulers {
                area: Some("eu-west".into())
            }
        );
        assert_eq!(cli.config, Some(PathBuf::from("/etc/stratus.toml")));
    }

    #[test]
    fn run_once_accepts_maintenance_flag() {
        let cli = Cli::try_parse_from(["stratus-server", "run-once", "--maintenance"]).unwrap();
        assert_eq!(cli.command(), Command::RunOnce { maintenance: true });
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["stratus-server", "serve-forever"]).is_err());
    }
}
