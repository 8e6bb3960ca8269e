use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    actions::{self, Barcode, CommandOutcome, SendCommand, SetManualControl},
    config::Config,
};

/// The command line interface for the serial gateway.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// HTTP port, overrides the configuration file
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level on stdout
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Use mocks instead of the configured serial devices.
    /// Whatever the gateway writes to them is logged.
    #[arg(long)]
    pub mock_devices: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON request enabling manual control.
    ManualControl,

    /// Show an example JSON request sending a command, and its response.
    Command,

    /// Show an example JSON response to asking for the latest barcode.
    Barcode,
}

/// Print what the command asks for.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(example) => match example {
            Examples::Config => {
                println!("{}", Config::example().serialize_pretty());
            }
            Examples::ManualControl => {
                println!("{}", actions::to_json_pretty(&SetManualControl::example()));
            }
            Examples::Command => {
                println!("{}", actions::to_json_pretty(&SendCommand::example()));
                println!("{}", actions::to_json_pretty(&CommandOutcome::example()));
            }
            Examples::Barcode => {
                println!("{}", actions::to_json_pretty(&Barcode::example()));
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_options() {
        let cli = Cli::parse_from([
            "serial-gateway",
            "gateway.ron",
            "--port",
            "8080",
            "--log-level",
            "debug",
            "--mock-devices",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("gateway.ron")));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.log_level, Level::DEBUG);
        assert!(cli.mock_devices);
        assert!(cli.log_dir.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_examples() {
        let cli = Cli::parse_from(["serial-gateway", "examples", "manual-control"]);

        assert!(matches!(
            cli.command,
            Some(Commands::Examples(Examples::ManualControl))
        ));
    }
}
