//! Command-line interface for skyseen.
//!
//! This module provides the CLI structure for the `skyseen` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, DeletedCommand, OutputFormat, PrepareCommand, PruneCommand, ReorderCommand,
    RunsCommand, SeenCommand, SessionsCommand, SimulateCommand, StatusCommand,
};

/// skyseen - Reconstruct what Bluesky users have seen
///
/// Replays an archived firehose, rebuilds each user's chronological feed,
/// and predicts which posts they were shown.
#[derive(Debug, Parser)]
#[command(name = "skyseen")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reorder raw dumps, detect deletions and re-insert tombstones
    Prepare(PrepareCommand),

    /// Reorder raw dumps by record key time only
    Reorder(ReorderCommand),

    /// Report deleted posts and users in ordered batches
    Deleted(DeletedCommand),

    /// Replay ordered batches, predict impressions and evaluate them
    Simulate(SimulateCommand),

    /// List a user's stored sessions
    Sessions(SessionsCommand),

    /// List posts a user is predicted to have seen
    Seen(SeenCommand),

    /// List stored simulation runs
    Runs(RunsCommand),

    /// Show seen store status
    Status(StatusCommand),

    /// Delete all but the most recent runs
    Prune(PruneCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use clap::CommandFactory;

    fn status_cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            verbose,
            quiet,
            command: Command::Status(StatusCommand { json: false }),
        }
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "skyseen");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity() {
        use crate::logging::Verbosity;

        assert_eq!(status_cli(0, true).verbosity(), Verbosity::Quiet);
        assert_eq!(status_cli(3, true).verbosity(), Verbosity::Quiet);
        assert_eq!(status_cli(0, false).verbosity(), Verbosity::Normal);
        assert_eq!(status_cli(1, false).verbosity(), Verbosity::Verbose);
        assert_eq!(status_cli(2, false).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_prepare() {
        let args = vec![
            "skyseen",
            "prepare",
            "--input",
            "raw",
            "--output",
            "ordered",
            "--end-date",
            "2023-05-01",
            "--batch-size",
            "500",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Prepare(cmd) => {
                assert_eq!(cmd.input, PathBuf::from("raw"));
                assert_eq!(cmd.output, PathBuf::from("ordered"));
                assert_eq!(cmd.end_date, NaiveDate::from_ymd_opt(2023, 5, 1));
                assert_eq!(cmd.batch_size, Some(500));
            }
            other => panic!("expected prepare, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_prepare_requires_output() {
        let args = vec!["skyseen", "prepare", "--input", "raw"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_bad_end_date() {
        let args = vec!["skyseen", "deleted", "-i", "ordered", "--end-date", "May 1st"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_simulate() {
        let args = vec!["skyseen", "simulate", "-i", "ordered", "--no-store", "--json"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Simulate(cmd) => {
                assert!(cmd.no_store);
                assert!(cmd.json);
                assert!(cmd.end_date.is_none());
            }
            other => panic!("expected simulate, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_sessions_defaults() {
        let args = vec!["skyseen", "sessions", "did:plc:abc"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Sessions(cmd) => {
                assert_eq!(cmd.did, "did:plc:abc");
                assert_eq!(cmd.run, None);
                assert_eq!(cmd.limit, 20);
                assert_eq!(cmd.format, OutputFormat::Table);
            }
            other => panic!("expected sessions, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_seen_with_run() {
        let args = vec!["skyseen", "seen", "did:plc:abc", "--run", "3", "-f", "json"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Seen(cmd) => {
                assert_eq!(cmd.run, Some(3));
                assert_eq!(cmd.format, OutputFormat::Json);
            }
            other => panic!("expected seen, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_prune() {
        let args = vec!["skyseen", "prune", "--keep", "2"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Command::Prune(PruneCommand { keep: 2 })));
    }

    #[test]
    fn test_parse_config_validate() {
        let args = vec!["skyseen", "config", "validate", "--file", "/tmp/c.toml"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_global_flags() {
        let args = vec!["skyseen", "status", "-c", "/custom/config.toml", "-vv"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Status(_)));
    }
}
