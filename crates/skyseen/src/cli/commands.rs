//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};

/// Prepare command arguments.
#[derive(Debug, Args)]
pub struct PrepareCommand {
    /// Directory of raw YYYY-MM-DD.jsonl dumps
    #[arg(short, long, value_name = "DIR")]
    pub input: PathBuf,

    /// Directory for the ordered batches (replaced if it exists)
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Last raw file date to read
    #[arg(long, value_name = "DATE")]
    pub end_date: Option<NaiveDate>,

    /// Records per output batch
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Output the report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Reorder command arguments.
#[derive(Debug, Args)]
pub struct ReorderCommand {
    /// Directory of raw YYYY-MM-DD.jsonl dumps
    #[arg(short, long, value_name = "DIR")]
    pub input: PathBuf,

    /// Directory for the ordered batches
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Last raw file date to read
    #[arg(long, value_name = "DATE")]
    pub end_date: Option<NaiveDate>,

    /// Records per output batch
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Output the report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Deleted command arguments.
#[derive(Debug, Args)]
pub struct DeletedCommand {
    /// Directory of ordered batches
    #[arg(short, long, value_name = "DIR")]
    pub input: PathBuf,

    /// Stop before records on or after this date
    #[arg(long, value_name = "DATE")]
    pub end_date: Option<NaiveDate>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Simulate command arguments.
#[derive(Debug, Args)]
pub struct SimulateCommand {
    /// Directory of ordered batches
    #[arg(short, long, value_name = "DIR")]
    pub input: PathBuf,

    /// Stop before records on or after this date
    #[arg(long, value_name = "DATE")]
    pub end_date: Option<NaiveDate>,

    /// Don't write sessions to the seen store
    #[arg(long)]
    pub no_store: bool,

    /// Output the evaluation as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Sessions command arguments.
#[derive(Debug, Args)]
pub struct SessionsCommand {
    /// DID of the user
    pub did: String,

    /// Run to query (defaults to the latest)
    #[arg(short, long)]
    pub run: Option<i64>,

    /// Maximum number of results
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Seen command arguments.
#[derive(Debug, Args)]
pub struct SeenCommand {
    /// DID of the user
    pub did: String,

    /// Run to query (defaults to the latest)
    #[arg(short, long)]
    pub run: Option<i64>,

    /// Maximum number of results
    #[arg(short, long, default_value = "100")]
    pub limit: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// Runs command arguments.
#[derive(Debug, Args)]
pub struct RunsCommand {
    /// Maximum number of runs
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Prune command arguments.
#[derive(Debug, Args)]
pub struct PruneCommand {
    /// Number of most recent runs to keep
    #[arg(short, long, value_name = "N")]
    pub keep: usize,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Plain);
    }

    #[test]
    fn test_output_format_value_names() {
        let names: Vec<_> = OutputFormat::value_variants()
            .iter()
            .filter_map(|v| v.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, vec!["plain", "table", "json"]);
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
