//! The full preparation pipeline: raw dumps to replayable batches.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::StreamConfig;
use crate::deleted::{self, DeletionReport};
use crate::error::{Error, Result};
use crate::reorder::{self, ReorderReport};
use crate::storage::Storage;

/// Inputs of a preparation run.
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Directory of raw `YYYY-MM-DD.jsonl` dumps.
    pub input: PathBuf,
    /// Directory receiving the final batches.
    pub output: PathBuf,
    /// Last raw file date to read, inclusive.
    pub end_date: Option<NaiveDate>,
    /// Records per batch.
    pub batch_size: usize,
    /// Drop repeated raw lines.
    pub dedup: bool,
}

impl PrepareOptions {
    /// Options taking the stream settings from configuration.
    #[must_use]
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, stream: &StreamConfig) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            end_date: stream.end_date,
            batch_size: stream.batch_size,
            dedup: stream.dedup,
        }
    }

    /// Directory holding the reordered batches before tombstones are merged in.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        let mut name = OsString::from(self.output.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

/// Outcome of [`prepare`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepareReport {
    /// Reordering counters.
    pub reorder: ReorderReport,
    /// Distinct authors in the stream.
    pub users: usize,
    /// Distinct posts in the stream.
    pub posts: usize,
    /// Users referenced but never seen.
    pub deleted_users: usize,
    /// Posts referenced but never seen.
    pub deleted_posts: usize,
    /// Percentage of posts that were deleted.
    pub deletion_rate: f64,
    /// Tombstones merged into the output.
    pub tombstones_written: usize,
    /// Tombstones newly recorded in the seen store.
    pub tombstones_stored: Option<usize>,
}

impl PrepareReport {
    fn new(reorder: ReorderReport, deletion: &DeletionReport) -> Self {
        Self {
            reorder,
            users: deletion.users,
            posts: deletion.posts,
            deleted_users: deletion.deleted_users.len(),
            deleted_posts: deletion.deleted_posts.len(),
            deletion_rate: deletion.deletion_rate(),
            tombstones_written: 0,
            tombstones_stored: None,
        }
    }
}

fn clear_dir(path: &Path) -> Result<()> {
    if path.exists() {
        warn!(path = %path.display(), "Removing existing directory");
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Reorder, scan for deletions, and merge tombstones back in.
///
/// Existing output and staging directories are replaced. When `store` is
/// given, the tombstones are also recorded there.
///
/// # Errors
///
/// Returns an error if the input and output directories coincide, or if any
/// stage fails to read or write.
pub fn prepare(options: &PrepareOptions, store: Option<&Storage>) -> Result<PrepareReport> {
    if options.input == options.output {
        return Err(Error::stream_file(
            &options.output,
            "output directory must differ from the input directory",
        ));
    }
    let staging = options.staging_dir();
    clear_dir(&staging)?;
    clear_dir(&options.output)?;

    info!(input = %options.input.display(), "Reordering raw dumps");
    let reorder_report = reorder::reorder_dir(
        &options.input,
        &staging,
        options.end_date,
        options.batch_size,
        options.dedup,
    )?;

    info!("Scanning for deleted posts and users");
    let deletion = deleted::scan_dir(&staging, None)?;
    let tombstones = deletion.tombstones();
    let mut report = PrepareReport::new(reorder_report, &deletion);

    report.tombstones_written = deleted::reinsert_tombstones(&staging, &options.output, &tombstones)?;
    if let Some(store) = store {
        report.tombstones_stored = Some(store.insert_tombstones(&tombstones)?);
    }

    std::fs::remove_dir_all(&staging)?;
    info!(output = %options.output.display(), "Preparation complete");
    Ok(report)
}
