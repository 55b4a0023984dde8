//! Reordering raw firehose dumps by record-key time.
//!
//! Raw dumps arrive roughly in relay order, which is not the order users
//! acted in. Every record is stamped with a `ts` derived from its TID record
//! key (or `createdAt` for profiles, whose key is `self`) and pushed through
//! a bounded min-heap that spills the oldest half to numbered batch files.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::aturi::rkey_from_uri;
use crate::error::{Error, Result};
use crate::record::{parse_created_at, PROFILE_TYPE};
use crate::stream::{self, JsonlReader};
use crate::tid::parse_rkey;

/// Counters describing a reorder pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReorderReport {
    /// Raw files read.
    pub files_read: usize,
    /// Records parsed from raw files.
    pub records_in: u64,
    /// Records written to batches.
    pub records_out: u64,
    /// Records dropped because no time could be derived.
    pub dropped_no_time: u64,
    /// Byte-identical lines dropped.
    pub duplicates: u64,
    /// Lines that were not JSON objects.
    pub malformed: u64,
    /// Batch files written.
    pub batches_written: usize,
}

/// Derive a record's time in Unix milliseconds.
///
/// Profiles use `createdAt`; everything else uses the TID in its URI.
#[must_use]
pub fn record_time(record: &Map<String, Value>) -> Option<i64> {
    if record.get("$type").and_then(Value::as_str) == Some(PROFILE_TYPE) {
        let created_at = record.get("createdAt")?.as_str()?;
        return parse_created_at(created_at).ok();
    }
    let uri = record.get("uri")?.as_str()?;
    let rkey = rkey_from_uri(uri)?;
    parse_rkey(rkey).ok().map(|(ts, _)| ts)
}

/// A record waiting in the heap, ordered by `(ts, seq)`.
#[derive(Debug)]
struct Pending {
    ts: i64,
    seq: u64,
    record: Map<String, Value>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        (self.ts, self.seq) == (other.ts, other.seq)
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed so the max-heap pops the oldest record first
    fn cmp(&self, other: &Self) -> Ordering {
        (other.ts, other.seq).cmp(&(self.ts, self.seq))
    }
}

/// Bounded external reorderer.
///
/// Holds at most `2 * batch_size` records; once full, the oldest
/// `batch_size` are written out as the next batch file.
#[derive(Debug)]
pub struct Reorderer {
    out_dir: PathBuf,
    batch_size: usize,
    dedup: bool,
    heap: BinaryHeap<Pending>,
    seen_lines: HashSet<[u8; 32]>,
    seq: u64,
    next_batch: usize,
    report: ReorderReport,
}

impl Reorderer {
    /// Create a reorderer writing batches into `out_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if `out_dir` cannot be created.
    pub fn new(out_dir: impl Into<PathBuf>, batch_size: usize, dedup: bool) -> Result<Self> {
        let out_dir = out_dir.into();
        if batch_size == 0 {
            return Err(Error::internal("batch size must be greater than 0"));
        }
        std::fs::create_dir_all(&out_dir).map_err(|source| Error::DirectoryCreate {
            path: out_dir.clone(),
            source,
        })?;
        Ok(Self {
            out_dir,
            batch_size,
            dedup,
            heap: BinaryHeap::new(),
            seen_lines: HashSet::new(),
            seq: 0,
            next_batch: 0,
            report: ReorderReport::default(),
        })
    }

    /// Push one raw line and its parsed object.
    ///
    /// # Errors
    ///
    /// Returns an error if a full batch cannot be written.
    pub fn push(&mut self, line: &[u8], mut record: Map<String, Value>) -> Result<()> {
        self.report.records_in += 1;

        if self.dedup && !self.seen_lines.insert(*blake3::hash(line).as_bytes()) {
            self.report.duplicates += 1;
            return Ok(());
        }

        let Some(ts) = record_time(&record) else {
            self.report.dropped_no_time += 1;
            debug!(uri = ?record.get("uri"), "Dropping record without derivable time");
            return Ok(());
        };

        record.insert("ts".to_string(), Value::from(ts));
        self.heap.push(Pending {
            ts,
            seq: self.seq,
            record,
        });
        self.seq += 1;

        if self.heap.len() >= self.batch_size.saturating_mul(2) {
            self.spill()?;
        }
        Ok(())
    }

    /// Feed every line of a raw dump.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a batch cannot be written.
    pub fn push_file(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Reordering raw file");
        let mut reader = JsonlReader::open(path)?;
        for item in reader.by_ref() {
            let (line, record) = item?;
            self.push(&line, record)?;
        }
        self.report.malformed += reader.malformed() as u64;
        self.report.files_read += 1;
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        let mut batch = Vec::with_capacity(self.batch_size.min(self.heap.len()));
        while batch.len() < self.batch_size {
            match self.heap.pop() {
                Some(pending) => batch.push(pending.record),
                None => break,
            }
        }
        if batch.is_empty() {
            return Ok(());
        }
        let path = self.out_dir.join(format!("{}.json", self.next_batch));
        stream::write_batch(&path, &batch)?;
        self.report.records_out += batch.len() as u64;
        self.report.batches_written += 1;
        self.next_batch += 1;
        Ok(())
    }

    /// Drain the heap and return the final counters.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch cannot be written.
    pub fn finish(mut self) -> Result<ReorderReport> {
        while !self.heap.is_empty() {
            self.spill()?;
        }
        info!(
            records = self.report.records_out,
            batches = self.report.batches_written,
            "Reorder complete"
        );
        Ok(self.report)
    }
}

/// Reorder every raw dump in `input` (up to `end_date`) into batches in `output`.
///
/// # Errors
///
/// Returns an error if any file cannot be read or written.
pub fn reorder_dir(
    input: &Path,
    output: &Path,
    end_date: Option<NaiveDate>,
    batch_size: usize,
    dedup: bool,
) -> Result<ReorderReport> {
    let mut reorderer = Reorderer::new(output, batch_size, dedup)?;
    for path in stream::raw_files(input, end_date)? {
        reorderer.push_file(&path)?;
    }
    reorderer.finish()
}
