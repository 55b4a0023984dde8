//! Detecting deleted posts and users, and re-inserting tombstones.
//!
//! Deleted records vanish from the archive, but the likes, reposts, replies,
//! quotes and follows that point at them do not. Walking the stream in time
//! order, any reference to a post or user that has not appeared yet is
//! evidence that it was deleted. Deleted posts are then restored into the
//! stream as tombstones at the time encoded in their record key so that
//! feed reconstruction can still place them.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::aturi::{did_from_uri, rkey_from_uri};
use crate::error::{Error, Result};
use crate::record::{Record, RecordBody};
use crate::stream::{self, BatchReader};
use crate::tid::parse_rkey;

/// A post restored into the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tombstone {
    /// URI of the deleted post.
    pub uri: String,
    /// DID of its author.
    pub did: String,
    /// Creation time from its record key, in Unix milliseconds.
    pub ts: i64,
}

impl Tombstone {
    /// Build a tombstone from a deleted post URI.
    ///
    /// Returns `None` when the URI has no decodable TID record key.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        let rkey = rkey_from_uri(uri)?;
        let (ts, _) = parse_rkey(rkey).ok()?;
        let did = did_from_uri(uri).ok()?;
        Some(Self {
            uri: uri.to_string(),
            did,
            ts,
        })
    }

    /// The tombstone as a stream record.
    #[must_use]
    pub fn to_record(&self) -> Record {
        Record::tombstone(self.did.clone(), self.uri.clone(), self.ts)
    }
}

/// Accumulates existing and referenced entities over a time-ordered stream.
#[derive(Debug, Default)]
pub struct DeletionScanner {
    users: HashSet<String>,
    posts: HashSet<String>,
    deleted_users: BTreeSet<String>,
    deleted_posts: BTreeSet<String>,
    bad_uris: u64,
}

impl DeletionScanner {
    /// Create an empty scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn reference_post(&mut self, uri: &str) {
        if uri.is_empty() {
            return;
        }
        if !self.posts.contains(uri) {
            self.deleted_posts.insert(uri.to_string());
        }
        match did_from_uri(uri) {
            Ok(did) => self.reference_user(&did),
            Err(e) => {
                self.bad_uris += 1;
                debug!(error = %e, "Unparseable reference");
            }
        }
    }

    fn reference_user(&mut self, did: &str) {
        if !self.users.contains(did) {
            self.deleted_users.insert(did.to_string());
        }
    }

    /// Observe one record.
    pub fn observe(&mut self, record: &Record) {
        if !self.users.contains(&record.did) {
            self.users.insert(record.did.clone());
        }

        match &record.body {
            RecordBody::Post(_) => {
                if let Some(uri) = &record.uri {
                    self.posts.insert(uri.clone());
                }
                for uri in record.referenced_posts() {
                    self.reference_post(uri);
                }
            }
            RecordBody::Like { .. } | RecordBody::Repost { .. } => {
                for uri in record.referenced_posts() {
                    self.reference_post(uri);
                }
            }
            RecordBody::Follow { subject } => self.reference_user(subject),
            RecordBody::Block { .. } | RecordBody::Profile | RecordBody::Unknown => {}
        }
    }

    /// Resolve overlaps and produce the report.
    ///
    /// Entities referenced before they appeared are counted as existing.
    #[must_use]
    pub fn finish(mut self) -> DeletionReport {
        let user_overlap: Vec<String> = self
            .deleted_users
            .iter()
            .filter(|did| self.users.contains(*did))
            .cloned()
            .collect();
        if !user_overlap.is_empty() {
            warn!(
                count = user_overlap.len(),
                "Users referenced before they appeared; treating as existing"
            );
        }
        for did in &user_overlap {
            self.deleted_users.remove(did);
        }

        let post_overlap: Vec<String> = self
            .deleted_posts
            .iter()
            .filter(|uri| self.posts.contains(*uri))
            .cloned()
            .collect();
        if !post_overlap.is_empty() {
            warn!(
                count = post_overlap.len(),
                "Posts referenced before they appeared; treating as existing"
            );
        }
        for uri in &post_overlap {
            self.deleted_posts.remove(uri);
        }

        DeletionReport {
            users: self.users.len(),
            posts: self.posts.len(),
            deleted_users: self.deleted_users,
            deleted_posts: self.deleted_posts,
            user_overlap: user_overlap.len(),
            post_overlap: post_overlap.len(),
            bad_uris: self.bad_uris,
        }
    }
}

/// Outcome of a deletion scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeletionReport {
    /// Distinct authors seen.
    pub users: usize,
    /// Distinct posts seen.
    pub posts: usize,
    /// DIDs referenced but never seen.
    #[serde(skip)]
    pub deleted_users: BTreeSet<String>,
    /// Post URIs referenced but never seen.
    #[serde(skip)]
    pub deleted_posts: BTreeSet<String>,
    /// Users referenced before they appeared.
    pub user_overlap: usize,
    /// Posts referenced before they appeared.
    pub post_overlap: usize,
    /// References whose URI could not be parsed.
    pub bad_uris: u64,
}

impl DeletionReport {
    /// Percentage of all posts (seen and deleted) that were deleted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn deletion_rate(&self) -> f64 {
        let total = self.posts + self.deleted_posts.len();
        if total == 0 {
            0.0
        } else {
            self.deleted_posts.len() as f64 / total as f64 * 100.0
        }
    }

    /// Tombstones for every deleted post with a decodable record key, in time order.
    #[must_use]
    pub fn tombstones(&self) -> Vec<Tombstone> {
        let mut tombstones: Vec<Tombstone> = self
            .deleted_posts
            .iter()
            .filter_map(|uri| Tombstone::from_uri(uri))
            .collect();
        tombstones.sort_by(|a, b| (a.ts, &a.uri).cmp(&(b.ts, &b.uri)));
        tombstones
    }

    /// Summary suitable for JSON output.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "users": self.users,
            "posts": self.posts,
            "deleted_users": self.deleted_users.len(),
            "deleted_posts": self.deleted_posts.len(),
            "deletion_rate": self.deletion_rate(),
            "user_overlap": self.user_overlap,
            "post_overlap": self.post_overlap,
            "bad_uris": self.bad_uris,
        })
    }
}

/// Scan an ordered batch directory for deleted entities.
///
/// # Errors
///
/// Returns an error if a batch file cannot be read.
pub fn scan_dir(dir: &Path, end_ms: Option<i64>) -> Result<DeletionReport> {
    let mut scanner = DeletionScanner::new();
    for record in BatchReader::<Record>::open(dir, end_ms)? {
        scanner.observe(&record?);
    }
    let report = scanner.finish();
    info!(
        deleted_posts = report.deleted_posts.len(),
        deleted_users = report.deleted_users.len(),
        rate = %format!("{:.2}%", report.deletion_rate()),
        "Deletion scan complete"
    );
    Ok(report)
}

fn tombstone_value(tombstone: &Tombstone) -> Result<Map<String, Value>> {
    match serde_json::to_value(tombstone.to_record())? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::internal("tombstone did not serialize to an object")),
    }
}

/// Copy the batches in `input` to `output`, merging `tombstones` in by time.
///
/// Each tombstone is written just before the first record at or after its
/// time. Leftovers go at the end of the last batch. Batch file names are
/// preserved. Returns the number of tombstones written.
///
/// # Errors
///
/// Returns an error if a batch cannot be read or written.
pub fn reinsert_tombstones(input: &Path, output: &Path, tombstones: &[Tombstone]) -> Result<usize> {
    std::fs::create_dir_all(output).map_err(|source| Error::DirectoryCreate {
        path: output.to_path_buf(),
        source,
    })?;

    let files = stream::batch_files(input)?;
    let mut pending = tombstones.iter().peekable();
    let mut written = 0;

    for (i, path) in files.iter().enumerate() {
        let mut batch: Vec<Map<String, Value>> = Vec::new();
        for record in BatchReader::<Map<String, Value>>::from_files(vec![path.clone()], None) {
            let record = record?;
            if let Some(ts) = stream::Timestamped::ts(&record) {
                while let Some(tombstone) = pending.next_if(|t| t.ts <= ts) {
                    batch.push(tombstone_value(tombstone)?);
                    written += 1;
                }
            }
            batch.push(record);
        }

        if i + 1 == files.len() {
            for tombstone in pending.by_ref() {
                batch.push(tombstone_value(tombstone)?);
                written += 1;
            }
        }

        let name = path
            .file_name()
            .ok_or_else(|| Error::stream_file(path, "batch path has no file name"))?;
        stream::write_batch(&output.join(name), &batch)?;
        debug!(path = %path.display(), records = batch.len(), "Rewrote batch");
    }

    if pending.peek().is_some() {
        warn!("No batches to carry tombstones; nothing written");
    }
    info!(tombstones = written, "Re-inserted deleted posts");
    Ok(written)
}
