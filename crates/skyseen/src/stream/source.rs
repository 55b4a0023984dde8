//! Record sources feeding the simulator.
//!
//! A source pushes records through a bounded channel so that reading and
//! decoding run on a blocking thread while the consumer works on the async
//! side. Sources can be asked to stop early through a [`SourceHandle`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::Record;

use super::BatchReader;

/// A cloneable stop signal shared between a source and its controller.
#[derive(Debug, Clone, Default)]
pub struct SourceHandle {
    stop_signal: Arc<AtomicBool>,
    sent: Arc<AtomicU64>,
}

impl SourceHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the source to stop.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Records sent so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }
}

/// A producer of time-ordered records.
#[async_trait::async_trait]
pub trait RecordSource: Send {
    /// Name of this source, for logging.
    fn name(&self) -> &'static str;

    /// Handle that stops this source.
    fn handle(&self) -> SourceHandle;

    /// Send every record through `tx` until exhausted, stopped, or the
    /// receiver is dropped. Returns the number of records sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data cannot be read.
    async fn run(&mut self, tx: mpsc::Sender<Record>) -> Result<u64>;
}

/// Replays an ordered batch directory.
#[derive(Debug)]
pub struct BatchDirSource {
    dir: PathBuf,
    end_ms: Option<i64>,
    handle: SourceHandle,
}

impl BatchDirSource {
    /// Create a source over the batches in `dir`, ending before `end_ms`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, end_ms: Option<i64>) -> Self {
        Self {
            dir: dir.into(),
            end_ms,
            handle: SourceHandle::new(),
        }
    }
}

#[async_trait::async_trait]
impl RecordSource for BatchDirSource {
    fn name(&self) -> &'static str {
        "batch-dir"
    }

    fn handle(&self) -> SourceHandle {
        self.handle.clone()
    }

    async fn run(&mut self, tx: mpsc::Sender<Record>) -> Result<u64> {
        let dir = self.dir.clone();
        let end_ms = self.end_ms;
        let handle = self.handle.clone();

        let task = tokio::task::spawn_blocking(move || -> Result<u64> {
            let reader: BatchReader<Record> = BatchReader::open(&dir, end_ms)?;
            for record in reader {
                if handle.should_stop() {
                    info!("Record source stopped early");
                    break;
                }
                if tx.blocking_send(record?).is_err() {
                    debug!("Record receiver dropped");
                    break;
                }
                handle.record_sent();
            }
            Ok(handle.sent())
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Record reader task failed");
                Err(Error::internal(format!("record reader task failed: {e}")))
            }
        }
    }
}
