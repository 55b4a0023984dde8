//! `skyseen` - Reconstructing what Bluesky users have seen
//!
//! This library replays an archived Bluesky firehose in record-key order,
//! rebuilds each user's chronological Following feed, and predicts which
//! posts they were shown from the actions they took. Predictions are kept in
//! a `SQLite` seen store and scored against likes and reposts.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod aturi;
pub mod cli;
pub mod config;
pub mod deleted;
pub mod error;
pub mod evaluate;
pub mod logging;
pub mod prepare;
pub mod record;
pub mod reorder;
pub mod simulate;
pub mod storage;
pub mod stream;
pub mod tid;

pub use config::Config;
pub use error::{Error, Result};
pub use evaluate::{evaluate, Summary};
pub use logging::init_logging;
pub use record::{Record, RecordBody};
pub use simulate::{Session, Simulator, View};
pub use storage::{Storage, StorageStats};
