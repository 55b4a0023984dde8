//! Error types for skyseen.
//!
//! This module defines all error types used throughout the skyseen crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for skyseen operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Stream Errors ===
    /// A stream file could not be read or written.
    #[error("stream file {path}: {message}")]
    StreamFile {
        /// Path to the offending file.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    // === Identifier Errors ===
    /// An AT-URI could not be parsed.
    #[error("misformatted URI: {uri:?}")]
    InvalidUri {
        /// The offending URI.
        uri: String,
    },

    /// A TID contained characters outside the base32-sortable alphabet.
    #[error("invalid TID {value:?}")]
    InvalidTid {
        /// The offending TID.
        value: String,
    },

    /// A timestamp could not be parsed.
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp {
        /// The offending timestamp text.
        value: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for skyseen operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a stream file error.
    #[must_use]
    pub fn stream_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StreamFile {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid URI error.
    #[must_use]
    pub fn invalid_uri(uri: impl Into<String>) -> Self {
        Self::InvalidUri { uri: uri.into() }
    }

    /// Create an invalid TID error.
    #[must_use]
    pub fn invalid_tid(value: impl Into<String>) -> Self {
        Self::InvalidTid {
            value: value.into(),
        }
    }

    /// Create an invalid timestamp error.
    #[must_use]
    pub fn invalid_timestamp(value: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
        }
    }
}
