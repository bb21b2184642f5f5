// src/error.rs

//! Error types for shard migration
//!
//! Variants follow the failure points of a migration run: discovery, opening
//! a legacy shard, decoding its records, encoding/writing TSM output, the
//! backup precondition and the final directory swap.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating shards
#[derive(Error, Debug)]
pub enum Error {
    /// Data root, database or retention policy could not be enumerated
    #[error("failed to discover shards under {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    /// Legacy shard could not be opened as its detected format
    #[error("failed to open {path} for conversion: {reason}")]
    Open { path: PathBuf, reason: String },

    /// A record inside an opened shard could not be decoded
    #[error("failed to decode record in {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// Series data could not be encoded into TSM blocks
    #[error("failed to encode series {key}: {reason}")]
    Encode { key: String, reason: String },

    /// Writing or finalizing a TSM file failed
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A backup of the database already exists
    #[error("backup of database {database} already exists at {path}")]
    BackupExists { database: String, path: PathBuf },

    /// Copying the database directory to its backup failed
    #[error("backup of database {database} failed: {reason}")]
    Backup { database: String, reason: String },

    /// Original shard removal or temp output rename failed after conversion
    #[error(
        "swap of {original} failed: {reason}; converted data is at {temp}, move it into place manually"
    )]
    Swap {
        original: PathBuf,
        temp: PathBuf,
        reason: String,
    },

    /// Temp output from an earlier run sits next to the untouched shard
    #[error("stale conversion output {temp} exists next to {original}; inspect and remove it before retrying")]
    StaleOutput { original: PathBuf, temp: PathBuf },

    /// Original shard is gone but its converted output was never renamed
    #[error("interrupted swap detected: {original} is missing but converted data exists at {temp}; rename it into place")]
    InterruptedSwap { original: PathBuf, temp: PathBuf },

    /// Destructive work was requested without confirmation
    #[error("conversion not confirmed")]
    NotConfirmed,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedded store error
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Create a decode error for a shard path
    pub fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an open error for a shard path
    pub fn open(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Open {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a write error for an output path
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Errors after which data may only exist outside the live shard path
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Swap { .. } | Self::InterruptedSwap { .. })
    }
}
