// src/lib.rs

//! Legacy shard to TSM migration
//!
//! Converts time-series shards stored in the deprecated `b1` (embedded
//! key-value store) and `bz1` (block-compressed) layouts into size-bounded
//! TSM files, swapping each converted shard into place.
//!
//! # Architecture
//!
//! - `discovery`: walks `<root>/<db>/<rp>/<shard>` and classifies formats
//! - `legacy`: one `ShardReader` per legacy format
//! - `convert`: sorts, de-duplicates and writes series into TSM files
//! - `migrate`: backups, per-shard conversion and the atomic swap

pub mod backup;
pub mod config;
pub mod convert;
pub mod discovery;
mod error;
pub mod legacy;
pub mod migrate;
pub mod model;
pub mod progress;
pub mod tsm;

pub use config::MigrationConfig;
pub use convert::{ConversionOptions, ConversionResult, ShardConverter};
pub use discovery::{Inventory, Leftover, discover};
pub use error::{Error, Result};
pub use legacy::{ShardReader, reader_for};
pub use migrate::{MigrationPlan, MigrationReport, Migrator, ShardOutcome};
pub use model::{SeriesKey, ShardDescriptor, ShardFormat, Value, ValueKind, ValuePoint, ValueRun};
pub use progress::{LogProgress, ProgressTracker, SilentProgress};
pub use tsm::{TsmReader, TsmWriter};
