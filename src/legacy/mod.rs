// src/legacy/mod.rs

//! Readers for legacy shard formats
//!
//! Every legacy layout is exposed through [`ShardReader`], which linearizes
//! the store into `(SeriesKey, ValueRun)` pairs. The concrete reader is picked
//! once, from the format detected at discovery, by [`reader_for`].
//!
//! Neither ordering across series nor ordering within a run is guaranteed;
//! callers sort.

pub mod b1;
pub mod bz1;
pub mod codec;

pub use b1::{B1Reader, B1Writer};
pub use bz1::{Bz1Reader, Bz1Writer};
pub use codec::{CodecError, Field, FieldType, MeasurementFields};

use crate::error::{Error, Result};
use crate::model::{SeriesKey, ShardDescriptor, ShardFormat, Value, ValuePoint, ValueRun};
use std::collections::BTreeMap;
use std::path::Path;

/// Common interface for all legacy shard formats (b1, bz1)
pub trait ShardReader: Send {
    /// Acquire the underlying storage
    ///
    /// Fails with [`Error::Open`] when the shard is missing, locked by
    /// another process, or not a valid instance of the format.
    fn open(&mut self) -> Result<()>;

    /// Whether another `(SeriesKey, ValueRun)` pair remains
    ///
    /// `false` is terminal.
    fn has_next(&mut self) -> bool;

    /// Return the next pair in the reader's natural order
    ///
    /// Decode failures surface here as [`Error::Decode`].
    fn read_next(&mut self) -> Result<(SeriesKey, ValueRun)>;

    /// Release the underlying storage
    fn close(&mut self) -> Result<()>;

    /// Location of the shard being read
    fn path(&self) -> &Path;
}

/// Create the reader matching a shard's detected format
pub fn reader_for(shard: &ShardDescriptor) -> Result<Box<dyn ShardReader>> {
    match shard.format {
        ShardFormat::B1 => Ok(Box::new(B1Reader::new(&shard.path))),
        ShardFormat::Bz1 => Ok(Box::new(Bz1Reader::new(&shard.path))),
        ShardFormat::Tsm1 => Err(Error::open(
            &shard.path,
            format!("unsupported shard format: {}", shard.format),
        )),
    }
}

/// A decoded legacy point: timestamp plus the fields stored at it
pub(crate) type DecodedPoint = (i64, Vec<(String, Value)>);

/// Split decoded points of one series into one run per field
///
/// Fields come out in name order; points keep the order they were read in.
pub(crate) fn runs_by_field(series: &str, points: Vec<DecodedPoint>) -> Vec<(SeriesKey, ValueRun)> {
    let mut by_field: BTreeMap<String, ValueRun> = BTreeMap::new();
    for (timestamp, values) in points {
        for (field, value) in values {
            by_field
                .entry(field)
                .or_default()
                .push(ValuePoint::new(timestamp, value));
        }
    }

    by_field
        .into_iter()
        .map(|(field, run)| (SeriesKey::for_field(series, &field), run))
        .collect()
}
