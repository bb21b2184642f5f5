// src/convert/converter.rs
//! Legacy shard to TSM converter
//!
//! Drains a [`ShardReader`] into an in-memory map of series, then writes the
//! series in key order through a size-bounded [`OutputSet`]. Holding a whole
//! shard in memory is acceptable because legacy shards are bounded by the same
//! maximum size the output enforces.

use super::output::{OutputFile, OutputSet};
use crate::error::Result;
use crate::legacy::ShardReader;
use crate::model::{SeriesKey, ValueRun};
use crate::tsm::{MAX_FILE_SIZE, encode_series};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// Options for shard conversion
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    /// Directory receiving the output files
    pub output_dir: PathBuf,
    /// File name prefix, normally the shard id
    pub file_prefix: String,
    /// Size above which a new output file is started
    pub max_file_size: u64,
}

impl ConversionOptions {
    pub fn new(output_dir: impl Into<PathBuf>, file_prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_prefix: file_prefix.into(),
            max_file_size: MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }
}

/// Result of converting one shard
#[derive(Debug, Clone, Default)]
pub struct ConversionResult {
    /// Output files in sequence order
    pub files: Vec<OutputFile>,
    pub series: usize,
    /// Points produced by the reader
    pub points_read: u64,
    /// Points in the output files
    pub points_written: u64,
    /// Points collapsed onto a later point with the same timestamp
    pub duplicates_dropped: u64,
}

impl ConversionResult {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Converts the contents of one legacy shard into TSM files
pub struct ShardConverter {
    options: ConversionOptions,
}

impl ShardConverter {
    pub fn new(options: ConversionOptions) -> Self {
        Self { options }
    }

    /// Drain `reader` and write its series
    ///
    /// The reader must already be open; closing it is left to the caller. On
    /// any error every output file created by this call is deleted.
    pub fn process(&self, reader: &mut dyn ShardReader) -> Result<ConversionResult> {
        let start = Instant::now();
        let (series, points_read) = accumulate(reader)?;
        debug!(
            "Accumulated {} series ({} points) from {}",
            series.len(),
            points_read,
            reader.path().display()
        );

        let mut result = ConversionResult {
            series: series.len(),
            points_read,
            ..Default::default()
        };

        let mut output = OutputSet::new(
            &self.options.output_dir,
            &self.options.file_prefix,
            self.options.max_file_size,
        );
        let written = self
            .write_series(series, &mut output, &mut result)
            .and_then(|()| output.close());
        match written {
            Ok(files) => result.files = files,
            Err(e) => {
                output.discard();
                return Err(e);
            }
        }

        info!(
            "Wrote {} series ({} points, {} duplicates dropped) to {} file(s), {} bytes in {:.2?}",
            result.series,
            result.points_written,
            result.duplicates_dropped,
            result.files.len(),
            result.total_bytes(),
            start.elapsed()
        );
        Ok(result)
    }

    fn write_series(
        &self,
        series: BTreeMap<SeriesKey, ValueRun>,
        output: &mut OutputSet,
        result: &mut ConversionResult,
    ) -> Result<()> {
        for (key, mut points) in series {
            result.duplicates_dropped += sort_and_dedup(&mut points);
            if points.is_empty() {
                continue;
            }
            let encoded = encode_series(&key, &points)?;
            output.write(&encoded)?;
            result.points_written += encoded.point_count();
        }
        Ok(())
    }
}

/// Drain a reader, merging every run of a series into one accumulator
pub fn accumulate(reader: &mut dyn ShardReader) -> Result<(BTreeMap<SeriesKey, ValueRun>, u64)> {
    let mut series: BTreeMap<SeriesKey, ValueRun> = BTreeMap::new();
    let mut points = 0u64;

    while reader.has_next() {
        let (key, mut run) = reader.read_next()?;
        points += run.len() as u64;
        series.entry(key).or_default().append(&mut run);
    }

    Ok((series, points))
}

/// Sort ascending by timestamp; for equal timestamps keep the point read last
///
/// Returns the number of points dropped.
pub fn sort_and_dedup(points: &mut ValueRun) -> u64 {
    let before = points.len();
    // Stable sort keeps read order among equal timestamps
    points.sort_by_key(|p| p.timestamp);

    let mut deduped: ValueRun = Vec::with_capacity(points.len());
    for point in points.drain(..) {
        match deduped.last_mut() {
            Some(last) if last.timestamp == point.timestamp => *last = point,
            _ => deduped.push(point),
        }
    }
    *points = deduped;

    (before - points.len()) as u64
}
