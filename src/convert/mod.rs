// src/convert/mod.rs
//! Shard conversion engine
//!
//! Turns the `(SeriesKey, ValueRun)` stream of a legacy shard reader into one
//! or more size-bounded TSM files.

mod converter;
mod output;

pub use converter::{
    ConversionOptions, ConversionResult, ShardConverter, accumulate, sort_and_dedup,
};
pub use output::{OutputFile, output_file_path};
