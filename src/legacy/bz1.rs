// src/legacy/bz1.rs

//! bz1 shards: a directory of block-compressed record files
//!
//! ```text
//! <shard>/fields.json        measurement -> MeasurementFields
//! <shard>/00000000.bz1       block files, read in name order
//! ```
//!
//! A block file starts with the magic `BZ1\0` followed by records:
//!
//! ```text
//! [key len u16][series key][payload len u32][zstd(payload)]
//! payload = ([timestamp i64][entry len u32][codec payload])*
//! ```
//!
//! All integers are big-endian. A series may appear in any number of records.

use super::codec::{FieldType, MeasurementFields};
use super::{DecodedPoint, ShardReader, runs_by_field};
use crate::error::{Error, Result};
use crate::model::{SeriesKey, Value, ValueRun, measurement_from_series_key};
use fs2::FileExt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FIELDS_FILE: &str = "fields.json";
pub const BLOCK_EXTENSION: &str = "bz1";
pub const BLOCK_MAGIC: &[u8; 4] = b"BZ1\0";

const COMPRESSION_LEVEL: i32 = 3;

/// A block file loaded into memory with a read cursor
struct BlockCursor {
    path: PathBuf,
    data: Vec<u8>,
    offset: usize,
}

impl BlockCursor {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        let end = self.offset.checked_add(n)?;
        let slice = self.data.get(self.offset..end)?;
        self.offset = end;
        Some(slice)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

/// Reader over a bz1 shard directory
pub struct Bz1Reader {
    path: PathBuf,
    lock: Option<File>,
    fields: HashMap<String, MeasurementFields>,
    blocks: Vec<PathBuf>,
    next_block: usize,
    current: Option<BlockCursor>,
    pending: VecDeque<(SeriesKey, ValueRun)>,
    deferred: Option<Error>,
}

impl Bz1Reader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: None,
            fields: HashMap::new(),
            blocks: Vec::new(),
            next_block: 0,
            current: None,
            pending: VecDeque::new(),
            deferred: None,
        }
    }

    fn load_block(&self, path: &Path) -> Result<BlockCursor> {
        let data = fs::read(path).map_err(|e| Error::decode(path, e.to_string()))?;
        if data.len() < BLOCK_MAGIC.len() || &data[..BLOCK_MAGIC.len()] != BLOCK_MAGIC {
            return Err(Error::decode(path, "missing bz1 block magic"));
        }
        Ok(BlockCursor {
            path: path.to_path_buf(),
            data,
            offset: BLOCK_MAGIC.len(),
        })
    }

    /// Decode the next record of the current block into per-field runs
    fn next_record(&self, cursor: &mut BlockCursor) -> Result<Vec<(SeriesKey, ValueRun)>> {
        let block_path = cursor.path.clone();
        let truncated = || Error::decode(&block_path, "truncated record");

        let key_len = u16::from_be_bytes(read_array(cursor).ok_or_else(truncated)?) as usize;
        let key = cursor.take(key_len).ok_or_else(truncated)?;
        let series = std::str::from_utf8(key)
            .map_err(|_| Error::decode(&block_path, "series key is not valid UTF-8"))?
            .to_string();
        let payload_len = u32::from_be_bytes(read_array(cursor).ok_or_else(truncated)?) as usize;
        let compressed = cursor.take(payload_len).ok_or_else(truncated)?;

        let payload = zstd::decode_all(compressed)
            .map_err(|e| Error::decode(&block_path, format!("series {series}: {e}")))?;

        let measurement = measurement_from_series_key(&series);
        let codec = self.fields.get(measurement).ok_or_else(|| {
            Error::decode(
                &block_path,
                format!("no field codec for measurement {measurement} (series {series})"),
            )
        })?;

        let mut points: Vec<DecodedPoint> = Vec::new();
        let mut entries = BlockCursor {
            path: block_path.clone(),
            data: payload,
            offset: 0,
        };
        while entries.remaining() > 0 {
            let bad_entry =
                || Error::decode(&block_path, format!("series {series}: truncated entry"));
            let timestamp = i64::from_be_bytes(read_array(&mut entries).ok_or_else(bad_entry)?);
            let len = u32::from_be_bytes(read_array(&mut entries).ok_or_else(bad_entry)?) as usize;
            let data = entries.take(len).ok_or_else(bad_entry)?;
            let values = codec.decode(data).map_err(|e| {
                Error::decode(&block_path, format!("series {series} at {timestamp}: {e}"))
            })?;
            points.push((timestamp, values));
        }

        Ok(runs_by_field(&series, points))
    }

    /// Load runs from the next record, opening block files as needed
    fn advance(&mut self) -> Result<bool> {
        loop {
            if let Some(mut cursor) = self.current.take() {
                if cursor.remaining() > 0 {
                    let runs = self.next_record(&mut cursor)?;
                    self.current = Some(cursor);
                    self.pending.extend(runs);
                    return Ok(true);
                }
                continue;
            }

            let Some(block) = self.blocks.get(self.next_block).cloned() else {
                return Ok(false);
            };
            self.next_block += 1;
            debug!("Reading bz1 block {}", block.display());
            self.current = Some(self.load_block(&block)?);
        }
    }
}

fn read_array<const N: usize>(cursor: &mut BlockCursor) -> Option<[u8; N]> {
    let bytes = cursor.take(N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Some(out)
}

impl ShardReader for Bz1Reader {
    fn open(&mut self) -> Result<()> {
        if !self.path.is_dir() {
            return Err(Error::open(&self.path, "shard directory does not exist"));
        }

        let fields_path = self.path.join(FIELDS_FILE);
        let lock = File::open(&fields_path).map_err(|e| {
            Error::open(&self.path, format!("not a bz1 shard ({FIELDS_FILE}): {e}"))
        })?;
        lock.try_lock_exclusive().map_err(|e| {
            Error::open(&self.path, format!("shard is locked by another process: {e}"))
        })?;

        let json = fs::read(&fields_path).map_err(|e| Error::open(&self.path, e.to_string()))?;
        let fields: HashMap<String, MeasurementFields> = serde_json::from_slice(&json)
            .map_err(|e| Error::open(&self.path, format!("invalid {FIELDS_FILE}: {e}")))?;

        let mut blocks = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(|e| Error::open(&self.path, e.to_string()))? {
            let entry = entry.map_err(|e| Error::open(&self.path, e.to_string()))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == BLOCK_EXTENSION) {
                blocks.push(path);
            }
        }
        blocks.sort();

        debug!(
            "Opened bz1 shard {} ({} measurements, {} block files)",
            self.path.display(),
            fields.len(),
            blocks.len()
        );

        self.fields = fields;
        self.blocks = blocks;
        self.next_block = 0;
        self.current = None;
        self.lock = Some(lock);
        Ok(())
    }

    fn has_next(&mut self) -> bool {
        while self.pending.is_empty() && self.deferred.is_none() {
            match self.advance() {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => self.deferred = Some(e),
            }
        }
        true
    }

    fn read_next(&mut self) -> Result<(SeriesKey, ValueRun)> {
        if !self.has_next() {
            return Err(Error::decode(&self.path, "read past the end of the shard"));
        }
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        self.pending
            .pop_front()
            .ok_or_else(|| Error::decode(&self.path, "read past the end of the shard"))
    }

    fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.current = None;
        if let Some(lock) = self.lock.take() {
            FileExt::unlock(&lock)?;
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes bz1 shard directories
///
/// Records are buffered into the current block file until
/// [`Bz1Writer::flush_block`] or [`Bz1Writer::finish`].
pub struct Bz1Writer {
    dir: PathBuf,
    fields: BTreeMap<String, MeasurementFields>,
    sequence: u32,
    block: Vec<u8>,
}

impl Bz1Writer {
    /// Create a new bz1 shard directory
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir(&dir)?;
        Ok(Self {
            dir,
            fields: BTreeMap::new(),
            sequence: 0,
            block: Vec::new(),
        })
    }

    /// Append one record for `series` to the current block
    pub fn write_record(
        &mut self,
        series: &str,
        points: &[(i64, Vec<(String, Value)>)],
    ) -> Result<()> {
        let codec = self
            .fields
            .entry(measurement_from_series_key(series).to_string())
            .or_default();

        let mut payload = Vec::new();
        for (timestamp, values) in points {
            for (name, value) in values {
                codec
                    .add(name, FieldType::of(value))
                    .map_err(|e| Error::decode(&self.dir, e.to_string()))?;
            }
            let data = codec
                .encode(values)
                .map_err(|e| Error::decode(&self.dir, e.to_string()))?;
            payload.extend_from_slice(&timestamp.to_be_bytes());
            payload.extend_from_slice(&(data.len() as u32).to_be_bytes());
            payload.extend_from_slice(&data);
        }
        let compressed = zstd::encode_all(&payload[..], COMPRESSION_LEVEL)?;

        if self.block.is_empty() {
            self.block.extend_from_slice(BLOCK_MAGIC);
        }
        let key_len = u16::try_from(series.len())
            .map_err(|_| Error::decode(&self.dir, format!("series key too long: {series}")))?;
        self.block.extend_from_slice(&key_len.to_be_bytes());
        self.block.extend_from_slice(series.as_bytes());
        self.block.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        self.block.extend_from_slice(&compressed);
        Ok(())
    }

    /// Write the buffered records out as a block file
    pub fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let path = self
            .dir
            .join(format!("{:08}.{}", self.sequence, BLOCK_EXTENSION));
        fs::write(&path, &self.block)?;
        self.block.clear();
        self.sequence += 1;
        Ok(())
    }

    /// Flush the last block and write the field codecs
    pub fn finish(mut self) -> Result<()> {
        self.flush_block()?;
        fs::write(self.dir.join(FIELDS_FILE), serde_json::to_vec_pretty(&self.fields)?)?;
        Ok(())
    }
}
