// src/tsm/encoding.rs

//! Block encoding for TSM files
//!
//! Block data is `[type u8][zstd(payload)]`. The payload holds the point
//! count, the timestamps (first value then deltas, zigzag varints) and the
//! values: floats as 8-byte bit patterns, integers as zigzag varints,
//! booleans bit-packed, strings as varint length plus bytes.

use super::{BlockMeta, IndexEntry, MAX_POINTS_PER_BLOCK, index_entry_len};
use crate::error::{Error, Result};
use crate::model::{SeriesKey, Value, ValueKind, ValuePoint};

const BLOCK_COMPRESSION_LEVEL: i32 = 3;

/// One encoded block ready to be written
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    pub min_time: i64,
    pub max_time: i64,
    pub count: usize,
    /// Block data without the CRC
    pub data: Vec<u8>,
}

impl EncodedBlock {
    /// Bytes on disk, including the CRC
    pub fn stored_len(&self) -> u64 {
        4 + self.data.len() as u64
    }
}

/// All blocks of one series
#[derive(Debug, Clone)]
pub struct EncodedSeries {
    pub key: SeriesKey,
    pub kind: ValueKind,
    pub blocks: Vec<EncodedBlock>,
}

impl EncodedSeries {
    /// Exact number of bytes this series adds to a TSM file (blocks and index entry)
    pub fn encoded_len(&self) -> u64 {
        self.blocks.iter().map(EncodedBlock::stored_len).sum::<u64>()
            + index_entry_len(self.key.as_str().len(), self.blocks.len())
    }

    pub fn point_count(&self) -> u64 {
        self.blocks.iter().map(|b| b.count as u64).sum()
    }

    /// Index entry for this series once its first block lands at `offset`
    pub(crate) fn index_entry(&self, mut offset: u64) -> IndexEntry {
        let blocks = self
            .blocks
            .iter()
            .map(|b| {
                let meta = BlockMeta {
                    min_time: b.min_time,
                    max_time: b.max_time,
                    offset,
                    size: b.stored_len() as u32,
                };
                offset += b.stored_len();
                meta
            })
            .collect();
        IndexEntry {
            key: self.key.clone(),
            kind: self.kind,
            blocks,
        }
    }
}

/// Encode the sorted, de-duplicated points of one series
///
/// Fails when points mix value kinds, are not strictly ascending in time, or
/// the series does not fit the index limits.
pub fn encode_series(key: &SeriesKey, points: &[ValuePoint]) -> Result<EncodedSeries> {
    let encode_err = |reason: String| Error::Encode {
        key: key.to_string(),
        reason,
    };

    let first = points
        .first()
        .ok_or_else(|| encode_err("series has no points".to_string()))?;
    let kind = first.value.kind();

    if u16::try_from(key.as_str().len()).is_err() {
        return Err(encode_err("key longer than 65535 bytes".to_string()));
    }
    if let Some(p) = points.iter().find(|p| p.value.kind() != kind) {
        return Err(encode_err(format!(
            "mixed value kinds: {} and {} at {}",
            kind,
            p.value.kind(),
            p.timestamp
        )));
    }
    if let Some(w) = points.windows(2).find(|w| w[0].timestamp >= w[1].timestamp) {
        return Err(encode_err(format!(
            "timestamps not strictly ascending: {} then {}",
            w[0].timestamp, w[1].timestamp
        )));
    }

    let mut blocks = Vec::with_capacity(points.len().div_ceil(MAX_POINTS_PER_BLOCK));
    for chunk in points.chunks(MAX_POINTS_PER_BLOCK) {
        let data = encode_block(kind, chunk).map_err(|e| encode_err(e.to_string()))?;
        blocks.push(EncodedBlock {
            min_time: chunk[0].timestamp,
            max_time: chunk[chunk.len() - 1].timestamp,
            count: chunk.len(),
            data,
        });
    }
    if u16::try_from(blocks.len()).is_err() {
        return Err(encode_err(format!("{} blocks exceed the index limit", blocks.len())));
    }

    Ok(EncodedSeries {
        key: key.clone(),
        kind,
        blocks,
    })
}

fn encode_block(kind: ValueKind, points: &[ValuePoint]) -> std::io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    put_uvarint(&mut payload, points.len() as u64);

    let mut prev = 0i64;
    for (i, p) in points.iter().enumerate() {
        let delta = if i == 0 {
            p.timestamp
        } else {
            p.timestamp.wrapping_sub(prev)
        };
        put_uvarint(&mut payload, zigzag(delta));
        prev = p.timestamp;
    }

    let mismatch = |p: &ValuePoint| {
        std::io::Error::other(format!(
            "{} value at {} in a {kind} block",
            p.value.kind(),
            p.timestamp
        ))
    };
    match kind {
        ValueKind::Boolean => {
            let mut packed = vec![0u8; points.len().div_ceil(8)];
            for (i, p) in points.iter().enumerate() {
                let Value::Boolean(bit) = p.value else {
                    return Err(mismatch(p));
                };
                if bit {
                    packed[i / 8] |= 1 << (i % 8);
                }
            }
            payload.extend_from_slice(&packed);
        }
        ValueKind::Float => {
            for p in points {
                let Value::Float(v) = p.value else {
                    return Err(mismatch(p));
                };
                payload.extend_from_slice(&v.to_bits().to_be_bytes());
            }
        }
        ValueKind::Integer => {
            for p in points {
                let Value::Integer(v) = p.value else {
                    return Err(mismatch(p));
                };
                put_uvarint(&mut payload, zigzag(v));
            }
        }
        ValueKind::String => {
            for p in points {
                let Value::String(s) = &p.value else {
                    return Err(mismatch(p));
                };
                put_uvarint(&mut payload, s.len() as u64);
                payload.extend_from_slice(s.as_bytes());
            }
        }
    }

    let mut data = vec![kind.tag()];
    data.extend(zstd::encode_all(&payload[..], BLOCK_COMPRESSION_LEVEL)?);
    Ok(data)
}

/// Decode block data (without CRC) into its value kind and points
pub fn decode_block(data: &[u8]) -> std::result::Result<(ValueKind, Vec<ValuePoint>), String> {
    let (&tag, compressed) = data.split_first().ok_or("empty block")?;
    let kind = ValueKind::from_tag(tag).ok_or_else(|| format!("unknown block type {tag}"))?;
    let payload = zstd::decode_all(compressed).map_err(|e| e.to_string())?;

    let mut pos = 0;
    let count = get_uvarint(&payload, &mut pos).ok_or("truncated point count")? as usize;
    if count > MAX_POINTS_PER_BLOCK {
        return Err(format!("block claims {count} points"));
    }

    let mut timestamps = Vec::with_capacity(count);
    let mut prev = 0i64;
    for i in 0..count {
        let delta = unzigzag(get_uvarint(&payload, &mut pos).ok_or("truncated timestamps")?);
        let ts = if i == 0 { delta } else { prev.wrapping_add(delta) };
        timestamps.push(ts);
        prev = ts;
    }

    let mut points = Vec::with_capacity(count);
    match kind {
        ValueKind::Boolean => {
            let packed = payload
                .get(pos..pos + count.div_ceil(8))
                .ok_or("truncated boolean values")?;
            for (i, ts) in timestamps.into_iter().enumerate() {
                let bit = packed[i / 8] & (1 << (i % 8)) != 0;
                points.push(ValuePoint::new(ts, Value::Boolean(bit)));
            }
        }
        ValueKind::Float => {
            for ts in timestamps {
                let bytes = payload.get(pos..pos + 8).ok_or("truncated float values")?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                pos += 8;
                let v = f64::from_bits(u64::from_be_bytes(raw));
                points.push(ValuePoint::new(ts, Value::Float(v)));
            }
        }
        ValueKind::Integer => {
            for ts in timestamps {
                let raw = get_uvarint(&payload, &mut pos).ok_or("truncated integer values")?;
                let v = unzigzag(raw);
                points.push(ValuePoint::new(ts, Value::Integer(v)));
            }
        }
        ValueKind::String => {
            for ts in timestamps {
                let len =
                    get_uvarint(&payload, &mut pos).ok_or("truncated string length")? as usize;
                let raw = payload
                    .get(pos..pos.saturating_add(len))
                    .ok_or("truncated string value")?;
                pos += len;
                let s = std::str::from_utf8(raw).map_err(|_| "string value is not valid UTF-8")?;
                points.push(ValuePoint::new(ts, Value::String(s.to_string())));
            }
        }
    }

    Ok((kind, points))
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn get_uvarint(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result = 0u64;
    let mut shift = 0;
    loop {
        let byte = *buf.get(*pos)?;
        *pos += 1;
        if shift >= 64 {
            return None;
        }
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
    }
}
