// src/tsm/reader.rs

//! TSM file reader used to verify converted output

use super::encoding::decode_block;
use super::{
    BlockMeta, FOOTER_SIZE, HEADER_SIZE, INDEX_BLOCK_ENTRY_SIZE, IndexEntry, MAGIC, VERSION,
};
use crate::error::{Error, Result};
use crate::model::{SeriesKey, ValueKind, ValuePoint};
use std::fs;
use std::path::PathBuf;

/// In-memory view of a finished TSM file
pub struct TsmReader {
    path: PathBuf,
    data: Vec<u8>,
    index: Vec<IndexEntry>,
}

impl TsmReader {
    /// Load a TSM file and parse its index
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = fs::read(&path)?;
        let index = parse_index(&data).map_err(|reason| Error::decode(&path, reason))?;
        Ok(Self { path, data, index })
    }

    /// Index entries in key order
    pub fn entries(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.index.iter().map(|e| &e.key)
    }

    /// All points of a series, or `None` when the file does not hold it
    pub fn read_series(&self, key: &SeriesKey) -> Result<Option<Vec<ValuePoint>>> {
        let Ok(pos) = self.index.binary_search_by(|e| e.key.cmp(key)) else {
            return Ok(None);
        };
        let entry = &self.index[pos];

        let mut points = Vec::new();
        for block in &entry.blocks {
            let (kind, mut decoded) = self.read_block(block)?;
            if kind != entry.kind {
                return Err(Error::decode(
                    &self.path,
                    format!("{key}: block type {kind} does not match index type {}", entry.kind),
                ));
            }
            points.append(&mut decoded);
        }
        Ok(Some(points))
    }

    fn read_block(&self, block: &BlockMeta) -> Result<(ValueKind, Vec<ValuePoint>)> {
        let start = block.offset as usize;
        let raw = start
            .checked_add(block.size as usize)
            .and_then(|end| self.data.get(start..end))
            .filter(|raw| raw.len() >= 4)
            .ok_or_else(|| Error::decode(&self.path, format!("block at {start} out of bounds")))?;

        let (crc, body) = raw.split_at(4);
        let expected = u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if crc32fast::hash(body) != expected {
            return Err(Error::decode(&self.path, format!("checksum mismatch in block at {start}")));
        }
        decode_block(body).map_err(|reason| Error::decode(&self.path, reason))
    }

    /// Total points across all series
    pub fn point_count(&self) -> Result<u64> {
        let mut total = 0;
        for entry in &self.index {
            for block in &entry.blocks {
                total += self.read_block(block)?.1.len() as u64;
            }
        }
        Ok(total)
    }
}

fn parse_index(data: &[u8]) -> std::result::Result<Vec<IndexEntry>, String> {
    if (data.len() as u64) < HEADER_SIZE + FOOTER_SIZE {
        return Err("file too small".to_string());
    }
    if data[..4] != MAGIC.to_be_bytes() {
        return Err("bad magic number".to_string());
    }
    if data[4] != VERSION {
        return Err(format!("unsupported version {}", data[4]));
    }

    let footer_start = data.len() - FOOTER_SIZE as usize;
    let index_offset = be_u64(&data[footer_start..]) as usize;
    if index_offset < HEADER_SIZE as usize || index_offset > footer_start {
        return Err(format!("index offset {index_offset} out of bounds"));
    }

    let mut buf = &data[index_offset..footer_start];
    let mut index: Vec<IndexEntry> = Vec::new();
    while !buf.is_empty() {
        let truncated = || "truncated index".to_string();
        let key_len = be_u16(buf.get(..2).ok_or_else(truncated)?) as usize;
        let key = buf.get(2..2 + key_len).ok_or_else(truncated)?;
        let key = std::str::from_utf8(key).map_err(|_| "index key is not valid UTF-8".to_string())?;
        let mut pos = 2 + key_len;

        let tag = *buf.get(pos).ok_or_else(truncated)?;
        let kind = ValueKind::from_tag(tag).ok_or_else(|| format!("unknown block type {tag}"))?;
        let count = be_u16(buf.get(pos + 1..pos + 3).ok_or_else(truncated)?) as usize;
        pos += 3;

        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = buf
                .get(pos..pos + INDEX_BLOCK_ENTRY_SIZE as usize)
                .ok_or_else(truncated)?;
            blocks.push(BlockMeta {
                min_time: be_u64(&raw[0..8]) as i64,
                max_time: be_u64(&raw[8..16]) as i64,
                offset: be_u64(&raw[16..24]),
                size: u32::from_be_bytes([raw[24], raw[25], raw[26], raw[27]]),
            });
            pos += INDEX_BLOCK_ENTRY_SIZE as usize;
        }

        let key = SeriesKey::from(key);
        if index.last().is_some_and(|prev| prev.key >= key) {
            return Err(format!("index keys out of order at {key}"));
        }
        index.push(IndexEntry { key, kind, blocks });
        buf = &buf[pos..];
    }

    Ok(index)
}

fn be_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn be_u64(b: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[..8]);
    u64::from_be_bytes(raw)
}
