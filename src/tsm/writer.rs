// src/tsm/writer.rs

//! Streaming TSM file writer

use super::encoding::EncodedSeries;
use super::{FOOTER_SIZE, HEADER_SIZE, IndexEntry, MAGIC, VERSION};
use crate::error::{Error, Result};
use crate::model::SeriesKey;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes series to one TSM file in key order
///
/// Nothing is durable until [`TsmWriter::finish`] has written the index and
/// synced the file.
pub struct TsmWriter {
    path: PathBuf,
    file: BufWriter<File>,
    /// Bytes written so far (header and blocks)
    offset: u64,
    index: Vec<IndexEntry>,
    index_len: u64,
}

impl TsmWriter {
    /// Create a new TSM file; an existing file at `path` is an error
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::write(&path, e))?;

        let mut file = BufWriter::new(file);
        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.extend_from_slice(&MAGIC.to_be_bytes());
        header.push(VERSION);
        file.write_all(&header).map_err(|e| Error::write(&path, e))?;

        Ok(Self {
            path,
            file,
            offset: HEADER_SIZE,
            index: Vec::new(),
            index_len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size the file will have if finished now
    pub fn size(&self) -> u64 {
        self.offset + self.index_len + FOOTER_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn series_count(&self) -> usize {
        self.index.len()
    }

    fn last_key(&self) -> Option<&SeriesKey> {
        self.index.last().map(|e| &e.key)
    }

    /// Append all blocks of a series
    ///
    /// Keys must arrive in strictly ascending order.
    pub fn write_series(&mut self, series: &EncodedSeries) -> Result<()> {
        if let Some(last) = self.last_key()
            && *last >= series.key
        {
            return Err(Error::Encode {
                key: series.key.to_string(),
                reason: format!("written after {last}; keys must be ascending"),
            });
        }

        let entry = series.index_entry(self.offset);
        for block in &series.blocks {
            let crc = crc32fast::hash(&block.data);
            self.file
                .write_all(&crc.to_be_bytes())
                .and_then(|()| self.file.write_all(&block.data))
                .map_err(|e| Error::write(&self.path, e))?;
            self.offset += block.stored_len();
        }

        self.index_len += entry.encoded_len();
        self.index.push(entry);
        Ok(())
    }

    /// Write index and footer, flush and sync; returns the final file size
    pub fn finish(mut self) -> Result<u64> {
        let index_offset = self.offset;
        let mut buf = Vec::with_capacity(self.index_len as usize + FOOTER_SIZE as usize);
        for entry in &self.index {
            let key = entry.key.as_str().as_bytes();
            buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
            buf.extend_from_slice(key);
            buf.push(entry.kind.tag());
            buf.extend_from_slice(&(entry.blocks.len() as u16).to_be_bytes());
            for block in &entry.blocks {
                buf.extend_from_slice(&block.min_time.to_be_bytes());
                buf.extend_from_slice(&block.max_time.to_be_bytes());
                buf.extend_from_slice(&block.offset.to_be_bytes());
                buf.extend_from_slice(&block.size.to_be_bytes());
            }
        }
        buf.extend_from_slice(&index_offset.to_be_bytes());

        self.file
            .write_all(&buf)
            .map_err(|e| Error::write(&self.path, e))?;
        let file = self
            .file
            .into_inner()
            .map_err(|e| Error::write(&self.path, e.into_error()))?;
        file.sync_all().map_err(|e| Error::write(&self.path, e))?;

        Ok(index_offset + buf.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Value, ValuePoint};
    use crate::tsm::encode_series;
    use tempfile::TempDir;

    #[test]
    fn test_projected_size_matches_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("1.0.tsm");

        let mut writer = TsmWriter::create(&path).unwrap();
        assert_eq!(writer.size(), crate::tsm::empty_file_size());

        let a = encode_series(
            &SeriesKey::from("a#!~#v"),
            &[ValuePoint::new(1, Value::Float(1.0))],
        )
        .unwrap();
        let b = encode_series(
            &SeriesKey::from("b#!~#v"),
            &[ValuePoint::new(1, Value::String("x".into()))],
        )
        .unwrap();

        let expected = writer.size() + a.encoded_len() + b.encoded_len();
        writer.write_series(&a).unwrap();
        writer.write_series(&b).unwrap();
        assert_eq!(writer.size(), expected);

        let size = writer.finish().unwrap();
        assert_eq!(size, expected);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
    }

    #[test]
    fn test_keys_must_ascend() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = TsmWriter::create(temp_dir.path().join("x.tsm")).unwrap();
        let point = [ValuePoint::new(1, Value::Integer(1))];

        writer
            .write_series(&encode_series(&SeriesKey::from("b"), &point).unwrap())
            .unwrap();
        let err = writer
            .write_series(&encode_series(&SeriesKey::from("a"), &point).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::Encode { .. }));
    }

    #[test]
    fn test_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("x.tsm");
        std::fs::write(&path, b"old").unwrap();
        assert!(matches!(TsmWriter::create(&path), Err(Error::Write { .. })));
    }
}
