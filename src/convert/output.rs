// src/convert/output.rs

//! Size-bounded set of output files for one shard

use crate::error::Result;
use crate::tsm::{EncodedSeries, TsmWriter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A finished output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub size: u64,
    pub sequence: u32,
}

/// Rolls series over into numbered TSM files
///
/// A file is closed and the next one opened when the incoming series would
/// push it over `max_file_size`, unless the file is still empty: a series is
/// never split, so a single oversized series gets a file of its own.
pub(crate) struct OutputSet {
    dir: PathBuf,
    prefix: String,
    max_file_size: u64,
    current: Option<(u32, TsmWriter)>,
    next_sequence: u32,
    created: Vec<PathBuf>,
    finished: Vec<OutputFile>,
}

impl OutputSet {
    pub(crate) fn new(dir: &Path, prefix: &str, max_file_size: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            max_file_size,
            current: None,
            next_sequence: 0,
            created: Vec::new(),
            finished: Vec::new(),
        }
    }

    fn path_for(&self, sequence: u32) -> PathBuf {
        output_file_path(&self.dir, &self.prefix, sequence)
    }

    pub(crate) fn write(&mut self, series: &EncodedSeries) -> Result<()> {
        let needs_rollover = self.current.as_ref().is_some_and(|(_, writer)| {
            !writer.is_empty() && writer.size() + series.encoded_len() > self.max_file_size
        });
        if needs_rollover {
            self.close_current()?;
        }

        let (sequence, mut writer) = match self.current.take() {
            Some(current) => current,
            None => self.open_next()?,
        };
        if writer.is_empty() && writer.size() + series.encoded_len() > self.max_file_size {
            warn!(
                "Series {} alone needs {} bytes, over the {} byte limit; writing it to {} anyway",
                series.key,
                writer.size() + series.encoded_len(),
                self.max_file_size,
                writer.path().display()
            );
        }
        let written = writer.write_series(series);
        self.current = Some((sequence, writer));
        written
    }

    fn open_next(&mut self) -> Result<(u32, TsmWriter)> {
        let sequence = self.next_sequence;
        let path = self.path_for(sequence);
        debug!("Opening output file {}", path.display());
        self.created.push(path.clone());
        let writer = TsmWriter::create(path)?;
        self.next_sequence += 1;
        Ok((sequence, writer))
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some((sequence, writer)) = self.current.take() {
            let path = writer.path().to_path_buf();
            let series = writer.series_count();
            let size = writer.finish()?;
            info!(
                "Closed output file {} ({} series, {} bytes)",
                path.display(),
                series,
                size
            );
            self.finished.push(OutputFile {
                path,
                size,
                sequence,
            });
        }
        Ok(())
    }

    /// Finish the last file and return every file in sequence order
    pub(crate) fn close(&mut self) -> Result<Vec<OutputFile>> {
        self.close_current()?;
        Ok(std::mem::take(&mut self.finished))
    }

    /// Delete every file this set created
    pub(crate) fn discard(&mut self) {
        self.current = None;
        self.finished.clear();
        for path in self.created.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed partial output {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
            }
        }
    }
}

/// `<dir>/<prefix>.<sequence>.tsm`
pub fn output_file_path(dir: &Path, prefix: &str, sequence: u32) -> PathBuf {
    dir.join(format!("{prefix}.{sequence}.{}", crate::model::TSM_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SeriesKey, Value, ValuePoint};
    use crate::tsm::{empty_file_size, encode_series};
    use tempfile::TempDir;

    fn series(key: &str, n: i64) -> EncodedSeries {
        let points: Vec<_> = (0..n)
            .map(|i| ValuePoint::new(i, Value::Integer(i * 7919)))
            .collect();
        encode_series(&SeriesKey::from(key), &points).unwrap()
    }

    #[test]
    fn test_output_file_path() {
        assert_eq!(
            output_file_path(Path::new("/d/rp/1.tsm"), "1", 3),
            PathBuf::from("/d/rp/1.tsm/1.3.tsm")
        );
    }

    #[test]
    fn test_rollover_on_limit() {
        let temp_dir = TempDir::new().unwrap();
        let a = series("a", 50);
        let b = series("b", 50);
        let max = empty_file_size() + a.encoded_len() + b.encoded_len() - 1;

        let mut set = OutputSet::new(temp_dir.path(), "7", max);
        set.write(&a).unwrap();
        set.write(&b).unwrap();
        let files = set.close().unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].sequence, 0);
        assert_eq!(files[1].sequence, 1);
        assert!(files.iter().all(|f| f.size <= max));
    }

    #[test]
    fn test_oversized_series_written_alone() {
        let temp_dir = TempDir::new().unwrap();
        let small = series("a", 1);
        let big = series("b", 500);
        let max = empty_file_size() + small.encoded_len();

        let mut set = OutputSet::new(temp_dir.path(), "7", max);
        set.write(&small).unwrap();
        set.write(&big).unwrap();
        let files = set.close().unwrap();

        assert_eq!(files.len(), 2);
        assert!(files[0].size <= max);
        assert!(files[1].size > max);
    }

    #[test]
    fn test_discard_removes_all_files() {
        let temp_dir = TempDir::new().unwrap();
        let a = series("a", 10);
        let max = empty_file_size() + a.encoded_len();

        let mut set = OutputSet::new(temp_dir.path(), "7", max);
        set.write(&a).unwrap();
        set.write(&series("b", 10)).unwrap();
        set.discard();

        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
