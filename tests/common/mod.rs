// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tsm_migrate::legacy::{B1Writer, Bz1Writer};
use tsm_migrate::{SeriesKey, TsmReader, Value, ValuePoint};

pub const DB: &str = "db0";
pub const RP: &str = "autogen";

/// A temporary data root laid out as `<root>/<db>/<rp>/<shard>`.
///
/// Keep the value alive for as long as the files are needed.
pub struct DataRoot {
    dir: TempDir,
}

impl DataRoot {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Retention policy directory, created on first use
    pub fn rp_dir(&self, db: &str, rp: &str) -> PathBuf {
        let dir = self.path().join(db).join(rp);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn shard_path(&self, db: &str, rp: &str, id: &str) -> PathBuf {
        self.path().join(db).join(rp).join(id)
    }

    /// Write a b1 shard holding float points of field `value`
    pub fn b1_shard(&self, db: &str, rp: &str, id: &str, points: &[(&str, i64, f64)]) -> PathBuf {
        let path = self.rp_dir(db, rp).join(id);
        let mut writer = B1Writer::create(&path).unwrap();
        for (series, ts, v) in points {
            writer
                .write_point(series, *ts, &[("value".to_string(), Value::Float(*v))])
                .unwrap();
        }
        writer.finish().unwrap();
        path
    }

    /// Write a bz1 shard; each entry becomes one record of field `value`
    ///
    /// Every record goes into its own block file so the read order is the
    /// order given here.
    pub fn bz1_shard(
        &self,
        db: &str,
        rp: &str,
        id: &str,
        records: &[(&str, Vec<(i64, Value)>)],
    ) -> PathBuf {
        let path = self.rp_dir(db, rp).join(id);
        let mut writer = Bz1Writer::create(&path).unwrap();
        for (series, points) in records {
            let points: Vec<_> = points
                .iter()
                .map(|(ts, v)| (*ts, vec![("value".to_string(), v.clone())]))
                .collect();
            writer.write_record(series, &points).unwrap();
            writer.flush_block().unwrap();
        }
        writer.finish().unwrap();
        path
    }
}

/// TSM files in a converted shard directory, in name order
pub fn tsm_files(shard: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = fs::read_dir(shard)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "tsm"))
        .collect();
    files.sort();
    files
}

/// Every series in every TSM file of a converted shard
pub fn read_shard(shard: &Path) -> BTreeMap<SeriesKey, Vec<ValuePoint>> {
    let mut series = BTreeMap::new();
    for file in tsm_files(shard) {
        let reader = TsmReader::open(&file).unwrap();
        for key in reader.keys() {
            let points = reader.read_series(key).unwrap().unwrap();
            assert!(
                series.insert(key.clone(), points).is_none(),
                "{key} appears in more than one file"
            );
        }
    }
    series
}

pub fn key(series: &str) -> SeriesKey {
    SeriesKey::for_field(series, "value")
}

/// Float points `(i, i * step)` for `i` in `0..n`
pub fn float_points(n: i64, step: f64) -> Vec<(i64, Value)> {
    (0..n).map(|i| (i, Value::Float(i as f64 * step))).collect()
}
