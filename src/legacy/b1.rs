// src/legacy/b1.rs

//! b1 shards: a single-file embedded key-value store
//!
//! The file is a SQLite database used only as a bucketed key-value store
//! (`kv(bucket, key, value)`, ordered by raw key bytes). Buckets:
//!
//! - `meta`: `format` -> `b1`
//! - `fields`: measurement name -> JSON [`MeasurementFields`]
//! - `series`: series key -> empty value, one row per series
//! - `s/<series key>`: 8-byte big-endian timestamp -> codec payload

use super::codec::{FieldType, MeasurementFields};
use super::{DecodedPoint, ShardReader, runs_by_field};
use crate::error::{Error, Result};
use crate::model::{SeriesKey, Value, ValueRun, measurement_from_series_key};
use fs2::FileExt;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const FORMAT_NAME: &str = "b1";

const META_BUCKET: &str = "meta";
const FIELDS_BUCKET: &str = "fields";
const SERIES_BUCKET: &str = "series";
const FORMAT_KEY: &[u8] = b"format";
const POINTS_BUCKET_PREFIX: &str = "s/";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    bucket TEXT NOT NULL,
    key BLOB NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (bucket, key)
) WITHOUT ROWID";

fn points_bucket(series: &str) -> String {
    format!("{POINTS_BUCKET_PREFIX}{series}")
}

/// Reader over a b1 shard file
pub struct B1Reader {
    path: PathBuf,
    conn: Option<Connection>,
    lock: Option<File>,
    fields: HashMap<String, MeasurementFields>,
    series: Vec<String>,
    next_series: usize,
    pending: VecDeque<(SeriesKey, ValueRun)>,
    deferred: Option<Error>,
}

impl B1Reader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
            lock: None,
            fields: HashMap::new(),
            series: Vec::new(),
            next_series: 0,
            pending: VecDeque::new(),
            deferred: None,
        }
    }

    fn open_store(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(1))?;
        Ok(conn)
    }

    fn load_series(&self, conn: &Connection, series: &str) -> Result<Vec<(SeriesKey, ValueRun)>> {
        let measurement = measurement_from_series_key(series);
        let codec = self.fields.get(measurement).ok_or_else(|| {
            Error::decode(
                &self.path,
                format!("no field codec for measurement {measurement} (series {series})"),
            )
        })?;

        let store_err =
            |e: rusqlite::Error| Error::decode(&self.path, format!("series {series}: {e}"));
        let mut stmt = conn
            .prepare_cached("SELECT key, value FROM kv WHERE bucket = ?1 ORDER BY key")
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![points_bucket(series)], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(store_err)?;

        let mut points: Vec<DecodedPoint> = Vec::new();
        for row in rows {
            let (key, value) = row.map_err(store_err)?;
            let key: [u8; 8] = key.as_slice().try_into().map_err(|_| {
                Error::decode(
                    &self.path,
                    format!("series {series}: timestamp key has {} bytes, expected 8", key.len()),
                )
            })?;
            let timestamp = u64::from_be_bytes(key) as i64;
            let values = codec.decode(&value).map_err(|e| {
                Error::decode(&self.path, format!("series {series} at {timestamp}: {e}"))
            })?;
            points.push((timestamp, values));
        }

        debug!("Read {} points for series {}", points.len(), series);
        Ok(runs_by_field(series, points))
    }
}

impl ShardReader for B1Reader {
    fn open(&mut self) -> Result<()> {
        if !self.path.is_file() {
            return Err(Error::open(&self.path, "shard file does not exist"));
        }

        let lock = File::open(&self.path).map_err(|e| Error::open(&self.path, e.to_string()))?;
        lock.try_lock_exclusive().map_err(|e| {
            Error::open(&self.path, format!("shard is locked by another process: {e}"))
        })?;

        let conn = self
            .open_store()
            .map_err(|e| Error::open(&self.path, e.to_string()))?;

        let format: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM kv WHERE bucket = ?1 AND key = ?2",
                params![META_BUCKET, FORMAT_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::open(&self.path, format!("not a b1 shard: {e}")))?;
        if format.as_deref() != Some(FORMAT_NAME.as_bytes()) {
            return Err(Error::open(
                &self.path,
                "not a b1 shard: missing or wrong format marker",
            ));
        }

        let mut fields = HashMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT key, value FROM kv WHERE bucket = ?1")
                .map_err(|e| Error::open(&self.path, e.to_string()))?;
            let rows = stmt
                .query_map(params![FIELDS_BUCKET], |row| {
                    Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(|e| Error::open(&self.path, e.to_string()))?;
            for row in rows {
                let (name, json) = row.map_err(|e| Error::open(&self.path, e.to_string()))?;
                let name = String::from_utf8_lossy(&name).into_owned();
                let codec: MeasurementFields = serde_json::from_slice(&json).map_err(|e| {
                    Error::open(&self.path, format!("invalid field codec for {name}: {e}"))
                })?;
                fields.insert(name, codec);
            }
        }

        let mut series = Vec::new();
        {
            let mut stmt = conn
                .prepare("SELECT key FROM kv WHERE bucket = ?1 ORDER BY key")
                .map_err(|e| Error::open(&self.path, e.to_string()))?;
            let rows = stmt
                .query_map(params![SERIES_BUCKET], |row| row.get::<_, Vec<u8>>(0))
                .map_err(|e| Error::open(&self.path, e.to_string()))?;
            for row in rows {
                let key = row.map_err(|e| Error::open(&self.path, e.to_string()))?;
                let key = String::from_utf8(key)
                    .map_err(|_| Error::open(&self.path, "series key is not valid UTF-8"))?;
                series.push(key);
            }
        }

        debug!(
            "Opened b1 shard {} ({} measurements, {} series)",
            self.path.display(),
            fields.len(),
            series.len()
        );

        self.fields = fields;
        self.series = series;
        self.next_series = 0;
        self.conn = Some(conn);
        self.lock = Some(lock);
        Ok(())
    }

    fn has_next(&mut self) -> bool {
        loop {
            if !self.pending.is_empty() || self.deferred.is_some() {
                return true;
            }
            if self.next_series >= self.series.len() {
                return false;
            }
            let Some(conn) = self.conn.as_ref() else {
                return false;
            };

            let series = self.series[self.next_series].clone();
            self.next_series += 1;
            match self.load_series(conn, &series) {
                Ok(runs) => self.pending.extend(runs),
                Err(e) => self.deferred = Some(e),
            }
        }
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
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| Error::Sqlite(e))?;
        }
        if let Some(lock) = self.lock.take() {
            FileExt::unlock(&lock)?;
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes b1 shard files
///
/// Used to build fixture shards; points written to the same series and
/// timestamp replace each other, as in the original store.
pub struct B1Writer {
    path: PathBuf,
    conn: Connection,
    fields: BTreeMap<String, MeasurementFields>,
}

impl B1Writer {
    /// Create a new b1 shard file at `path`
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch("BEGIN")?;
        conn.execute(
            "INSERT INTO kv (bucket, key, value) VALUES (?1, ?2, ?3)",
            params![META_BUCKET, FORMAT_KEY, FORMAT_NAME.as_bytes()],
        )?;

        Ok(Self {
            path,
            conn,
            fields: BTreeMap::new(),
        })
    }

    /// Store the field values of `series` at `timestamp`
    pub fn write_point(
        &mut self,
        series: &str,
        timestamp: i64,
        values: &[(String, Value)],
    ) -> Result<()> {
        let codec = self
            .fields
            .entry(measurement_from_series_key(series).to_string())
            .or_default();
        for (name, value) in values {
            codec
                .add(name, FieldType::of(value))
                .map_err(|e| Error::decode(&self.path, e.to_string()))?;
        }
        let payload = codec
            .encode(values)
            .map_err(|e| Error::decode(&self.path, e.to_string()))?;

        self.conn.execute(
            "INSERT OR IGNORE INTO kv (bucket, key, value) VALUES (?1, ?2, x'')",
            params![SERIES_BUCKET, series.as_bytes()],
        )?;
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (bucket, key, value) VALUES (?1, ?2, ?3)",
            params![points_bucket(series), (timestamp as u64).to_be_bytes(), payload],
        )?;
        Ok(())
    }

    /// Persist field codecs and close the file
    pub fn finish(self) -> Result<()> {
        for (measurement, codec) in &self.fields {
            self.conn.execute(
                "INSERT OR REPLACE INTO kv (bucket, key, value) VALUES (?1, ?2, ?3)",
                params![FIELDS_BUCKET, measurement.as_bytes(), serde_json::to_vec(codec)?],
            )?;
        }
        self.conn.execute_batch("COMMIT")?;
        self.conn.close().map_err(|(_, e)| Error::Sqlite(e))?;
        Ok(())
    }
}
