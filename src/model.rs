// src/model.rs

//! Record model shared by legacy readers, the converter and the migrator
//!
//! Readers hand the converter `(SeriesKey, ValueRun)` pairs and nothing else;
//! format-specific types never leave the `legacy` module.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};

/// Separator between a legacy series key and a field name
pub const KEY_FIELD_SEPARATOR: &str = "#!~#";

/// Extension of TSM files and of conversion temp outputs
pub const TSM_EXTENSION: &str = "tsm";

/// Suffix of database backup directories
pub const BACKUP_EXTENSION: &str = "bak";

/// Identifier of one series-plus-field value stream within a shard
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey(String);

impl SeriesKey {
    /// Build the key for one field of a legacy series
    pub fn for_field(series: &str, field: &str) -> Self {
        Self(format!("{series}{KEY_FIELD_SEPARATOR}{field}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SeriesKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SeriesKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Return the measurement name of a series key (text before the first comma)
pub fn measurement_from_series_key(key: &str) -> &str {
    match key.find(',') {
        Some(idx) => &key[..idx],
        None => key,
    }
}

/// Kind of value stored in a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Float,
    Integer,
    Boolean,
    String,
}

impl ValueKind {
    /// Block type tag in TSM files
    pub fn tag(self) -> u8 {
        match self {
            Self::Float => 0,
            Self::Integer => 1,
            Self::Boolean => 2,
            Self::String => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Float),
            1 => Some(Self::Integer),
            2 => Some(Self::Boolean),
            3 => Some(Self::String),
            _ => None,
        }
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Float(_) => ValueKind::Float,
            Self::Integer(_) => ValueKind::Integer,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::String(_) => ValueKind::String,
        }
    }
}

/// A timestamped value
#[derive(Debug, Clone, PartialEq)]
pub struct ValuePoint {
    pub timestamp: i64,
    pub value: Value,
}

impl ValuePoint {
    pub fn new(timestamp: i64, value: Value) -> Self {
        Self { timestamp, value }
    }
}

/// Points for one series from a single read step, in reader order
pub type ValueRun = Vec<ValuePoint>;

/// On-disk format of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ShardFormat {
    /// Embedded key-value store in a single file
    B1,
    /// Directory of block-compressed record files
    Bz1,
    /// Already converted
    Tsm1,
}

impl ShardFormat {
    pub fn is_legacy(self) -> bool {
        matches!(self, Self::B1 | Self::Bz1)
    }
}

/// A shard found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub database: String,
    pub retention_policy: String,
    /// Shard directory or file name inside the retention policy
    pub id: String,
    pub path: PathBuf,
    pub format: ShardFormat,
    /// Bytes on disk
    pub size: u64,
}

impl ShardDescriptor {
    /// Sibling path that receives conversion output before the swap
    pub fn temp_path(&self) -> PathBuf {
        temp_path_for(&self.path)
    }
}

/// `<path>.tsm`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(TSM_EXTENSION);
    PathBuf::from(name)
}
