// src/config.rs
//! Migration settings
//!
//! Settings come from an optional TOML file and are then overridden by
//! command-line flags:
//!
//! ```toml
//! max_file_size = 1073741824
//! databases = ["telegraf", "_internal"]
//! parallelism = 4
//! verify = true
//! ```

use crate::error::{Error, Result};
use crate::tsm::MAX_FILE_SIZE;
use serde::Deserialize;
use std::path::Path;

/// Settings for one migration run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Size above which output rolls over to a new TSM file
    pub max_file_size: u64,

    /// Databases to convert (empty = all)
    pub databases: Vec<String>,

    /// Number of shards converted at once (1 = sequential)
    pub parallelism: usize,

    /// Re-read output files before swapping them into place
    pub verify: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            databases: Vec::new(),
            parallelism: 1,
            verify: true,
        }
    }
}

impl MigrationConfig {
    /// Load settings from a TOML file
    ///
    /// Limits are not checked here; flags may still override the file, and
    /// the merged settings are validated when the migrator is built.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Check limits that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(Error::Config("max_file_size must be greater than 0".to_string()));
        }
        if self.max_file_size > MAX_FILE_SIZE {
            return Err(Error::Config(format!(
                "max_file_size {} exceeds the {} byte ceiling",
                self.max_file_size, MAX_FILE_SIZE
            )));
        }
        if self.parallelism == 0 {
            return Err(Error::Config("parallelism must be at least 1".to_string()));
        }
        if let Some(empty) = self.databases.iter().find(|d| d.trim().is_empty()) {
            return Err(Error::Config(format!("invalid database name {empty:?}")));
        }
        Ok(())
    }
}
