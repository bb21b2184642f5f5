// src/discovery.rs

//! Shard discovery under a data root
//!
//! Layout: `<data-root>/<database>/<retention-policy>/<shard-id>`. A shard is
//! either a single b1 store file or a directory (bz1 blocks, or TSM files once
//! converted). Database directories ending in `.bak` are backups and are never
//! descended into. `<shard-id>.tsm` entries are conversion outputs left behind
//! by an earlier run and are reported as [`Leftover`]s.

use crate::error::{Error, Result};
use crate::legacy::bz1::{BLOCK_EXTENSION, FIELDS_FILE};
use crate::model::{BACKUP_EXTENSION, ShardDescriptor, ShardFormat, TSM_EXTENSION};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Conversion output left next to a shard by an earlier run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leftover {
    pub database: String,
    pub original: PathBuf,
    pub temp: PathBuf,
    /// Whether the original shard still exists
    pub original_present: bool,
}

impl Leftover {
    /// Error describing how an operator should resolve this leftover
    pub fn to_error(&self) -> Error {
        if self.original_present {
            Error::StaleOutput {
                original: self.original.clone(),
                temp: self.temp.clone(),
            }
        } else {
            Error::InterruptedSwap {
                original: self.original.clone(),
                temp: self.temp.clone(),
            }
        }
    }
}

/// Everything found under a data root
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// All recognized shards, sorted
    pub shards: Vec<ShardDescriptor>,
    /// Database directories skipped as backups
    pub backups: Vec<String>,
    /// Shard-level directories holding nothing of a known format
    pub unrecognized: Vec<PathBuf>,
    pub leftovers: Vec<Leftover>,
}

impl Inventory {
    /// Legacy shards, optionally restricted to `databases` (empty = all)
    pub fn pending(&self, databases: &[String]) -> Vec<ShardDescriptor> {
        self.shards
            .iter()
            .filter(|s| s.format.is_legacy())
            .filter(|s| selected(databases, &s.database))
            .cloned()
            .collect()
    }

    /// Shards already in TSM format within the selection
    pub fn converted(&self, databases: &[String]) -> Vec<ShardDescriptor> {
        self.shards
            .iter()
            .filter(|s| s.format == ShardFormat::Tsm1)
            .filter(|s| selected(databases, &s.database))
            .cloned()
            .collect()
    }

    /// Leftovers within the selection
    pub fn leftovers_in(&self, databases: &[String]) -> Vec<&Leftover> {
        self.leftovers
            .iter()
            .filter(|l| selected(databases, &l.database))
            .collect()
    }
}

fn selected(databases: &[String], database: &str) -> bool {
    databases.is_empty() || databases.iter().any(|d| d == database)
}

/// Enumerate databases, retention policies and shards under `data_root`
pub fn discover(data_root: &Path) -> Result<Inventory> {
    let discovery_err = |path: &Path, e: std::io::Error| Error::Discovery {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut inventory = Inventory::default();
    for db_entry in sorted_entries(data_root).map_err(|e| discovery_err(data_root, e))? {
        let db_path = db_entry;
        let Some(db_name) = file_name(&db_path) else {
            continue;
        };
        if !db_path.is_dir() {
            debug!("Ignoring non-directory {}", db_path.display());
            continue;
        }
        if db_name.ends_with(&format!(".{BACKUP_EXTENSION}")) {
            debug!("Skipping {} as it looks like a backup", db_name);
            inventory.backups.push(db_name);
            continue;
        }

        for rp_path in sorted_entries(&db_path).map_err(|e| discovery_err(&db_path, e))? {
            let Some(rp_name) = file_name(&rp_path) else {
                continue;
            };
            if !rp_path.is_dir() {
                debug!("Ignoring non-directory {}", rp_path.display());
                continue;
            }

            for shard_path in sorted_entries(&rp_path).map_err(|e| discovery_err(&rp_path, e))? {
                let Some(id) = file_name(&shard_path) else {
                    continue;
                };

                if let Some(original_id) = id.strip_suffix(&format!(".{TSM_EXTENSION}")) {
                    let original = rp_path.join(original_id);
                    let leftover = Leftover {
                        database: db_name.clone(),
                        original_present: original.exists(),
                        original,
                        temp: shard_path.clone(),
                    };
                    warn!("Found conversion leftover {}", shard_path.display());
                    inventory.leftovers.push(leftover);
                    continue;
                }

                let format =
                    detect_format(&shard_path).map_err(|e| discovery_err(&shard_path, e))?;
                let Some(format) = format else {
                    warn!("Unrecognized shard format at {}", shard_path.display());
                    inventory.unrecognized.push(shard_path);
                    continue;
                };

                let size = disk_size(&shard_path).map_err(|e| discovery_err(&shard_path, e))?;
                inventory.shards.push(ShardDescriptor {
                    database: db_name.clone(),
                    retention_policy: rp_name.clone(),
                    id,
                    path: shard_path,
                    format,
                    size,
                });
            }
        }
    }

    inventory.shards.sort_by(compare_shards);
    Ok(inventory)
}

/// Order by database, retention policy, then shard id (numeric ids numerically)
pub fn compare_shards(a: &ShardDescriptor, b: &ShardDescriptor) -> Ordering {
    a.database
        .cmp(&b.database)
        .then_with(|| a.retention_policy.cmp(&b.retention_policy))
        .then_with(|| match (a.id.parse::<u64>(), b.id.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.id.cmp(&b.id),
        })
}

/// Work out the format of a shard path from the data present
///
/// Anything that resembles a legacy shard is classified as one even when it
/// is damaged, so that opening it fails loudly instead of the shard being
/// left out of the migration. A regular file is always a b1 candidate; a
/// directory is bz1 as soon as it holds `fields.json` or any block file.
pub fn detect_format(path: &Path) -> std::io::Result<Option<ShardFormat>> {
    let metadata = fs::metadata(path)?;

    if metadata.is_file() {
        if !has_sqlite_magic(path)? {
            warn!("{} is not a valid b1 store file", path.display());
        }
        return Ok(Some(ShardFormat::B1));
    }

    if path.join(FIELDS_FILE).is_file() {
        return Ok(Some(ShardFormat::Bz1));
    }

    let mut empty = true;
    let mut tsm = false;
    for entry in fs::read_dir(path)? {
        let entry_path = entry?.path();
        empty = false;
        match entry_path.extension().and_then(|ext| ext.to_str()) {
            Some(BLOCK_EXTENSION) => return Ok(Some(ShardFormat::Bz1)),
            Some(TSM_EXTENSION) => tsm = true,
            _ => {}
        }
    }

    // A converted shard without any series holds no files
    Ok((tsm || empty).then_some(ShardFormat::Tsm1))
}

fn has_sqlite_magic(path: &Path) -> std::io::Result<bool> {
    let mut magic = [0u8; 16];
    match File::open(path)?.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == SQLITE_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Bytes used by a file or directory tree
pub fn disk_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::other)?.len();
        }
    }
    Ok(total)
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legacy::{B1Writer, Bz1Writer};
    use crate::model::Value;
    use tempfile::TempDir;

    fn descriptor(db: &str, rp: &str, id: &str) -> ShardDescriptor {
        ShardDescriptor {
            database: db.to_string(),
            retention_policy: rp.to_string(),
            id: id.to_string(),
            path: PathBuf::from(id),
            format: ShardFormat::B1,
            size: 0,
        }
    }

    fn b1_shard(path: &Path) {
        let mut writer = B1Writer::create(path).unwrap();
        writer
            .write_point("cpu", 1, &[("value".to_string(), Value::Float(1.0))])
            .unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_compare_shards_numeric_ids() {
        let mut shards = vec![
            descriptor("db", "rp", "10"),
            descriptor("db", "rp", "2"),
            descriptor("a", "rp", "30"),
        ];
        shards.sort_by(compare_shards);
        let ids: Vec<_> = shards.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["30", "2", "10"]);
    }

    #[test]
    fn test_discover_layout() {
        let root = TempDir::new().unwrap();
        let rp = root.path().join("db0").join("autogen");
        fs::create_dir_all(&rp).unwrap();
        b1_shard(&rp.join("1"));
        Bz1Writer::create(rp.join("2")).unwrap().finish().unwrap();
        fs::create_dir(rp.join("3")).unwrap();
        fs::write(rp.join("3").join("3.0.tsm"), b"x").unwrap();
        fs::create_dir(rp.join("4")).unwrap();
        fs::write(rp.join("4").join("notes.txt"), b"hello").unwrap();
        fs::create_dir_all(root.path().join("db0.bak").join("autogen")).unwrap();

        let inventory = discover(root.path()).unwrap();
        let formats: Vec<_> = inventory
            .shards
            .iter()
            .map(|s| (s.id.as_str(), s.format))
            .collect();
        assert_eq!(
            formats,
            vec![
                ("1", ShardFormat::B1),
                ("2", ShardFormat::Bz1),
                ("3", ShardFormat::Tsm1),
            ]
        );
        assert_eq!(inventory.backups, vec!["db0.bak".to_string()]);
        assert_eq!(inventory.unrecognized, vec![rp.join("4")]);
        assert_eq!(inventory.pending(&[]).len(), 2);
        assert_eq!(inventory.converted(&[]).len(), 1);
        assert!(inventory.pending(&["other".to_string()]).is_empty());
        assert!(inventory.shards[0].size > 0);
    }

    #[test]
    fn test_damaged_legacy_shards_are_not_skipped() {
        let root = TempDir::new().unwrap();
        let rp = root.path().join("db0").join("autogen");
        fs::create_dir_all(&rp).unwrap();

        let mut writer = Bz1Writer::create(rp.join("1")).unwrap();
        writer
            .write_record("cpu", &[(1, vec![("value".to_string(), Value::Float(1.0))])])
            .unwrap();
        writer.finish().unwrap();
        fs::remove_file(rp.join("1").join(FIELDS_FILE)).unwrap();
        fs::write(rp.join("2"), b"garbage").unwrap();
        fs::write(rp.join("3"), b"").unwrap();

        let inventory = discover(root.path()).unwrap();
        let formats: Vec<_> = inventory
            .shards
            .iter()
            .map(|s| (s.id.as_str(), s.format))
            .collect();
        assert_eq!(
            formats,
            vec![
                ("1", ShardFormat::Bz1),
                ("2", ShardFormat::B1),
                ("3", ShardFormat::B1),
            ]
        );
        assert!(inventory.unrecognized.is_empty());
        assert_eq!(inventory.pending(&[]).len(), 3);
    }

    #[test]
    fn test_discover_reports_leftovers() {
        let root = TempDir::new().unwrap();
        let rp = root.path().join("db0").join("autogen");
        fs::create_dir_all(&rp).unwrap();
        b1_shard(&rp.join("1"));
        fs::create_dir(rp.join("1.tsm")).unwrap();
        fs::create_dir(rp.join("2.tsm")).unwrap();

        let inventory = discover(root.path()).unwrap();
        assert_eq!(inventory.leftovers.len(), 2);
        assert!(matches!(
            inventory.leftovers[0].to_error(),
            Error::StaleOutput { .. }
        ));
        assert!(matches!(
            inventory.leftovers[1].to_error(),
            Error::InterruptedSwap { .. }
        ));
        assert_eq!(inventory.leftovers_in(&["db1".to_string()]).len(), 0);
    }

    #[test]
    fn test_discover_missing_root() {
        let root = TempDir::new().unwrap();
        let err = discover(&root.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
    }
}
