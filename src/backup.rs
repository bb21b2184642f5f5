// src/backup.rs
//! Database backups taken before any shard is converted
//!
//! A database directory `<root>/<db>` is copied to `<root>/<db>.bak`. An
//! existing backup is never overwritten; restoring is a manual
//! `mv <db>.bak <db>` by the operator.

use crate::error::{Error, Result};
use crate::model::BACKUP_EXTENSION;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// `<root>/<database>.bak`
pub fn backup_path(data_root: &Path, database: &str) -> PathBuf {
    data_root.join(format!("{database}.{BACKUP_EXTENSION}"))
}

/// Fail with [`Error::BackupExists`] if a backup of `database` is present
pub fn check_backup(data_root: &Path, database: &str) -> Result<()> {
    let path = backup_path(data_root, database);
    if path.symlink_metadata().is_ok() {
        return Err(Error::BackupExists {
            database: database.to_string(),
            path,
        });
    }
    Ok(())
}

/// Copy `<root>/<database>` to its backup path
///
/// Returns the backup path and the number of bytes copied.
pub fn backup_database(data_root: &Path, database: &str) -> Result<(PathBuf, u64)> {
    check_backup(data_root, database)?;

    let source = data_root.join(database);
    let dest = backup_path(data_root, database);
    let start = Instant::now();
    info!("Backing up {} to {}", source.display(), dest.display());

    let bytes = copy_or_discard(&source, &dest, copy_dir).map_err(|reason| Error::Backup {
        database: database.to_string(),
        reason,
    })?;

    info!(
        "Backed up database {} ({} bytes) in {:.2?}",
        database,
        bytes,
        start.elapsed()
    );
    Ok((dest, bytes))
}

/// Run `copy`, removing a partial backup if it fails
///
/// A half-written `<db>.bak` would otherwise block every later run as an
/// existing backup.
fn copy_or_discard<F>(source: &Path, dest: &Path, copy: F) -> std::result::Result<u64, String>
where
    F: FnOnce(&Path, &Path) -> io::Result<u64>,
{
    let err = match copy(source, dest) {
        Ok(bytes) => return Ok(bytes),
        Err(e) => e,
    };
    if dest.symlink_metadata().is_err() {
        return Err(err.to_string());
    }
    match fs::remove_dir_all(dest) {
        Ok(()) => {
            warn!("Removed incomplete backup {}", dest.display());
            Err(err.to_string())
        }
        Err(rm) => {
            warn!("Failed to remove incomplete backup {}: {}", dest.display(), rm);
            Err(format!("{err}; incomplete backup left at {}", dest.display()))
        }
    }
}

/// Recursive copy that keeps file and directory permissions
fn copy_dir(source: &Path, dest: &Path) -> io::Result<u64> {
    let mut bytes = 0;
    let mut dirs = Vec::new();
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            let permissions = entry.metadata().map_err(io::Error::other)?.permissions();
            dirs.push((target, permissions));
        } else if file_type.is_file() {
            // fs::copy carries the file's permission bits
            bytes += fs::copy(entry.path(), &target)?;
            debug!("Copied {}", relative.display());
        } else {
            debug!("Skipping special file {}", entry.path().display());
        }
    }

    // Deepest first, so a read-only directory does not block its children
    for (dir, permissions) in dirs.into_iter().rev() {
        fs::set_permissions(&dir, permissions)?;
    }
    Ok(bytes)
}
