// src/migrate.rs

//! Migration orchestrator
//!
//! Drives a whole run: discovery, the backup precondition, per-shard
//! conversion and the swap of converted output into the live shard path.
//!
//! # Crash safety
//!
//! Conversion output goes to `<shard>.tsm` next to the shard. Only once the
//! output is complete (and verified, if enabled) and the legacy reader has been
//! closed is the original removed and the output renamed over it. At any
//! instant the shard path therefore holds only legacy data, nothing (between
//! removal and rename), or only TSM data. Leftovers of an interrupted run are
//! found by discovery and reported instead of being reprocessed.
//!
//! # Failure model
//!
//! The first error aborts the run. Shards already swapped stay converted,
//! untouched shards stay legacy, and `<db>.bak` remains the recovery path.

use crate::backup::{backup_database, check_backup};
use crate::config::MigrationConfig;
use crate::convert::{ConversionOptions, ConversionResult, ShardConverter};
use crate::discovery::discover;
use crate::error::{Error, Result};
use crate::legacy::reader_for;
use crate::model::ShardDescriptor;
use crate::progress::ProgressTracker;
use crate::tsm::TsmReader;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What a run would do, computed without touching anything
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    pub data_root: PathBuf,
    /// Legacy shards to convert, in conversion order
    pub shards: Vec<ShardDescriptor>,
    /// Selected shards already in TSM format
    pub already_converted: Vec<ShardDescriptor>,
    /// Database directories skipped as backups
    pub skipped_backups: Vec<String>,
    /// Shard paths whose format could not be determined
    pub unrecognized: Vec<PathBuf>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Databases with at least one shard to convert, in conversion order
    pub fn databases(&self) -> Vec<&str> {
        let mut databases: Vec<&str> = Vec::new();
        for shard in &self.shards {
            if !databases.contains(&shard.database.as_str()) {
                databases.push(&shard.database);
            }
        }
        databases
    }

    /// Bytes of legacy data to convert
    pub fn total_size(&self) -> u64 {
        self.shards.iter().map(|s| s.size).sum()
    }
}

/// Result of converting and swapping one shard
#[derive(Debug, Clone)]
pub struct ShardOutcome {
    pub shard: ShardDescriptor,
    /// Final locations of the TSM files
    pub files: Vec<PathBuf>,
    pub points_read: u64,
    pub points_written: u64,
    pub duplicates_dropped: u64,
    pub bytes_written: u64,
    pub duration: Duration,
}

/// Summary of a completed run
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Backups created, one per converted database
    pub backups: Vec<PathBuf>,
    pub shards: Vec<ShardOutcome>,
    pub duration: Duration,
}

impl MigrationReport {
    pub fn points_written(&self) -> u64 {
        self.shards.iter().map(|s| s.points_written).sum()
    }

    pub fn files_written(&self) -> usize {
        self.shards.iter().map(|s| s.files.len()).sum()
    }

    pub fn bytes_written(&self) -> u64 {
        self.shards.iter().map(|s| s.bytes_written).sum()
    }
}

/// Runs migrations under one data root
pub struct Migrator {
    data_root: PathBuf,
    config: MigrationConfig,
}

impl Migrator {
    pub fn new(data_root: impl Into<PathBuf>, config: MigrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            data_root: data_root.into(),
            config,
        })
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Discover shards and decide what to convert
    ///
    /// Fails if an earlier run left conversion output behind in a selected
    /// database; interrupted swaps are reported ahead of stale output.
    pub fn plan(&self) -> Result<MigrationPlan> {
        let inventory = discover(&self.data_root)?;
        let databases = &self.config.databases;

        let mut leftovers = inventory.leftovers_in(databases);
        leftovers.sort_by_key(|l| l.original_present);
        if let Some(leftover) = leftovers.first() {
            return Err(leftover.to_error());
        }

        for database in databases {
            if !inventory.shards.iter().any(|s| &s.database == database) {
                warn!("Database {} has no shards under {}", database, self.data_root.display());
            }
        }

        let plan = MigrationPlan {
            data_root: self.data_root.clone(),
            shards: inventory.pending(databases),
            already_converted: inventory.converted(databases),
            skipped_backups: inventory.backups,
            unrecognized: inventory.unrecognized,
        };
        for shard in &plan.already_converted {
            debug!("Skipping {} as it is already tsm1", shard.path.display());
        }
        Ok(plan)
    }

    /// Execute a plan
    ///
    /// `confirmed` is the operator's answer to the destructive-action prompt;
    /// nothing is written without it. An empty plan succeeds without
    /// confirmation.
    pub fn run(
        &self,
        plan: &MigrationPlan,
        confirmed: bool,
        progress: &dyn ProgressTracker,
    ) -> Result<MigrationReport> {
        let start = Instant::now();
        if plan.is_empty() {
            info!("No legacy shards to convert");
            return Ok(MigrationReport::default());
        }
        if !confirmed {
            return Err(Error::NotConfirmed);
        }

        // Every database must be clear before the first copy starts
        let databases = plan.databases();
        for database in &databases {
            check_backup(&plan.data_root, database)?;
        }

        let mut report = MigrationReport::default();
        for database in &databases {
            progress.set_message(&format!("Backing up {database}"));
            let (path, _) = backup_database(&plan.data_root, database)?;
            report.backups.push(path);
        }

        progress.set_length(plan.shards.len() as u64);
        let converted = if self.config.parallelism > 1 {
            self.convert_parallel(&plan.shards, progress)
        } else {
            plan.shards
                .iter()
                .map(|shard| self.migrate_shard(shard, progress))
                .collect::<Result<Vec<_>>>()
        };

        match converted {
            Ok(outcomes) => report.shards = outcomes,
            Err(e) => {
                progress.finish_with_error(&e.to_string());
                return Err(e);
            }
        }

        report.duration = start.elapsed();
        progress.finish_with_message(&format!(
            "Converted {} shards ({} points, {} files, {} bytes) in {:.2?}",
            report.shards.len(),
            report.points_written(),
            report.files_written(),
            report.bytes_written(),
            report.duration
        ));
        Ok(report)
    }

    fn convert_parallel(
        &self,
        shards: &[ShardDescriptor],
        progress: &dyn ProgressTracker,
    ) -> Result<Vec<ShardOutcome>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .build()
            .map_err(|e| Error::Config(format!("failed to start worker pool: {e}")))?;
        info!("Converting {} shards on {} workers", shards.len(), self.config.parallelism);

        pool.install(|| {
            shards
                .par_iter()
                .map(|shard| self.migrate_shard(shard, progress))
                .collect()
        })
    }

    /// Convert one shard, verify the output, then swap it into place
    fn migrate_shard(
        &self,
        shard: &ShardDescriptor,
        progress: &dyn ProgressTracker,
    ) -> Result<ShardOutcome> {
        let start = Instant::now();
        let temp = shard.temp_path();
        progress.set_message(&format!("Converting {}", shard.path.display()));
        info!(
            "Converting shard {} ({}, {} bytes)",
            shard.path.display(),
            shard.format,
            shard.size
        );

        if temp.symlink_metadata().is_ok() {
            return Err(Error::StaleOutput {
                original: shard.path.clone(),
                temp,
            });
        }

        let mut reader = reader_for(shard)?;
        reader.open()?;

        if let Err(e) = fs::create_dir(&temp) {
            // Nothing was written yet; only the lock needs releasing
            if let Err(close_err) = reader.close() {
                warn!("Failed to close {}: {}", shard.path.display(), close_err);
            }
            return Err(Error::write(&temp, e));
        }

        let converter = ShardConverter::new(
            ConversionOptions::new(&temp, &shard.id).with_max_file_size(self.config.max_file_size),
        );
        let converted = converter.process(reader.as_mut());
        let closed = reader.close();
        let result = match (converted, closed) {
            (Ok(result), Ok(())) => result,
            (Err(e), _) | (Ok(_), Err(e)) => {
                discard_temp(&temp);
                return Err(e);
            }
        };

        if self.config.verify {
            if let Err(e) = verify_output(shard, &result) {
                discard_temp(&temp);
                return Err(e);
            }
        }

        swap_shard(&shard.path, &temp, |from, to| fs::rename(from, to))?;

        let files = result
            .files
            .iter()
            .filter_map(|f| f.path.file_name())
            .map(|name| shard.path.join(name))
            .collect();
        let outcome = ShardOutcome {
            shard: shard.clone(),
            files,
            points_read: result.points_read,
            points_written: result.points_written,
            duplicates_dropped: result.duplicates_dropped,
            bytes_written: result.total_bytes(),
            duration: start.elapsed(),
        };
        info!(
            "Conversion of {} successful ({:.2?})",
            shard.path.display(),
            outcome.duration
        );
        progress.increment(1);
        Ok(outcome)
    }
}

/// Re-read converted output and check it against the conversion result
fn verify_output(shard: &ShardDescriptor, result: &ConversionResult) -> Result<()> {
    let mut points = 0u64;
    for file in &result.files {
        let reader = TsmReader::open(&file.path)?;
        for entry in reader.entries() {
            let series = reader.read_series(&entry.key)?.unwrap_or_default();
            if series.windows(2).any(|w| w[0].timestamp >= w[1].timestamp) {
                return Err(Error::Encode {
                    key: entry.key.to_string(),
                    reason: format!("timestamps not strictly ascending in {}", file.path.display()),
                });
            }
            points += series.len() as u64;
        }
    }

    if points != result.points_written {
        return Err(Error::Encode {
            key: shard.id.clone(),
            reason: format!(
                "output holds {points} points, expected {}",
                result.points_written
            ),
        });
    }
    debug!("Verified {} points in {} file(s)", points, result.files.len());
    Ok(())
}

/// Remove the original shard, then move the converted output into its place
///
/// `rename` performs the final move.
pub(crate) fn swap_shard<F>(original: &Path, temp: &Path, rename: F) -> Result<()>
where
    F: FnOnce(&Path, &Path) -> io::Result<()>,
{
    let swap_error = |reason: String| {
        error!(
            "Swap of {} failed: {}; converted data remains at {}",
            original.display(),
            reason,
            temp.display()
        );
        Error::Swap {
            original: original.to_path_buf(),
            temp: temp.to_path_buf(),
            reason,
        }
    };

    let metadata = fs::symlink_metadata(original)
        .map_err(|e| swap_error(format!("cannot stat original: {e}")))?;
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(original)
    } else {
        fs::remove_file(original)
    };
    removed.map_err(|e| swap_error(format!("cannot remove original: {e}")))?;

    rename(temp, original).map_err(|e| swap_error(format!("cannot rename converted output: {e}")))?;
    debug!("Swapped {} into {}", temp.display(), original.display());
    Ok(())
}

fn discard_temp(temp: &Path) {
    match fs::remove_dir_all(temp) {
        Ok(()) => debug!("Removed temporary output {}", temp.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temporary output {}: {}", temp.display(), e),
    }
}
