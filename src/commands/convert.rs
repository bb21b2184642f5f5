// src/commands/convert.rs
//! Convert command: preview, confirm, run

use super::progress::ConversionProgress;
use crate::cli::Cli;
use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use tsm_migrate::{MigrationConfig, MigrationPlan, Migrator};

/// Run a migration as described by the command line
///
/// Returns `false` when the operator declined the conversion.
pub fn cmd_convert(cli: &Cli) -> Result<bool> {
    let config = build_config(cli)?;
    let migrator = Migrator::new(&cli.data_path, config).context("Invalid settings")?;

    println!("{}", crate::cli::LONG_ABOUT.lines().next().unwrap_or_default());
    println!();
    println!("Data path:        {}", cli.data_path.display());
    println!(
        "Databases:        {}",
        if migrator.config().databases.is_empty() {
            "all".to_string()
        } else {
            migrator.config().databases.join(", ")
        }
    );
    println!("Max TSM file size: {}", format_size(migrator.config().max_file_size));
    println!();

    let plan = migrator
        .plan()
        .with_context(|| format!("Failed to inspect {}", cli.data_path.display()))?;
    print_skipped(&plan);

    if plan.is_empty() {
        println!("Nothing to do.");
        return Ok(true);
    }

    print_preview(&plan);

    let confirmed = cli.yes || confirm("These shards will be converted. Proceed? y/N: ")?;
    if !confirmed {
        println!("Conversion aborted.");
        return Ok(false);
    }

    let progress = ConversionProgress::new();
    let report = migrator
        .run(&plan, confirmed, &progress)
        .context("Conversion failed")?;

    println!();
    for backup in &report.backups {
        println!("Backup written to {}", backup.display());
    }
    println!(
        "Converted {} shard(s): {} points into {} file(s), {} in {:.2?}",
        report.shards.len(),
        report.points_written(),
        report.files_written(),
        format_size(report.bytes_written()),
        report.duration
    );
    Ok(true)
}

/// Settings from the config file, overridden by flags
fn build_config(cli: &Cli) -> Result<MigrationConfig> {
    let mut config = match &cli.config {
        Some(path) => MigrationConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MigrationConfig::default(),
    };

    if !cli.databases.is_empty() {
        config.databases = cli.databases.clone();
    }
    if let Some(max_file_size) = cli.max_file_size {
        config.max_file_size = max_file_size;
    }
    if let Some(parallelism) = cli.parallelism {
        config.parallelism = parallelism;
    }
    if cli.no_verify {
        config.verify = false;
    }
    Ok(config)
}

fn print_skipped(plan: &MigrationPlan) {
    for backup in &plan.skipped_backups {
        println!("Skipping {backup} as it looks like a backup.");
    }
    for path in &plan.unrecognized {
        println!("Skipping {}: unrecognized shard format.", path.display());
    }
    if !plan.already_converted.is_empty() {
        println!(
            "Skipping {} shard(s) already in tsm1 format.",
            plan.already_converted.len()
        );
    }
}

fn print_preview(plan: &MigrationPlan) {
    println!(
        "{:<20} {:<20} {:<50} {:<8} {:>10}",
        "Database", "Retention", "Path", "Engine", "Size"
    );
    for shard in &plan.shards {
        println!(
            "{:<20} {:<20} {:<50} {:<8} {:>10}",
            shard.database,
            shard.retention_policy,
            shard.path.display(),
            shard.format.to_string(),
            format_size(shard.size)
        );
    }
    println!();
    println!(
        "{} shard(s), {} total",
        plan.shards.len(),
        format_size(plan.total_size())
    );
    println!();
}

fn confirm(question: &str) -> Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{question}")?;
    stdout.flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim() == "y")
}

/// Format size as human-readable
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.1} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.1} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.1} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_flags_override_config_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("migrate.toml");
        std::fs::write(&path, "max_file_size = 4096\nparallelism = 3\n").unwrap();

        let cli = Cli::try_parse_from([
            "tsm-migrate",
            "--config",
            path.to_str().unwrap(),
            "--sz",
            "2048",
            "--no-verify",
            "/data",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.max_file_size, 2048);
        assert_eq!(config.parallelism, 3);
        assert!(!config.verify);
    }

    #[test]
    fn test_flag_repairs_out_of_range_file_setting() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("migrate.toml");
        std::fs::write(&path, "max_file_size = 0\n").unwrap();

        let cli = Cli::try_parse_from([
            "tsm-migrate",
            "--config",
            path.to_str().unwrap(),
            "--sz",
            "1024",
            "/data",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.max_file_size, 1024);
        config.validate().unwrap();
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0 GB");
    }
}
