// tests/migration.rs

//! End-to-end migration runs over temporary data roots.

mod common;

use common::{DB, DataRoot, RP, float_points, key, read_shard, tsm_files};
use std::fs;
use tsm_migrate::tsm::{empty_file_size, encode_series};
use tsm_migrate::{
    Error, MigrationConfig, Migrator, ShardFormat, SilentProgress, Value, ValuePoint,
};

fn run(
    root: &DataRoot,
    config: MigrationConfig,
) -> tsm_migrate::Result<tsm_migrate::MigrationReport> {
    let migrator = Migrator::new(root.path(), config)?;
    let plan = migrator.plan()?;
    migrator.run(&plan, true, &SilentProgress::new())
}

#[test]
fn test_two_series_scenario() {
    let root = DataRoot::new();
    let shard = root.bz1_shard(
        DB,
        RP,
        "1",
        &[
            ("seriesA", vec![(100, Value::Float(1.0)), (50, Value::Float(2.0))]),
            ("seriesB", vec![(10, Value::String("x".to_string()))]),
            ("seriesA", vec![(100, Value::Float(3.0))]),
        ],
    );

    let report = run(&root, MigrationConfig::default()).unwrap();
    assert_eq!(report.shards.len(), 1);
    assert_eq!(report.shards[0].points_read, 4);
    assert_eq!(report.shards[0].duplicates_dropped, 1);

    assert!(shard.is_dir());
    assert_eq!(tsm_files(&shard), vec![shard.join("1.0.tsm")]);

    let series = read_shard(&shard);
    assert_eq!(series.len(), 2);
    assert_eq!(
        series[&key("seriesA")],
        vec![
            ValuePoint::new(50, Value::Float(2.0)),
            ValuePoint::new(100, Value::Float(3.0)),
        ]
    );
    assert_eq!(
        series[&key("seriesB")],
        vec![ValuePoint::new(10, Value::String("x".to_string()))]
    );
}

#[test]
fn test_rollover_scenario() {
    let root = DataRoot::new();
    let points = float_points(400, 0.5);
    let shard = root.bz1_shard(DB, RP, "7", &[("cpu", points.clone()), ("mem", points.clone())]);

    let as_points: Vec<_> = points
        .iter()
        .map(|(ts, v)| ValuePoint::new(*ts, v.clone()))
        .collect();
    let cpu = encode_series(&key("cpu"), &as_points).unwrap();
    let mem = encode_series(&key("mem"), &as_points).unwrap();
    let max = empty_file_size() + cpu.encoded_len() + mem.encoded_len() - 1;
    assert!(cpu.encoded_len() < max / 2 && mem.encoded_len() < max / 2);

    let config = MigrationConfig {
        max_file_size: max,
        ..Default::default()
    };
    let report = run(&root, config).unwrap();
    assert_eq!(report.files_written(), 2);

    let files = tsm_files(&shard);
    assert_eq!(files, vec![shard.join("7.0.tsm"), shard.join("7.1.tsm")]);
    for file in &files {
        assert!(fs::metadata(file).unwrap().len() <= max);
        let reader = tsm_migrate::TsmReader::open(file).unwrap();
        assert_eq!(reader.entries().len(), 1);
    }
    assert_eq!(read_shard(&shard).len(), 2);
}

#[test]
fn test_points_conserved_across_formats() {
    let root = DataRoot::new();
    let mut expected = 0;

    let b1_points: Vec<(&str, i64, f64)> = (0..300i64)
        .map(|i| (if i % 2 == 0 { "cpu,host=a" } else { "cpu,host=b" }, i, i as f64))
        .collect();
    expected += b1_points.len();
    root.b1_shard(DB, RP, "1", &b1_points);

    let records: Vec<(&str, Vec<(i64, Value)>)> = (0..5i64)
        .map(|r| {
            let points = float_points(200, 1.0 + r as f64)
                .into_iter()
                .map(|(ts, v)| (ts + r * 200, v))
                .collect();
            ("disk,dev=sda", points)
        })
        .collect();
    expected += 5 * 200;
    root.bz1_shard(DB, "weekly", "2", &records);

    let config = MigrationConfig {
        max_file_size: 4096,
        ..Default::default()
    };
    let report = run(&root, config).unwrap();
    assert_eq!(report.shards.len(), 2);
    assert_eq!(report.points_written(), expected as u64);

    let mut total = 0;
    for (rp, id) in [(RP, "1"), ("weekly", "2")] {
        for (_, points) in read_shard(&root.shard_path(DB, rp, id)) {
            assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
            total += points.len();
        }
    }
    assert_eq!(total, expected);
}

#[test]
fn test_files_respect_size_bound() {
    let root = DataRoot::new();
    let records: Vec<(String, Vec<(i64, Value)>)> = (0..40)
        .map(|i| (format!("m{i:02},tag=t"), float_points(20 + i * 15, 0.25)))
        .collect();
    let records: Vec<_> = records.iter().map(|(s, p)| (s.as_str(), p.clone())).collect();
    let shard = root.bz1_shard(DB, RP, "3", &records);

    let max = 2048;
    let config = MigrationConfig {
        max_file_size: max,
        ..Default::default()
    };
    run(&root, config).unwrap();

    let files = tsm_files(&shard);
    assert!(files.len() > 1);
    for file in files {
        let size = fs::metadata(&file).unwrap().len();
        let series = tsm_migrate::TsmReader::open(&file).unwrap().entries().len();
        assert!(size <= max || series == 1, "{} is {} bytes", file.display(), size);
    }
}

#[test]
fn test_second_run_refuses_existing_backup() {
    let root = DataRoot::new();
    root.b1_shard(DB, RP, "1", &[("cpu", 1, 1.0)]);
    run(&root, MigrationConfig::default()).unwrap();

    let backup = root.path().join("db0.bak");
    let backed_up = backup.join(RP).join("1");
    assert!(backed_up.is_file());

    let new_shard = root.b1_shard(DB, RP, "2", &[("cpu", 2, 2.0)]);
    let before = fs::read(&new_shard).unwrap();

    let err = run(&root, MigrationConfig::default()).unwrap_err();
    assert!(matches!(err, Error::BackupExists { .. }));
    assert_eq!(fs::read(&new_shard).unwrap(), before);
    assert!(!root.shard_path(DB, RP, "2.tsm").exists());
    assert!(backed_up.is_file());
    assert!(!backup.join(RP).join("2").exists());
}

#[test]
fn test_open_failure_aborts_run() {
    let root = DataRoot::new();
    root.b1_shard(DB, RP, "1", &[("cpu", 1, 1.0)]);
    let broken = root.rp_dir(DB, RP).join("2");
    fs::create_dir(&broken).unwrap();
    fs::write(broken.join("fields.json"), b"not json").unwrap();
    root.b1_shard(DB, RP, "3", &[("cpu", 3, 3.0)]);

    let err = run(&root, MigrationConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Open { .. }), "{err}");

    // Shards before the failure are done, shards after it untouched
    assert_eq!(tsm_files(&root.shard_path(DB, RP, "1")).len(), 1);
    assert!(broken.join("fields.json").is_file());
    assert!(!root.shard_path(DB, RP, "2.tsm").exists());
    assert!(root.shard_path(DB, RP, "3").is_file());
}

#[test]
fn test_damaged_shards_abort_instead_of_being_skipped() {
    let root = DataRoot::new();
    let bz1 = root.bz1_shard(DB, RP, "1", &[("cpu", float_points(3, 1.0))]);
    fs::remove_file(bz1.join("fields.json")).unwrap();

    let migrator = Migrator::new(root.path(), MigrationConfig::default()).unwrap();
    let plan = migrator.plan().unwrap();
    assert_eq!(plan.shards.len(), 1);
    let err = migrator.run(&plan, true, &SilentProgress::new()).unwrap_err();
    assert!(matches!(err, Error::Open { .. }), "{err}");
    assert!(bz1.join("00000000.bz1").is_file());
    assert!(!root.shard_path(DB, RP, "1.tsm").exists());

    let other = DataRoot::new();
    let b1 = other.rp_dir(DB, RP).join("2");
    fs::write(&b1, b"truncated header").unwrap();
    let err = run(&other, MigrationConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Open { .. }), "{err}");
    assert_eq!(fs::read(&b1).unwrap(), b"truncated header");
}

#[test]
fn test_decode_failure_keeps_original() {
    let root = DataRoot::new();
    let shard = root.bz1_shard(DB, RP, "4", &[("cpu", float_points(10, 1.0))]);
    let block = shard.join("00000000.bz1");
    let data = fs::read(&block).unwrap();
    fs::write(&block, &data[..data.len() - 3]).unwrap();

    let err = run(&root, MigrationConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Decode { .. }), "{err}");
    assert!(!root.shard_path(DB, RP, "4.tsm").exists());
    assert!(block.is_file());
}

#[test]
fn test_interrupted_swap_reported_not_reprocessed() {
    let root = DataRoot::new();
    root.b1_shard(DB, RP, "1", &[("cpu", 1, 1.0)]);
    let temp = root.shard_path(DB, RP, "5.tsm");
    fs::create_dir(&temp).unwrap();
    fs::write(temp.join("5.0.tsm"), b"partial").unwrap();

    let migrator = Migrator::new(root.path(), MigrationConfig::default()).unwrap();
    let err = migrator.plan().unwrap_err();
    assert!(err.is_critical());
    match err {
        Error::InterruptedSwap { original, temp: reported } => {
            assert_eq!(original, root.shard_path(DB, RP, "5"));
            assert_eq!(reported, temp);
        }
        other => panic!("expected interrupted swap, got {other:?}"),
    }
    assert!(root.shard_path(DB, RP, "1").is_file());
    assert!(!root.path().join("db0.bak").exists());
}

#[test]
fn test_stale_output_aborts_before_backup() {
    let root = DataRoot::new();
    root.b1_shard(DB, RP, "1", &[("cpu", 1, 1.0)]);
    fs::create_dir(root.shard_path(DB, RP, "1.tsm")).unwrap();

    let err = run(&root, MigrationConfig::default()).unwrap_err();
    assert!(matches!(err, Error::StaleOutput { .. }));
    assert!(!root.path().join("db0.bak").exists());
}

#[test]
fn test_nothing_to_do() {
    let root = DataRoot::new();
    root.rp_dir(DB, RP);
    let migrator = Migrator::new(root.path(), MigrationConfig::default()).unwrap();
    let plan = migrator.plan().unwrap();
    assert!(plan.is_empty());

    // No confirmation needed when there is nothing to convert
    let report = migrator.run(&plan, false, &SilentProgress::new()).unwrap();
    assert!(report.shards.is_empty());
    assert!(report.backups.is_empty());
}

#[test]
fn test_database_filter_limits_backup_and_conversion() {
    let root = DataRoot::new();
    root.b1_shard("db0", RP, "1", &[("cpu", 1, 1.0)]);
    let other = root.b1_shard("db1", RP, "2", &[("cpu", 1, 1.0)]);

    let config = MigrationConfig {
        databases: vec!["db0".to_string()],
        ..Default::default()
    };
    let report = run(&root, config).unwrap();
    assert_eq!(report.shards.len(), 1);
    assert!(root.path().join("db0.bak").is_dir());
    assert!(!root.path().join("db1.bak").exists());
    assert!(other.is_file());

    let inventory = tsm_migrate::discover(root.path()).unwrap();
    let formats: Vec<_> = inventory.shards.iter().map(|s| s.format).collect();
    assert_eq!(formats, vec![ShardFormat::Tsm1, ShardFormat::B1]);
}
