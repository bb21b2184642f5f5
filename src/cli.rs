// src/cli.rs
//! CLI definitions for tsm-migrate
//!
//! Argument parsing only; the run itself lives in the `commands` module.

use clap::Parser;
use std::path::PathBuf;

pub const LONG_ABOUT: &str = "\
Convert a database from the b1 or bz1 format to tsm1 format.

This tool backs up each database before converting any of its shards. The
backup of database <db> is written to <data-root>/<db>.bak and an existing
backup is never overwritten, so remove or move it before running again. To
restore a database, stop the server, remove <data-root>/<db> and rename
<data-root>/<db>.bak to <data-root>/<db>.

Shards are converted one at a time unless --parallel is given. Each shard is
written to <shard>.tsm next to the original and swapped into place only after
its conversion succeeded.";

#[derive(Parser, Debug)]
#[command(name = "tsm-migrate")]
#[command(author = "tsm-migrate contributors")]
#[command(version)]
#[command(about = "Convert b1 and bz1 shards to the tsm1 format", long_about = LONG_ABOUT)]
pub struct Cli {
    /// Data root holding <database>/<retention-policy>/<shard> directories
    pub data_path: PathBuf,

    /// Comma-delimited list of databases to convert (default: all)
    #[arg(long = "dbs", value_delimiter = ',')]
    pub databases: Vec<String>,

    /// Maximum size of a TSM file in bytes (hard ceiling: 2 GiB)
    #[arg(long = "sz", value_name = "BYTES")]
    pub max_file_size: Option<u64>,

    /// Number of shards converted at once
    #[arg(long = "parallel", value_name = "N")]
    pub parallelism: Option<usize>,

    /// Skip re-reading converted files before swapping them in
    #[arg(long)]
    pub no_verify: bool,

    /// TOML file with migration settings; flags take precedence
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Convert without asking for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "tsm-migrate",
            "--dbs",
            "db0,db1",
            "--sz",
            "1024",
            "--parallel",
            "4",
            "-y",
            "/var/lib/influxdb/data",
        ])
        .unwrap();
        assert_eq!(cli.databases, vec!["db0", "db1"]);
        assert_eq!(cli.max_file_size, Some(1024));
        assert_eq!(cli.parallelism, Some(4));
        assert!(cli.yes);
        assert!(!cli.no_verify);
        assert_eq!(cli.data_path, PathBuf::from("/var/lib/influxdb/data"));
    }

    #[test]
    fn test_data_path_required() {
        assert!(Cli::try_parse_from(["tsm-migrate"]).is_err());
    }
}
