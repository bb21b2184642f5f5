// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Mirrors the derive definitions in src/cli.rs
fn build_cli() -> Command {
    Command::new("tsm-migrate")
        .version(env!("CARGO_PKG_VERSION"))
        .author("tsm-migrate contributors")
        .about("Convert b1 and bz1 shards to the tsm1 format")
        .arg(
            Arg::new("data_path")
                .required(true)
                .value_name("DATA_PATH")
                .help("Data root holding <database>/<retention-policy>/<shard> directories"),
        )
        .arg(
            Arg::new("dbs")
                .long("dbs")
                .value_delimiter(',')
                .help("Comma-delimited list of databases to convert (default: all)"),
        )
        .arg(
            Arg::new("sz")
                .long("sz")
                .value_name("BYTES")
                .help("Maximum size of a TSM file in bytes (hard ceiling: 2 GiB)"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .value_name("N")
                .help("Number of shards converted at once"),
        )
        .arg(
            Arg::new("no_verify")
                .long("no-verify")
                .action(ArgAction::SetTrue)
                .help("Skip re-reading converted files before swapping them in"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("TOML file with migration settings; flags take precedence"),
        )
        .arg(
            Arg::new("yes")
                .short('y')
                .long("yes")
                .action(ArgAction::SetTrue)
                .help("Convert without asking for confirmation"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log debug output"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("tsm-migrate.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
