use anyhow::Result;
use chrono::Local;
use log::LevelFilter;
use std::io::{self, Write};

use clap::ArgMatches;
use env_logger::{Builder, Target};

/// Logging setup shared by every entrypoint.
///
/// `TIERPOLL_LOG_FILE` redirects records to a file; otherwise they go to
/// stderr at `info`. `RUST_LOG` refines levels in both cases.
pub fn init_common() {
    if let Ok(path) = std::env::var("TIERPOLL_LOG_FILE") {
        if let Err(err) = init_file_logger(&path) {
            eprintln!("Failed to initialize file logger at '{path}': {err}");
            init_stderr_logger();
        }
    } else {
        init_stderr_logger();
    }
}

fn init_stderr_logger() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn init_file_logger(path: &str) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} {} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    log::info!("File logger initialized at {path}");

    Ok(())
}

pub async fn start_poller(matches: &ArgMatches) -> Result<()> {
    crate::cli::start(matches).await
}
