//! `tracing` subscriber setup shared by both binaries.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

/// Overrides the configured level, e.g. `THE_CONTROL_LOG=the_control=debug`.
pub const LOG_ENV: &str = "THE_CONTROL_LOG";

/// Builds the filter from [`LOG_ENV`], falling back to `level`.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber, writing to stderr and appending to
/// `log_file`. A log file that cannot be opened only costs the file copy.
pub fn init(level: &str, log_file: &Path) {
    let writer = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => BoxMakeWriter::new(std::io::stderr.and(Mutex::new(file))),
        Err(err) => {
            eprintln!("cannot open log file {}: {err}", log_file.display());
            BoxMakeWriter::new(std::io::stderr)
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
