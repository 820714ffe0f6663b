//! Console plus append-only file logging with size-based rotation.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "info,wardend=debug,warden=debug";

/// Install the global subscriber. The returned guard flushes the file
/// writer on drop and must outlive the sweep.
///
/// An unwritable log location disables the file layer with a warning;
/// it never stops the invocation.
pub fn init(log_file: Option<(&Path, u64)>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let mut guard = None;
    let file_layer = match log_file.map(|(path, max)| (path, open_rotated(path, max))) {
        Some((_, Ok(file))) => {
            let (writer, g) = tracing_appender::non_blocking(file);
            guard = Some(g);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        Some((path, Err(e))) => {
            eprintln!(
                "Warning: could not open log file {} ({e}), file logging disabled",
                path.display()
            );
            None
        }
        None => None,
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

/// `<file>.1`, the single rotated generation.
pub fn rotated_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".1");
    PathBuf::from(name)
}

/// Open `path` for appending, first moving it to `<file>.1` if it has
/// grown past `max_bytes`.
pub fn open_rotated(path: &Path, max_bytes: u64) -> io::Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    if let Ok(meta) = std::fs::metadata(path)
        && meta.len() > max_bytes
    {
        std::fs::rename(path, rotated_path(path))?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
