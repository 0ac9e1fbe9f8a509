//! Centralised tracing initialisation for pushgate binaries.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter`, optional JSON console formatting and an
//! optional durable trace file.
//!
//! Safe to call more than once: subsequent calls are silently ignored
//! (the global subscriber can only be set once per process).

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Initialise the global tracing subscriber.
///
/// * `json` - when `true`, console lines are newline-delimited JSON.
/// * `level` - default console verbosity when `RUST_LOG` is not set.
/// * `trace_file` - when given, every event at `DEBUG` and above is also
///   appended to this file (no ANSI colouring).
///
/// Console output goes to stderr so stdout stays free for reports.
pub fn init_tracing(json: bool, level: Level, trace_file: Option<File>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let console = if json {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    let file_layer = trace_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(LevelFilter::DEBUG)
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .ok();
}

/// Console-only subscriber on stderr, used by the discovery worker.
pub fn init_worker_tracing(level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .ok();
}

/// Create a fresh per-run trace log under `dir`.
///
/// The file name carries a local timestamp, e.g.
/// `pushgate-20240131-142501.log`.
pub fn open_trace_log(dir: &Path) -> std::io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("pushgate-{stamp}.log"));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}
