//! Logging to stderr plus a daily log file.
//!
//! The level comes from the `PICASA_IMPORT_LOG` environment variable when
//! set (any `EnvFilter` directive, e.g. `picasa_import=debug`), otherwise
//! from the number of `-v` flags.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV: &str = "PICASA_IMPORT_LOG";

/// Default filter for a given number of `-v` flags.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("picasa-import")
        .join("logs")
}

pub fn init(verbosity: u8, log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
        tracing::warn!("Not writing a log file, cannot create {:?}: {}", log_dir, e);
        return Ok(());
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, "picasa-import.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard would stop the writer thread.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::debug!("Logging to {:?}", log_dir);
    Ok(())
}
