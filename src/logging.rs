//! Logging setup (SPEC_FULL.md §2). One human-facing layer on stderr
//! (level controlled by `RUST_LOG`, default `info`), and one append-only
//! file layer writing the audit trail described in spec §6.2 — one line per
//! driver primitive and one per command outcome. The file is a formatted
//! `tracing` sink rather than a second hand-rolled write path.

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Returned so the caller can keep the non-blocking file writer alive for
/// the process lifetime (dropping it would stop flushing to disk).
pub struct LoggingGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

pub fn init(log_file: &std::path::Path) -> anyhow::Result<LoggingGuard> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("opening log file {}", log_file.display()))?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(file);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(false);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
