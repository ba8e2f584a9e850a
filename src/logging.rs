//! `tracing` subscriber setup.
//!
//! `tracing` is the side channel: everything the pipeline cannot put in the
//! session log (its own failures, disabled sessions) goes here.
//!
//! - [`init_production`]: daily-rotated JSON file plus stderr, for hosts
//! - [`init_cli`]: stderr only, for `faultline` subcommands

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the file writer alive. Dropping it flushes pending events.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Log JSON to `{logs_dir}/faultline.log.YYYY-MM-DD` and text to stderr.
///
/// Filtered by `RUST_LOG`, default `info`.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already set.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "faultline.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Log text to stderr only.
pub fn init_cli() {
    // A host may have installed its own subscriber already.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
