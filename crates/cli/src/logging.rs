// Logging setup
// Console output goes to stderr so command output on stdout stays clean.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "vdcmig=info";
const LOG_FILE_PREFIX: &str = "vdcmig.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// One JSON object per event
    Json,
}

/// Install the global subscriber. Keep the returned guard alive for the whole
/// process, or buffered file output is lost.
pub fn init_tracing(format: LogFormat, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;

    let console = match format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
    };

    // Daily-rolling JSON file, written off-thread
    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer).boxed()),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
