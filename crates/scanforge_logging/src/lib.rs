//! Shared logging setup for the orchestrator's binaries.
//!
//! Every binary (coordinator, worker, CLI) calls [`init_logging`] once at
//! startup and holds on to the returned guard for the lifetime of the
//! process — dropping it flushes the non-blocking file writer.

use anyhow::{Context, Result};
use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "scanforge=info,scanforge_worker=info,scanforge_coordinator=info";
const DEFAULT_LOG_FILTER_VERBOSE: &str = "scanforge=debug,scanforge_worker=debug,scanforge_coordinator=debug";

/// Logging configuration shared by the orchestrator's binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Force the console formatter: `Some(true)` for JSON, `Some(false)` for
    /// human-readable, `None` to choose based on whether stdout is a TTY.
    pub json: Option<bool>,
}

impl<'a> LogConfig<'a> {
    pub fn new(app_name: &'a str) -> Self {
        Self {
            app_name,
            verbose: false,
            json: None,
        }
    }
}

/// Initialize tracing for the process: a console layer (human or JSON
/// depending on `config.json` / TTY detection) plus a JSON rolling file
/// sink under the operational logs directory. The returned guard must be
/// kept alive for the duration of the process.
pub fn init_logging(config: LogConfig<'_>) -> Result<WorkerGuard> {
    let dir = ensure_logs_dir().context("failed to create logs directory")?;
    let file_appender = tracing_appender::rolling::daily(&dir, sanitize_name(config.app_name));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if config.verbose {
        DEFAULT_LOG_FILTER_VERBOSE
    } else {
        DEFAULT_LOG_FILTER
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let use_json = config.json.unwrap_or_else(|| !std::io::stdout().is_terminal());

    let console_layer: Box<dyn Layer<_> + Send + Sync> = if use_json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// The orchestrator's home directory, `~/.scanforge` unless overridden.
pub fn scanforge_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("SCANFORGE_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("could not determine home directory")
        .join(".scanforge")
}

/// The directory operational logs are written to, `~/.scanforge/logs`.
pub fn logs_dir() -> PathBuf {
    scanforge_home().join("logs")
}

/// The directory per-job scan logs are written to, distinct from the
/// operational logs above.
pub fn job_logs_dir() -> PathBuf {
    scanforge_home().join("logs").join("jobs")
}

/// Ensure the operational and per-job log directories exist.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("failed to create logs directory: {}", logs.display()))?;
    let jobs = job_logs_dir();
    fs::create_dir_all(&jobs)
        .with_context(|| format!("failed to create job logs directory: {}", jobs.display()))?;
    Ok(logs)
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
