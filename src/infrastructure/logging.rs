use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::DomainError;

/// The per-run install log.
///
/// Keep this alive for the whole run: dropping it flushes the remaining
/// lines to disk.
pub struct LogHandle {
    path: PathBuf,
    _guard: WorkerGuard,
}

impl LogHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `install_YYYYMMDD_HHMMSS.log` for a run started at `started`.
pub fn log_file_name(started: &DateTime<Local>) -> String {
    started.format("install_%Y%m%d_%H%M%S.log").to_string()
}

/// The install log file for a run started at `started`.
///
/// The file receives every line at debug level or above regardless of the
/// console level, including the streamed output of external commands.
pub fn file_layer<S>(
    logs_dir: &Path,
    started: &DateTime<Local>,
) -> Result<(impl Layer<S>, LogHandle), DomainError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fs::create_dir_all(logs_dir)?;

    let file_name = log_file_name(started);
    let file_appender = tracing_appender::rolling::never(logs_dir, &file_name);

    // Lossless: a full buffer blocks the producer instead of dropping lines.
    let (non_blocking, guard) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(file_appender);

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_filter(EnvFilter::new("dictate_setup=debug,info"));

    Ok((
        layer,
        LogHandle {
            path: logs_dir.join(file_name),
            _guard: guard,
        },
    ))
}

/// Initialize console output plus one timestamped log file per run.
pub fn init_logging(
    logs_dir: &Path,
    level: &str,
    verbose: bool,
    started: &DateTime<Local>,
) -> Result<LogHandle, DomainError> {
    let console_level = if verbose { "debug" } else { level };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dictate_setup={},warn", console_level)));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time()
        .with_span_events(FmtSpan::NONE)
        .with_filter(env_filter);

    let (file, handle) = file_layer(logs_dir, started)?;

    // try_init so a second call (tests) does not panic
    if tracing_subscriber::registry()
        .with(console_layer)
        .with(file)
        .try_init()
        .is_ok()
    {
        tracing::info!(
            log_file = ?handle.path(),
            level = console_level,
            "Logging initialized"
        );
    }

    Ok(handle)
}
