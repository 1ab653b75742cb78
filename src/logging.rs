use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::filter_fn, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt,
    EnvFilter, Layer,
};

static LOG_GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Tracing target used by the hook ingestion API so its events are split
/// into `hooks.log` instead of the general `daemon.log`.
pub const HOOKS_TARGET: &str = "hooks";

pub struct LoggingSettings<'a> {
    pub level: Option<&'a str>,
    pub directory: Option<&'a Path>,
    pub retention_days: Option<u64>,
}

pub fn setup_tracing_with_settings(settings: LoggingSettings<'_>) -> Result<PathBuf> {
    let log_dir = resolve_log_dir(settings.directory)?;
    let retention_days = settings
        .retention_days
        .unwrap_or(DEFAULT_RETENTION_DAYS)
        .max(1);
    for prefix in ["daemon", "hooks"] {
        if let Err(e) = cleanup_old_logs(&log_dir, prefix, retention_days) {
            eprintln!("Failed to cleanup old {prefix} logs: {e}");
        }
    }

    let (daemon_writer, daemon_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "daemon"));
    let (hooks_writer, hooks_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "hooks"));

    LOG_GUARDS
        .set(vec![daemon_guard, hooks_guard])
        .map_err(|_| anyhow!("Logging already initialized. Cannot setup logging multiple times."))?;

    let time_format = ChronoUtc::new("%Y-%m-%dT%H:%M:%S".to_string());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .with_timer(time_format.clone());

    let daemon_layer = tracing_subscriber::fmt::layer()
        .with_writer(daemon_writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .with_timer(time_format.clone())
        .with_filter(filter_fn(|meta| meta.target() != HOOKS_TARGET));

    let hooks_layer = tracing_subscriber::fmt::layer()
        .with_writer(hooks_writer)
        .with_target(false)
        .with_file(false)
        .compact()
        .with_timer(time_format)
        .with_filter(filter_fn(|meta| meta.target() == HOOKS_TARGET));

    let default_filter = || {
        let base = settings.level.unwrap_or("info");
        EnvFilter::new(format!(
            "oak_ci={level},axum=warn,tower_http=warn,hyper=warn,reqwest=warn",
            level = base
        ))
    };

    let filter = if let Some(level) = settings.level {
        EnvFilter::try_new(format!(
            "oak_ci={level},axum=warn,tower_http=warn,hyper=warn,reqwest=warn"
        ))
        .unwrap_or_else(|_| default_filter())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter())
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(daemon_layer)
        .with(hooks_layer)
        .try_init();

    Ok(log_dir)
}

fn resolve_log_dir(configured: Option<&Path>) -> Result<PathBuf> {
    let dir = configured
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".oak").join("ci"));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn cleanup_old_logs(log_dir: &Path, prefix: &str, retention_days: u64) -> Result<()> {
    let now = SystemTime::now();
    let max_age = Duration::from_secs(60 * 60 * 24 * retention_days);
    for entry in std::fs::read_dir(log_dir)? {
        let entry = match entry {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Failed to read directory entry: {e}");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(v) => v,
            None => continue,
        };
        if !file_name.starts_with(prefix) {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Failed to get metadata for {:?}: {e}", path);
                continue;
            }
        };
        let age = match now.duration_since(modified) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Failed to calculate age for {:?}: {e}", path);
                continue;
            }
        };
        if age >= max_age {
            if let Err(e) = std::fs::remove_file(&path) {
                eprintln!("Failed to remove old log file {:?}: {e}", path);
            }
        }
    }
    Ok(())
}
