//! Unified logging module
//!
//! Console output uses a compact bracketed-level format. An optional daily
//! rolling file layer is written through a non-blocking appender. The level
//! filter sits behind a reload handle so it can be changed at runtime.

use std::path::PathBuf;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Bracketed tag and ANSI color for a level
fn level_style(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
    }
}

/// `2025-12-02T00:50:44.809Z [INFO] Poller started: slave 1 every 1000ms`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let (tag, color) = level_style(*event.metadata().level());
        if writer.has_ansi_escapes() {
            write!(writer, "{timestamp} {color}{tag}\x1b[0m ")?;
        } else {
            write!(writer, "{timestamp} {tag} ")?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the process lifetime
static FILE_GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();

static FILTER_RELOAD: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Service name, used as the default debug target and file prefix
    pub service_name: String,
    /// Filter spec; `None` falls back to `RUST_LOG`, then `info,<service>=debug`
    pub level: Option<String>,
    /// Daily rolling log directory; console only when unset
    pub log_dir: Option<PathBuf>,
    /// JSON lines in the file layer
    pub enable_json: bool,
    /// Colored console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            level: None,
            log_dir: None,
            enable_json: false,
            ansi: true,
        }
    }
}

/// Resolve the initial filter string
pub fn initial_filter(config: &LogConfig) -> String {
    if let Some(level) = config.level.as_deref().filter(|l| !l.is_empty()) {
        return level.to_string();
    }
    match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.is_empty() => env_str,
        _ => format!("info,{}=debug", config.service_name),
    }
}

/// Initialize logging system with configuration
///
/// Fails if a global subscriber is already installed.
pub fn init_with_config(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter_str = initial_filter(config);
    let env_filter = EnvFilter::try_new(&filter_str)?;

    // Reloadable so set_log_level can swap it later
    let (reload_filter, reload_handle) = reload::Layer::new(env_filter);

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            *FILE_GUARD.get_or_init(|| Mutex::new(None)).lock() = Some(guard);

            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    let _ = FILTER_RELOAD.set(reload_handle);

    match &config.log_dir {
        Some(dir) => tracing::info!("Logging: {} @ {:?}", config.service_name, dir),
        None => tracing::debug!("Logging: {} (console)", config.service_name),
    }

    Ok(())
}

/// Swap the active filter at runtime
///
/// Accepts a bare level (`"debug"`) or a full filter spec
/// (`"info,metersrv=trace"`).
pub fn set_log_level(filter: &str) -> Result<(), String> {
    let handle = FILTER_RELOAD
        .get()
        .ok_or_else(|| "logging is not initialized".to_string())?;
    let parsed = EnvFilter::try_new(filter).map_err(|e| format!("bad filter '{filter}': {e}"))?;
    handle
        .reload(parsed)
        .map_err(|e| format!("filter reload failed: {e}"))?;
    tracing::info!("Log filter now {}", filter);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_level_tags() {
        assert_eq!(level_style(Level::INFO).0, "[INFO]");
        assert_eq!(level_style(Level::ERROR), ("[ERROR]", "\x1b[31m"));
    }

    #[test]
    fn test_explicit_level_wins() {
        let config = LogConfig {
            service_name: "metersrv".to_string(),
            level: Some("warn".to_string()),
            ..LogConfig::default()
        };
        assert_eq!(initial_filter(&config), "warn");
    }

    #[test]
    fn test_default_filter_names_service() {
        let config = LogConfig {
            service_name: "metersrv".to_string(),
            ..LogConfig::default()
        };
        let filter = initial_filter(&config);
        // RUST_LOG may be set by the test runner
        if std::env::var("RUST_LOG").map(|v| v.is_empty()).unwrap_or(true) {
            assert_eq!(filter, "info,metersrv=debug");
        }
    }

    #[test]
    fn test_set_level_before_init_fails() {
        if FILTER_RELOAD.get().is_none() {
            assert!(set_log_level("debug").is_err());
        }
    }

    #[test]
    fn test_log_config_deserializes_partial() {
        let config: LogConfig = serde_json::from_str(r#"{"level":"debug"}"#).unwrap();
        assert_eq!(config.level.as_deref(), Some("debug"));
        assert!(config.ansi);
        assert!(config.log_dir.is_none());
    }
}
