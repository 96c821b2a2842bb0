//! Logging initialization for service binaries
//!
//! Console output plus an optional daily rolling log file, both using the
//! `timestamp [LEVEL] message` line format.

use std::path::PathBuf;

use errors::{ServiceError, ServiceResult};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{
        self,
        format::Writer,
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] target: message`
///
/// Example output: `2026-10-14T08:15:02.418337Z [INFO] curtailsrv::gateway: Listening on 0.0.0.0:502`
struct BracketedLevelFormat {
    with_target: bool,
}

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
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        if self.with_target {
            write!(writer, "{}: ", event.metadata().target())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as the crate-level filter target and log file prefix
    pub service_name: String,
    /// Directory for rolling log files; `None` disables file logging
    pub log_dir: Option<PathBuf>,
    /// Console output level
    pub console_level: Level,
    /// File output level
    pub file_level: Level,
    /// Colored console output
    pub ansi: bool,
    /// JSON lines in the log file instead of the bracketed format
    pub json_file: bool,
    /// Number of daily files kept before the oldest is removed
    pub max_log_files: usize,
}

impl LogConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            log_dir: None,
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            ansi: true,
            json_file: false,
            max_log_files: 30,
        }
    }

    /// Most verbose level any configured output wants
    fn max_level(&self) -> Level {
        if self.log_dir.is_some() {
            std::cmp::max(self.console_level, self.file_level)
        } else {
            self.console_level
        }
    }

    /// Default filter when `RUST_LOG` is not set: dependencies at info, the service at its own level
    fn default_directives(&self) -> String {
        format!(
            "info,{}={}",
            self.service_name.replace('-', "_"),
            self.max_level()
        )
    }
}

/// Keeps the non-blocking file writer alive; drop it last in `main`
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Parse log level string to tracing::Level
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber
///
/// Respects `RUST_LOG` when set. Fails if a global subscriber already exists.
pub fn init_with_config(config: LogConfig) -> ServiceResult<LogGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat { with_target: false })
        .with_filter(LevelFilter::from_level(config.console_level))
        .boxed();

    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&config.service_name)
                .filename_suffix("log")
                .max_log_files(config.max_log_files)
                .build(dir)
                .map_err(|e| ServiceError::Logging(format!("log file appender: {}", e)))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = if config.json_file {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_filter(LevelFilter::from_level(config.file_level))
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat { with_target: true })
                    .with_filter(LevelFilter::from_level(config.file_level))
                    .boxed()
            };
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ServiceError::Logging(e.to_string()))?;

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("invalid"), Level::INFO);
    }

    #[test]
    fn test_default_directives_follow_most_verbose_output() {
        let mut config = LogConfig::new("curtailsrv");
        assert_eq!(config.default_directives(), "info,curtailsrv=INFO");

        config.log_dir = Some(PathBuf::from("logs"));
        assert_eq!(config.default_directives(), "info,curtailsrv=DEBUG");

        config.console_level = Level::TRACE;
        assert_eq!(config.default_directives(), "info,curtailsrv=TRACE");
    }

    #[test]
    fn test_service_name_dashes_become_target_underscores() {
        let config = LogConfig::new("fleet-regulator");
        assert!(config.default_directives().starts_with("info,fleet_regulator="));
    }
}
