//! Logging for tunnelctl.
//!
//! Library code only emits `tracing` events. Binaries call [`init_logging`]
//! once and hold the returned [`LoggingGuard`] until exit so that buffered
//! file output is flushed. Console output always goes to stderr; stdout is
//! reserved for command results.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::config::Config;

/// Line format of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Daily-rotated log file destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub dir: PathBuf,
    pub prefix: String,
}

impl LogFile {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        LogFile {
            dir: dir.into(),
            prefix: "tunnelctl.log".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: Level,
    pub format: LogFormat,
    /// Emit to stderr
    pub console: bool,
    pub file: Option<LogFile>,
    /// Annotate events with source file and line
    pub source_location: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: Level::INFO,
            format: LogFormat::Text,
            console: true,
            file: None,
            source_location: false,
        }
    }
}

impl LogOptions {
    /// Options derived from the settings file.
    pub fn from_config(config: &Config) -> Self {
        LogOptions {
            level: parse_level(&config.log_level),
            ..Default::default()
        }
    }
}

/// Keeps the file writer alive; dropping it flushes pending lines.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    file: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// True when events are also written to a file.
    pub fn writes_file(&self) -> bool {
        self.file.is_some()
    }
}

/// Parse a level name as used in the settings file; unknown names map to
/// INFO.
pub fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(writer: W, options: &LogOptions, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(options.source_location)
        .with_line_number(options.source_location);
    match options.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` directives are honoured on top of `options.level`. A second
/// call in the same process leaves the first subscriber in place.
///
/// ```
/// use tunnelctl_core::logging::{LogFormat, LogOptions, init_logging};
///
/// let _guard = init_logging(LogOptions {
///     format: LogFormat::Json,
///     ..Default::default()
/// });
/// tracing::info!("ready");
/// ```
pub fn init_logging(options: LogOptions) -> LoggingGuard {
    let _ = LogTracer::init();

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if options.console {
        layers.push(format_layer(std::io::stderr, &options, true));
    }

    let mut file_guard = None;
    if let Some(file) = &options.file {
        let appender = RollingFileAppender::new(Rotation::DAILY, &file.dir, &file.prefix);
        let (writer, guard) = NonBlocking::new(appender);
        file_guard = Some(guard);
        layers.push(format_layer(writer, &options, false));
    }

    let filter = EnvFilter::from_default_env().add_directive(options.level.into());
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();

    LoggingGuard { file: file_guard }
}
