//! # Logging & Tracing Infrastructure
//!
//! Structured logging for the media format reader on top of the `tracing`
//! crate, supporting:
//! - Pretty, JSON and compact output formats
//! - Per-crate filtering with a sensible default filter
//! - Mirroring events into a host pipeline via [`LoggerSink`]
//! - Span contexts (the reader runs every track inside a `track_loop` span)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use core_runtime::sink::{ConsoleLogger, LogLevel};
//! use std::sync::Arc;
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Compact)
//!     .with_level(LogLevel::Debug)
//!     .with_logger_sink(Arc::new(ConsoleLogger::default()));
//!
//! init_logging(config)?;
//! tracing::info!(target: "core_reader::track", "decoder created");
//! ```

use crate::error::{Error, Result};
use crate::sink::{LogEntry, LogLevel, LoggerSink};
use core_async::runtime;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Crates whose events are shown at the configured level by default.
const READER_TARGETS: &[&str] = &["core_async", "core_runtime", "core_reader"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact single-line format
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Logging configuration
#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Minimum log level for the reader crates
    pub level: LogLevel,
    /// Custom filter string (e.g., "core_reader::track=trace,core_async=warn")
    pub filter: Option<String>,
    /// Optional logger sink for forwarding logs to host
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Emit span enter/exit records
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            enable_spans: false,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("logger_sink", &self.logger_sink.is_some())
            .field("enable_spans", &self.enable_spans)
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Replace the default per-crate filter entirely.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set logger sink for host integration
    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

/// Installs the global subscriber: an [`EnvFilter`], the optional host sink
/// and a stdout formatter in the configured [`LogFormat`].
///
/// Call once during startup; a second call returns
/// [`Error::SubscriberInstall`].
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(build_filter(&config)?)
        .with(LoggerSinkLayer::new(config.logger_sink.clone()))
        .with(stdout_layer(&config))
        .try_init()
        .map_err(|e| Error::SubscriberInstall(e.to_string()))
}

fn stdout_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_thread_ids(config.display_thread_info)
        .with_thread_names(config.display_thread_info)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Pretty => layer.pretty().with_span_events(span_events).boxed(),
        LogFormat::Compact => layer.compact().with_span_events(span_events).boxed(),
        // Span context is embedded in each record instead of separate lines.
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = config
        .filter
        .clone()
        .unwrap_or_else(|| default_filter(config.level));

    EnvFilter::try_new(&directives).map_err(|e| Error::InvalidFilter {
        filter: directives,
        reason: e.to_string(),
    })
}

/// Reader crates at `level`, everything else at warn.
fn default_filter(level: LogLevel) -> String {
    let level = level.as_str();
    let facade = env!("CARGO_PKG_NAME").replace('-', "_");
    std::iter::once("warn".to_string())
        .chain(
            std::iter::once(facade.as_str())
                .chain(READER_TARGETS.iter().copied())
                .map(|target| format!("{target}={level}")),
        )
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// Host Sink Forwarding
// ============================================================================

/// Mirrors events at or above the sink's minimum level into a [`LoggerSink`].
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let metadata = event.metadata();
        let level = tracing_level_to_log_level(*metadata.level());
        if level < sink.min_level() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields.message.unwrap_or_else(|| metadata.name().to_string());
        let mut entry = fields
            .values
            .into_iter()
            .fold(LogEntry::new(level, metadata.target(), message), |entry, (k, v)| {
                entry.with_field(k, v)
            });
        if let Some(span) = ctx.lookup_current() {
            entry = entry.with_span_id(span.name());
        }

        deliver(Arc::clone(sink), entry);
    }
}

/// Hands `entry` to the sink without blocking the emitting task when a
/// runtime is available.
fn deliver(sink: Arc<dyn LoggerSink>, entry: LogEntry) {
    if let Ok(handle) = runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Err(err) = sink.log(entry).await {
                eprintln!("LoggerSink error: {err}");
            }
        });
        return;
    }

    match runtime::block_on(async move { sink.log(entry).await }) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => eprintln!("LoggerSink error: {err}"),
        Err(err) => eprintln!("LoggerSink runtime error: {err}"),
    }
}

/// Splits an event into its message and its remaining fields.
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: HashMap<String, String>,
}

impl FieldCollector {
    fn store(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    // Strings are recorded without the quotes `Debug` would add; every
    // other primitive falls back to `record_debug`.
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.store(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, format!("{value:?}"));
    }
}

fn tracing_level_to_log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::default()
            .with_format(LogFormat::Json)
            .with_level(LogLevel::Debug)
            .with_filter("core_reader=trace")
            .with_spans(true)
            .with_target(false)
            .with_thread_info(true);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.filter, Some("core_reader=trace".to_string()));
        assert!(config.enable_spans);
        assert!(!config.display_target);
        assert!(config.display_thread_info);
    }

    #[test]
    fn test_default_filter_names_reader_crates() {
        let filter = default_filter(LogLevel::Debug);
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("core_reader=debug"));
        assert!(filter.contains("core_async=debug"));
        assert!(filter.contains("core_runtime=debug"));
    }

    #[test]
    fn test_build_filter() {
        let config = LoggingConfig::default().with_level(LogLevel::Trace);
        let filter = build_filter(&config).unwrap();
        assert!(filter.to_string().contains("core_reader=trace"));
    }

    #[test]
    fn test_build_custom_filter() {
        let config = LoggingConfig::default().with_filter("core_reader::track=trace");
        let filter = build_filter(&config).unwrap();
        assert!(filter.to_string().contains("core_reader::track=trace"));
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        let config = LoggingConfig::default().with_filter("core_reader=[[");
        assert!(matches!(
            build_filter(&config),
            Err(Error::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_logger_sink_layer_forwards_event() {
        let sink = Arc::new(TestLoggerSink::default());
        let trait_sink: Arc<dyn LoggerSink> = sink.clone();
        let layer = LoggerSinkLayer::new(Some(trait_sink));
        let subscriber = tracing_subscriber::registry().with(layer);
        let _guard = tracing::subscriber::set_default(subscriber);

        tracing::warn!(target: "core_reader::track", track = "video", "demux stalled");
        tracing::trace!(target: "core_reader::track", "below sink level");

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.target, "core_reader::track");
        assert_eq!(entry.message, "demux stalled");
        assert_eq!(entry.fields.get("track"), Some(&"video".to_string()));
    }

    #[derive(Default)]
    struct TestLoggerSink {
        entries: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl LoggerSink for TestLoggerSink {
        async fn log(&self, entry: LogEntry) -> Result<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        fn min_level(&self) -> LogLevel {
            LogLevel::Debug
        }
    }
}
