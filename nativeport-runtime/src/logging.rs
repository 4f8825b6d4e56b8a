//! Logging infrastructure - structured tracing throughout the runtime
//!
//! Design: Uses `tracing` with one target per subsystem
//! (`nativeport::handle`, `nativeport::tracker`, `nativeport::scope`,
//! `nativeport::ffi`, `nativeport::loader`). Initialization is optional and
//! idempotent; embedding applications usually install their own subscriber.

use once_cell::sync::OnceCell;
use std::io;
use std::time::Duration;
use tracing::{debug, info, trace, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Global logging state; holds the file writer guard when file output is on
static LOGGER: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path, console output when `None`
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // NATIVEPORT_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("NATIVEPORT_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // NATIVEPORT_LOG_FILE: path to log file
        config.log_path = std::env::var("NATIVEPORT_LOG_FILE").ok();

        config.json_format = std::env::var("NATIVEPORT_LOG_JSON").is_ok();
        config.show_spans = std::env::var("NATIVEPORT_LOG_SPANS").is_ok();

        config
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: None,
            json_format: false,
            show_spans: true,
        }
    }
}

pub(crate) fn parse_level(text: &str) -> Option<Level> {
    match text.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
pub fn init_with_config(config: LogConfig) {
    LOGGER.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "nativeport={level},nativeport_runtime={level}",
                level = config.level.as_str().to_lowercase()
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (writer, guard) = match &config.log_path {
            Some(path) => {
                let path = std::path::Path::new(path);
                let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "nativeport_runtime.log".to_string());
                let appender = tracing_appender::rolling::never(directory, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer), Some(guard))
            }
            None => (tracing_subscriber::fmt::writer::BoxMakeWriter::new(io::stderr), None),
        };

        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(cfg!(debug_assertions));
        let layer = if config.json_format {
            layer.json().boxed()
        } else {
            layer.compact().boxed()
        };

        // Another subscriber may already be installed by the host application
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init();
        guard
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER.get().is_some()
}

// ============================================================================
// Runtime-specific logging functions
// ============================================================================

/// Log a native allocation handed to a handle
#[inline]
pub fn log_allocation(kind: &str, address: usize, bytes: usize) {
    trace!(
        target: "nativeport::handle",
        event = "allocation",
        kind,
        address,
        bytes,
        "native memory allocated"
    );
}

/// Log a deallocator run
#[inline]
pub fn log_deallocation(label: &str, bytes: usize, reclaimed: bool) {
    trace!(
        target: "nativeport::handle",
        event = "deallocation",
        label,
        bytes,
        reclaimed,
        "native memory released"
    );
}

/// Log one pass of the admission retry loop
pub fn log_admission_retry(attempt: u32, requested: usize, total: usize, physical: Option<usize>) {
    debug!(
        target: "nativeport::tracker",
        event = "admission_retry",
        attempt,
        requested,
        total,
        physical = ?physical,
        "allocation over limits, reclaiming before retry"
    );
}

/// Log a refused admission
pub fn log_admission_refused(message: &str) {
    warn!(
        target: "nativeport::tracker",
        event = "admission_refused",
        message,
        "allocation refused"
    );
}

/// Log how long an admission spent in the retry loop before it settled
pub fn log_admission_settled(attempts: u32, requested: usize, waited: Duration, admitted: bool) {
    debug!(
        target: "nativeport::tracker",
        event = "admission_settled",
        attempts,
        requested,
        waited_us = waited.as_micros() as u64,
        admitted,
        "admission settled after retries"
    );
}

/// Log the reclamation thread lifecycle
pub fn log_reclaimer(started: bool) {
    let event = if started { "reclaimer_start" } else { "reclaimer_stop" };
    info!(
        target: "nativeport::tracker",
        event,
        "deallocator thread {}",
        if started { "started" } else { "stopped" }
    );
}

/// Log an entry point crossing into or out of native code
#[inline]
pub fn log_ffi_call(function: &str, args: usize) {
    trace!(
        target: "nativeport::ffi",
        event = "ffi_call",
        function,
        args,
        "native call"
    );
}

/// Log a library load
pub fn log_library_load(name: &str, path: &str) {
    debug!(
        target: "nativeport::loader",
        event = "library_load",
        name,
        path,
        "library loaded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_parse() {
        assert_eq!(parse_level("TRACE"), Some(Level::TRACE));
        assert_eq!(parse_level(" warn "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn init_idempotent() {
        init_with_config(LogConfig::debug());
        init();
        assert!(is_initialized());
        log_allocation("int", 0x1000, 16);
        log_deallocation("int", 16, false);
        log_admission_settled(2, 64, Duration::from_micros(150), true);
    }
}
