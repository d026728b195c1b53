//! Logging infrastructure - structured tracing for pool events
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log level via environment
//! - Zero-cost when no subscriber is installed
//! - Span-based timing of coalescing passes
//! - Console or file output, plain or JSON

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::PoolError;
use crate::pool::PoolFlags;

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; console output when `None`
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

        // MEMPOOL_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("MEMPOOL_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // MEMPOOL_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("MEMPOOL_LOG_FILE") {
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("MEMPOOL_LOG_JSON").is_ok();
        config.show_spans = std::env::var("MEMPOOL_LOG_SPANS").is_ok();

        config
    }

    /// Verbose config for chasing allocator bugs
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            show_spans: true,
            ..Self::default()
        }
    }
}

fn parse_level(value: &str) -> Option<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber; later calls are no-ops.
/// If another subscriber is already set globally, that one is kept.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("mempool={}", config.level.as_str().to_lowercase()))
        });

        let layer = match config.log_path.as_deref().and_then(file_writer) {
            Some(writer) => fmt_layer(writer, &config, env_filter),
            None => fmt_layer(io::stderr, &config, env_filter),
        };

        tracing_subscriber::registry().with(layer).try_init().ok();
    });
}

fn file_writer(path: &str) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let path = Path::new(path);
    let file_name = path.file_name()?;
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    FILE_GUARD.set(guard).ok()?;
    Some(writer)
}

fn fmt_layer<W>(
    writer: W,
    config: &LogConfig,
    filter: EnvFilter,
) -> Box<dyn Layer<Registry> + Send + Sync + 'static>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if config.show_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_span_events(span_events)
        .with_target(true)
        .with_thread_ids(cfg!(debug_assertions))
        .with_line_number(cfg!(debug_assertions));

    if config.json_format {
        layer.json().with_filter(filter).boxed()
    } else {
        layer.with_filter(filter).boxed()
    }
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Pool events
// ============================================================================

pub fn log_pool_create(capacity: usize, flags: PoolFlags) {
    tracing::info!(
        event = "pool_create",
        capacity,
        flags = ?flags,
        "Memory pool created"
    );
}

pub fn log_pool_reset(capacity: usize) {
    tracing::info!(event = "pool_reset", capacity, "Memory pool reset");
}

pub fn log_pool_destroy(segments: usize, capacity: usize) {
    tracing::info!(
        event = "pool_destroy",
        segments,
        capacity,
        "Memory pool destroyed"
    );
}

/// Log memory allocation
#[inline]
pub fn log_allocation(size: usize, addr: usize) {
    tracing::trace!(
        event = "allocation",
        size_bytes = size,
        address = format_args!("{:#x}", addr),
        "Memory allocated"
    );
}

/// Log memory deallocation
#[inline]
pub fn log_free(addr: usize) {
    tracing::trace!(
        event = "free",
        address = format_args!("{:#x}", addr),
        "Memory freed"
    );
}

pub fn log_growth(segment: usize, previous_largest: usize, capacity: usize) {
    tracing::info!(
        event = "pool_grow",
        segment,
        previous_largest,
        capacity,
        "Chained new pool segment"
    );
}

pub fn log_coalesce(segment: usize, merges: usize) {
    tracing::debug!(event = "coalesce", segment, merges, "Coalescing pass complete");
}

/// Header that should hold a signature but does not
pub fn log_corruption(segment: usize, offset: usize) {
    tracing::warn!(
        event = "corruption",
        segment,
        offset,
        "Block header signature missing, walk stopped"
    );
}

/// Operation refused without touching pool state
pub fn log_rejected(operation: &str, error: &PoolError) {
    tracing::debug!(
        event = "rejected",
        operation,
        reason = error.kind(),
        error = %error,
        "Pool operation rejected"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(config.log_path.is_none());

        let debug_config = LogConfig::debug();
        assert_eq!(debug_config.level, Level::TRACE);
        assert!(debug_config.show_spans);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level("warn"), Some(Level::WARN));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn test_init_idempotent() {
        init();
        init(); // Should not panic
        assert!(is_initialized());
    }
}
