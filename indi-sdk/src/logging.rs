//! Logging setup for drivers and clients
//!
//! Library code only emits `tracing` events; nothing is printed until the
//! embedding program installs a subscriber through this module. Output
//! always goes to stderr: a driver attached over stdio owns stdout for the
//! protocol itself.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber at all
    Silent,
    /// Compact stderr output at info level
    Development,
    /// Verbose output with thread ids and source locations
    Debug,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Initialize logging with the specified mode
///
/// Call once, early. A second call fails with [`LoggingError::TracingInit`].
///
/// # Environment Variables
///
/// - `INDI_LOG_LEVEL`: override the level (error, warn, info, debug, trace)
/// - `INDI_LOG_TARGET`: only log this target, e.g. `indi_driver`
///
/// ```rust,no_run
/// use indi_sdk::logging::{init_logging, LoggingMode};
///
/// init_logging(LoggingMode::Development).unwrap();
/// ```
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;
            Registry::default()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .with_thread_ids(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;
            Registry::default()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `INDI_LOG_MODE` (silent, development, debug)
///
/// Unset or unrecognised values mean silent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    init_logging(mode_from(std::env::var("INDI_LOG_MODE").ok().as_deref()))
}

/// Whether some subscriber is already installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

fn mode_from(value: Option<&str>) -> LoggingMode {
    match value {
        Some("development") => LoggingMode::Development,
        Some("debug") => LoggingMode::Debug,
        _ => LoggingMode::Silent,
    }
}

fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let level = std::env::var("INDI_LOG_LEVEL").ok();
    let target = std::env::var("INDI_LOG_TARGET").ok();
    filter_directive(level.as_deref(), target.as_deref(), default_level)
        .and_then(|directive| {
            EnvFilter::try_new(&directive)
                .map_err(|e| LoggingError::InvalidEnv(format!("{}: {}", directive, e)))
        })
}

/// Build the filter directive from the optional overrides
fn filter_directive(
    level: Option<&str>,
    target: Option<&str>,
    default_level: &str,
) -> Result<String, LoggingError> {
    let level = match level {
        Some(level) => {
            let level = level.trim().to_ascii_lowercase();
            if !LEVELS.contains(&level.as_str()) {
                return Err(LoggingError::InvalidEnv(format!(
                    "INDI_LOG_LEVEL={} (expected one of {})",
                    level,
                    LEVELS.join(", ")
                )));
            }
            level
        }
        None => default_level.to_string(),
    };

    match target.map(str::trim).filter(|t| !t.is_empty()) {
        Some(target) => Ok(format!("{}={}", target, level)),
        None => Ok(level),
    }
}
