//! Logging setup for hosts embedding view models
//!
//! The library itself only emits `tracing` events. Hosts pick how (and
//! whether) those events are rendered by initializing one of the modes
//! below, typically once at startup.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable selecting the [`LoggingMode`]
pub const LOG_MODE_ENV_VAR: &str = "VIEW_STATE_LOG_MODE";

/// Environment variable overriding the log filter
pub const LOG_LEVEL_ENV_VAR: &str = "VIEW_STATE_LOG_LEVEL";

/// How log events are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// No subscriber installed; events are dropped
    #[default]
    Silent,
    /// Compact stderr output at `info`
    Development,
    /// Pretty output at `debug` with thread ids and source locations
    Debug,
}

impl LoggingMode {
    /// Parse a mode name as accepted in [`LOG_MODE_ENV_VAR`]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "silent" => Some(LoggingMode::Silent),
            "development" | "dev" => Some(LoggingMode::Development),
            "debug" => Some(LoggingMode::Debug),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
}

/// Install a global subscriber for `mode`
///
/// Fails with [`LoggingError::TracingInit`] if a global subscriber is
/// already set.
///
/// ```rust,ignore
/// view_state::logging::init_logging(LoggingMode::Development)?;
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
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
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
                        .pretty()
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

/// Initialize logging from [`LOG_MODE_ENV_VAR`]
///
/// Unset or unrecognized values fall back to [`LoggingMode::Silent`].
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = std::env::var(LOG_MODE_ENV_VAR)
        .ok()
        .and_then(|value| LoggingMode::parse(&value))
        .unwrap_or_default();

    init_logging(mode)
}

// VIEW_STATE_LOG_LEVEL wins over RUST_LOG, which wins over the mode default
fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var(LOG_LEVEL_ENV_VAR)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter(e.to_string()))
}

pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
