//! Configuration for a Store
//!
//! The configuration is read once at construction. Debug mode turns on the
//! double-evaluation impurity check and logs every accepted transition; it
//! is meant for development builds and test suites.

/// Environment variable that enables debug mode in [`StoreConfig::from_env`]
pub const DEBUG_ENV_VAR: &str = "VIEW_STATE_DEBUG";

/// Configuration for a [`Store`](crate::Store)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Evaluate every reducer twice and log accepted transitions
    /// Default: false
    pub debug_mode: bool,

    /// Name used in log fields and impurity reports
    /// Default: "store"
    pub name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            name: "store".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create a StoreConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a StoreConfig with debug mode enabled
    pub fn debug() -> Self {
        Self {
            debug_mode: true,
            ..Default::default()
        }
    }

    /// Read debug mode from `VIEW_STATE_DEBUG`
    ///
    /// `1`, `true`, `yes` and `on` enable it (case-insensitive). Anything
    /// else, or an unset variable, leaves it disabled.
    pub fn from_env() -> Self {
        let debug_mode = std::env::var(DEBUG_ENV_VAR)
            .map(|value| parse_flag(&value))
            .unwrap_or(false);

        Self {
            debug_mode,
            ..Default::default()
        }
    }

    pub fn with_debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
