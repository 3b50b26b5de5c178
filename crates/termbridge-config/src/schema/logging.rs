//! Logging configuration types.

use serde::{Deserialize, Serialize};

/// Environment variable that turns on verbose terminal logging.
pub const DEBUG_ENV_VAR: &str = "PTY_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when no CLI override is given.
    pub level: String,
    /// Raise termbridge crates to `debug` regardless of `level`.
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "termbridge=info".into(),
            debug: false,
        }
    }
}

impl LoggingConfig {
    /// Apply the `PTY_DEBUG` toggle read from the environment.
    pub fn apply_env(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            let value = value.trim().to_ascii_lowercase();
            self.debug = matches!(value.as_str(), "1" | "true" | "yes" | "on");
        }
    }

    /// Effective filter directive.
    pub fn directive(&self) -> String {
        if self.debug {
            format!("{},termbridge=debug", self.level)
        } else {
            self.level.clone()
        }
    }
}
