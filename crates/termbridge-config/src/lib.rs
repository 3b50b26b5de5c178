//! termbridge configuration.
//!
//! TOML-based configuration with full validation. All sections use
//! defaults so partial files work out of the box.

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    EscalationConfig, LoggingConfig, ServerConfig, TermbridgeConfig, TerminalConfig, DEBUG_ENV_VAR,
};

use std::path::Path;
use termbridge_common::ConfigError;

/// Load config from `path`, or from the platform default location when
/// `path` is `None`, then apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<TermbridgeConfig, ConfigError> {
    let mut config = match path {
        Some(path) => toml_loader::load_from_path(path)?,
        None => toml_loader::load_default()?,
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut TermbridgeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    config.logging.apply_env(lookup(DEBUG_ENV_VAR).as_deref());
}
