//! Full configuration validation.
//!
//! Validates numeric ranges and required strings, collecting every
//! violation into a single error.

use crate::schema::TermbridgeConfig;
use termbridge_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &TermbridgeConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    // Server
    if config.server.host.trim().is_empty() {
        errors.push("server.host must not be empty".into());
    }
    validate_range(&mut errors, "server.port", u64::from(config.server.port), 1, 65535);

    // Terminal
    if config.terminal.shell.trim().is_empty() {
        errors.push("terminal.shell must not be empty".into());
    }
    let terminal = &config.terminal;
    validate_range(&mut errors, "terminal.default_rows", u64::from(terminal.default_rows), 1, 1000);
    validate_range(&mut errors, "terminal.default_cols", u64::from(terminal.default_cols), 1, 1000);
    validate_range(
        &mut errors,
        "terminal.read_chunk_bytes",
        terminal.read_chunk_bytes as u64,
        512,
        65536,
    );
    validate_range(&mut errors, "terminal.poll_interval_ms", terminal.poll_interval_ms, 10, 1000);
    validate_range(&mut errors, "terminal.flush_grace_ms", terminal.flush_grace_ms, 0, 30_000);
    validate_range(&mut errors, "terminal.write_deadline_ms", terminal.write_deadline_ms, 1, 60_000);

    // Escalation
    let escalation = &config.escalation;
    validate_range(&mut errors, "escalation.interrupt_grace_ms", escalation.interrupt_grace_ms, 1, 60_000);
    validate_range(&mut errors, "escalation.terminate_grace_ms", escalation.terminate_grace_ms, 1, 60_000);
    validate_range(
        &mut errors,
        "escalation.platform_terminate_grace_ms",
        escalation.platform_terminate_grace_ms,
        1,
        60_000,
    );
    validate_range(&mut errors, "escalation.cleanup_grace_ms", escalation.cleanup_grace_ms, 1, 60_000);
    validate_range(&mut errors, "escalation.reap_timeout_ms", escalation.reap_timeout_ms, 1, 60_000);
    validate_range(&mut errors, "escalation.poll_step_ms", escalation.poll_step_ms, 1, 1000);

    // Logging
    if config.logging.level.trim().is_empty() {
        errors.push("logging.level must not be empty".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_range(errors: &mut Vec<String>, name: &str, value: u64, min: u64, max: u64) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = TermbridgeConfig::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn catches_zero_rows() {
        let mut config = TermbridgeConfig::default();
        config.terminal.default_rows = 0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("terminal.default_rows"));
    }

    #[test]
    fn catches_tiny_read_chunk() {
        let mut config = TermbridgeConfig::default();
        config.terminal.read_chunk_bytes = 16;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("terminal.read_chunk_bytes"));
    }

    #[test]
    fn catches_poll_interval_too_large() {
        let mut config = TermbridgeConfig::default();
        config.terminal.poll_interval_ms = 5000;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("terminal.poll_interval_ms"));
    }

    #[test]
    fn catches_empty_shell() {
        let mut config = TermbridgeConfig::default();
        config.terminal.shell = "  ".into();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("terminal.shell"));
    }

    #[test]
    fn catches_zero_escalation_grace() {
        let mut config = TermbridgeConfig::default();
        config.escalation.terminate_grace_ms = 0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("escalation.terminate_grace_ms"));
    }

    #[test]
    fn collects_multiple_errors() {
        let mut config = TermbridgeConfig::default();
        config.server.port = 0;
        config.terminal.default_cols = 5000;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("server.port"));
        assert!(err.contains("terminal.default_cols"));
        assert!(err.contains("; "));
    }
}
