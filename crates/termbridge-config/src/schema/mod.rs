//! Configuration schema types for termbridge.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod escalation;
mod logging;
mod server;
mod terminal;

pub use escalation::*;
pub use logging::*;
pub use server::*;
pub use terminal::*;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TermbridgeConfig {
    pub server: ServerConfig,
    pub terminal: TerminalConfig,
    pub escalation: EscalationConfig,
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: TermbridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.terminal.default_rows, 24);
        assert_eq!(config.escalation.interrupt_grace_ms, 500);
        assert!(!config.logging.debug);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let toml_str = r#"
[server]
port = 7000

[escalation]
terminate_grace_ms = 1000
"#;
        let config: TermbridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.escalation.terminate_grace_ms, 1000);
        assert_eq!(config.escalation.interrupt_grace_ms, 500);
        assert_eq!(config.terminal.read_chunk_bytes, 4096);
    }
}
