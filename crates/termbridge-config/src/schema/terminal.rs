//! PTY and shell process configuration types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

fn default_shell() -> String {
    if cfg!(windows) {
        "cmd.exe".into()
    } else {
        "/bin/sh".into()
    }
}

/// Terminal process settings.
///
/// Controls which shell runs task commands, the default window size,
/// and the timing of the output pump.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shell used to run commands (`<shell> -c <command>`).
    pub shell: String,
    /// Rows used when a command omits them (valid range: 1-1000).
    pub default_rows: u16,
    /// Columns used when a command omits them (valid range: 1-1000).
    pub default_cols: u16,
    /// Maximum bytes per PTY read (valid range: 512-65536).
    pub read_chunk_bytes: usize,
    /// Readiness wait bound and exit re-check period (valid range: 10-1000).
    pub poll_interval_ms: u64,
    /// Time allowed for the final exit status and pump flush.
    pub flush_grace_ms: u64,
    /// Deadline for delivering one input payload under backpressure.
    pub write_deadline_ms: u64,
    /// Working directory for spawned commands. `None` inherits the server's.
    pub working_directory: Option<String>,
    /// Extra environment variables, applied after the color defaults.
    pub env: HashMap<String, String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            default_rows: 24,
            default_cols: 80,
            read_chunk_bytes: 4096,
            poll_interval_ms: 100,
            flush_grace_ms: 1000,
            write_deadline_ms: 2000,
            working_directory: None,
            env: HashMap::new(),
        }
    }
}

impl TerminalConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn flush_grace(&self) -> Duration {
        Duration::from_millis(self.flush_grace_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }
}
