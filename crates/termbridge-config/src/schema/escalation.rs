//! Timing of the interrupt and teardown protocols.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Wait after the interrupt byte before terminating the group.
    pub interrupt_grace_ms: u64,
    /// Wait after the terminate signal before force-killing the group.
    pub terminate_grace_ms: u64,
    /// Wait after the platform terminate primitive where no process groups exist.
    pub platform_terminate_grace_ms: u64,
    /// Wait after the terminate signal during unconditional teardown.
    pub cleanup_grace_ms: u64,
    /// Upper bound on reaping a force-killed process.
    pub reap_timeout_ms: u64,
    /// Exit-status polling step used by every wait above.
    pub poll_step_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            interrupt_grace_ms: 500,
            terminate_grace_ms: 3000,
            platform_terminate_grace_ms: 2000,
            cleanup_grace_ms: 2000,
            reap_timeout_ms: 5000,
            poll_step_ms: 20,
        }
    }
}

impl EscalationConfig {
    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn platform_terminate_grace(&self) -> Duration {
        Duration::from_millis(self.platform_terminate_grace_ms)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    pub fn reap_timeout(&self) -> Duration {
        Duration::from_millis(self.reap_timeout_ms)
    }

    pub fn poll_step(&self) -> Duration {
        Duration::from_millis(self.poll_step_ms.max(1))
    }
}
