//! Interrupt and teardown protocols, expressed as stage lists over
//! [`Escalate`].

use std::time::Duration;

use termbridge_common::{EscalationError, RunState};
use termbridge_config::EscalationConfig;
use tracing::{debug, info, warn};

use crate::emitter::Emitter;
use crate::escalate::{Delivery, Escalate, EscalationLevel};
use crate::terminal::Terminal;

pub const MSG_NOT_FOUND: &str = "Terminal not found.\r\n";
pub const MSG_NOT_RUNNING: &str = "No running terminal to interrupt.\r\n";
pub const MSG_IN_PROGRESS: &str = "Interrupt already in progress.\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Deliver a signal. A gone target ends the plan successfully.
    Signal(EscalationLevel),
    /// Wait up to the duration; an exit ends the plan successfully.
    Grace(Duration),
    /// Wait up to the duration for exit; still alive is an error.
    Reap(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    Interrupted,
    NotFound,
    NotRunning,
    InProgress,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SignalEscalator {
    config: EscalationConfig,
}

impl SignalEscalator {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// User interrupt: interrupt byte, then terminate, then kill.
    #[cfg(unix)]
    pub fn interrupt_plan(&self) -> Vec<Stage> {
        vec![
            Stage::Signal(EscalationLevel::Interrupt),
            Stage::Grace(self.config.interrupt_grace()),
            Stage::Signal(EscalationLevel::Terminate),
            Stage::Grace(self.config.terminate_grace()),
            Stage::Signal(EscalationLevel::Kill),
            Stage::Reap(self.config.reap_timeout()),
        ]
    }

    /// User interrupt without a line discipline: terminate, then kill.
    #[cfg(not(unix))]
    pub fn interrupt_plan(&self) -> Vec<Stage> {
        vec![
            Stage::Signal(EscalationLevel::Terminate),
            Stage::Grace(self.config.platform_terminate_grace()),
            Stage::Signal(EscalationLevel::Kill),
            Stage::Reap(self.config.reap_timeout()),
        ]
    }

    /// Unconditional teardown skips the polite step.
    pub fn teardown_plan(&self) -> Vec<Stage> {
        vec![
            Stage::Signal(EscalationLevel::Terminate),
            Stage::Grace(self.config.cleanup_grace()),
            Stage::Signal(EscalationLevel::Kill),
            Stage::Reap(self.config.reap_timeout()),
        ]
    }

    /// Run `plan` against `target` until it exits or the plan is exhausted.
    pub async fn run(&self, target: &dyn Escalate, plan: &[Stage]) -> Result<(), EscalationError> {
        for stage in plan {
            match *stage {
                Stage::Signal(level) => {
                    if target.escalate(level)? == Delivery::Gone {
                        debug!(?level, "target already gone");
                        return Ok(());
                    }
                }
                Stage::Grace(limit) => {
                    if self.wait_exit(target, limit).await {
                        return Ok(());
                    }
                }
                Stage::Reap(limit) => {
                    if !self.wait_exit(target, limit).await {
                        return Err(EscalationError::Unreaped(target.pid().unwrap_or(0)));
                    }
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn wait_exit(&self, target: &dyn Escalate, limit: Duration) -> bool {
        let step = self.config.poll_step();
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if target.has_exited() {
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(step.min(deadline - now)).await;
        }
    }

    /// Interrupt a running terminal. System messages for the non-escalating
    /// outcomes and the error event for a failed escalation are emitted here;
    /// the completion events come from the terminal's pump.
    pub async fn interrupt(&self, terminal: &Terminal, emitter: &Emitter) -> InterruptOutcome {
        let task_id = terminal.task_id();
        let Ok(guard) = terminal.escalation.try_lock() else {
            debug!(task = task_id, "interrupt already in progress");
            emitter.system(task_id, MSG_IN_PROGRESS);
            return InterruptOutcome::InProgress;
        };

        if !terminal.is_running() || terminal.has_exited() {
            debug!(task = task_id, state = ?terminal.state(), "no running terminal to interrupt");
            emitter.system(task_id, MSG_NOT_RUNNING);
            return InterruptOutcome::NotRunning;
        }

        info!(task = task_id, pid = ?terminal.pid(), "interrupting terminal");
        if let Err(e) = self.run(terminal, &self.interrupt_plan()).await {
            warn!(task = task_id, "failed to interrupt terminal: {e}");
            emitter.error(Some(task_id), format!("Failed to interrupt terminal: {e}"));
            return InterruptOutcome::Failed;
        }

        terminal.set_state(RunState::Interrupted);
        drop(guard);

        if !terminal.wait_finished(self.config.reap_timeout()).await {
            debug!(task = task_id, "pump still flushing after interrupt");
        }
        info!(task = task_id, "terminal interrupted");
        InterruptOutcome::Interrupted
    }
}
