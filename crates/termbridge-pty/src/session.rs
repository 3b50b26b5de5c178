//! A client session: the terminals it owns, keyed by task id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use termbridge_common::{
    EventSink, RunState, SessionId, TaskId, TaskStatus, TaskSummary, TermError, ValidationError,
};
use termbridge_config::{TermbridgeConfig, TerminalConfig};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::emitter::Emitter;
use crate::escalate::{Escalate, ProcessGroup};
use crate::escalator::{InterruptOutcome, SignalEscalator, MSG_NOT_FOUND, MSG_NOT_RUNNING};
use crate::pump::{OutputPump, PumpSettings};
use crate::size::TerminalSize;
use crate::terminal::{lock, Terminal};

/// Coarse task status for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLookup {
    NotFound,
    Running,
    Completed,
}

enum Slot {
    /// Reserved while the PTY is being spawned.
    Creating,
    Ready(Arc<Terminal>),
}

pub struct Session {
    id: SessionId,
    emitter: Emitter,
    terminal_config: TerminalConfig,
    escalator: SignalEscalator,
    pump_settings: PumpSettings,
    terminals: Mutex<HashMap<TaskId, Slot>>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(id: SessionId, sink: Arc<dyn EventSink>, config: &TermbridgeConfig) -> Self {
        Self {
            emitter: Emitter::new(id.clone(), sink),
            id,
            terminal_config: config.terminal.clone(),
            escalator: SignalEscalator::new(config.escalation.clone()),
            pump_settings: PumpSettings::new(&config.terminal, &config.escalation),
            terminals: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start a terminal for `task_id`.
    ///
    /// Validation happens synchronously; everything after `creating` is
    /// reported through events by the returned background task.
    pub fn create_terminal(
        self: &Arc<Self>,
        task_id: &str,
        command: &str,
        rows: Option<u16>,
        cols: Option<u16>,
    ) -> Result<JoinHandle<()>, TermError> {
        if task_id.is_empty() {
            return Err(ValidationError::MissingTaskId.into());
        }
        let command = command.trim();
        if command.is_empty() {
            return Err(ValidationError::EmptyCommand.into());
        }
        if self.is_closed() {
            return Err(TermError::ShuttingDown);
        }

        {
            let mut terminals = lock(&self.terminals);
            if terminals.contains_key(task_id) {
                return Err(ValidationError::DuplicateTask(task_id.to_string()).into());
            }
            terminals.insert(task_id.to_string(), Slot::Creating);
        }

        let size = TerminalSize::new(
            rows.unwrap_or(self.terminal_config.default_rows),
            cols.unwrap_or(self.terminal_config.default_cols),
        );
        debug!(session = %self.id, task = task_id, command, "creating terminal");
        self.emitter.status(task_id, TaskStatus::Creating, Some(command));

        let session = Arc::clone(self);
        let task_id = task_id.to_string();
        let command = command.to_string();
        Ok(tokio::spawn(async move {
            session.finish_create(task_id, command, size).await;
        }))
    }

    async fn finish_create(&self, task_id: TaskId, command: String, size: TerminalSize) {
        let config = self.terminal_config.clone();
        let (spawn_task, spawn_command) = (task_id.clone(), command.clone());
        let spawned = tokio::task::spawn_blocking(move || {
            Terminal::spawn(&spawn_task, &spawn_command, size, &config)
        })
        .await;

        let (terminal, source) = match spawned {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                error!(session = %self.id, task = %task_id, "failed to create terminal: {e}");
                self.abandon_slot(&task_id);
                return;
            }
            Err(e) => {
                error!(session = %self.id, task = %task_id, "terminal spawn task failed: {e}");
                self.abandon_slot(&task_id);
                return;
            }
        };
        let terminal = Arc::new(terminal);

        let installed = {
            let mut terminals = lock(&self.terminals);
            let reserved = matches!(terminals.get(&task_id), Some(Slot::Creating));
            if reserved && !self.is_closed() {
                terminals.insert(task_id.clone(), Slot::Ready(Arc::clone(&terminal)));
                true
            } else {
                false
            }
        };
        if !installed {
            debug!(session = %self.id, task = %task_id, "session closed during creation");
            self.teardown(&terminal).await;
            return;
        }

        terminal.set_state(RunState::Running);
        self.emitter.status(&task_id, TaskStatus::Running, Some(&command));

        if let Err(e) = OutputPump::start(&terminal, source, self.emitter.clone(), self.pump_settings) {
            error!(session = %self.id, task = %task_id, "failed to start output pump: {e}");
            terminal.set_state(RunState::Failed);
            lock(&self.terminals).remove(&task_id);
            self.emitter.error(Some(&task_id), "Failed to create terminal");
            self.teardown(&terminal).await;
            return;
        }
        info!(session = %self.id, task = %task_id, pid = ?terminal.pid(), "terminal running");
    }

    fn abandon_slot(&self, task_id: &str) {
        {
            let mut terminals = lock(&self.terminals);
            if matches!(terminals.get(task_id), Some(Slot::Creating)) {
                terminals.remove(task_id);
            }
        }
        self.emitter.error(Some(task_id), "Failed to create terminal");
    }

    /// The terminal for `task_id`, once it has been created.
    pub fn terminal(&self, task_id: &str) -> Option<Arc<Terminal>> {
        match lock(&self.terminals).get(task_id) {
            Some(Slot::Ready(terminal)) => Some(Arc::clone(terminal)),
            _ => None,
        }
    }

    /// Send raw input to a running terminal.
    pub async fn write(&self, task_id: &str, data: &str) -> bool {
        let Some(terminal) = self.terminal(task_id) else {
            debug!(session = %self.id, task = task_id, "input for unknown task");
            return false;
        };
        if !terminal.is_running() {
            debug!(session = %self.id, task = task_id, "input for finished task");
            return false;
        }

        let bytes = data.as_bytes().to_vec();
        let target = Arc::clone(&terminal);
        match tokio::task::spawn_blocking(move || target.write(&bytes)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(session = %self.id, task = task_id, "failed to write to terminal: {e}");
                false
            }
            Err(e) => {
                warn!(session = %self.id, task = task_id, "write task failed: {e}");
                false
            }
        }
    }

    /// Resize a terminal. Silent: no event is emitted either way.
    pub fn resize(&self, task_id: &str, rows: u16, cols: u16) -> bool {
        let Some(terminal) = self.terminal(task_id) else {
            return false;
        };
        match terminal.resize(TerminalSize::new(rows, cols)) {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %self.id, task = task_id, "failed to resize terminal: {e}");
                false
            }
        }
    }

    pub async fn interrupt(&self, task_id: &str) -> InterruptOutcome {
        let found = lock(&self.terminals).get(task_id).map(|slot| match slot {
            Slot::Ready(terminal) => Some(Arc::clone(terminal)),
            Slot::Creating => None,
        });
        let Some(found) = found else {
            debug!(session = %self.id, task = task_id, "terminal not found for interrupt");
            self.emitter.system(task_id, MSG_NOT_FOUND);
            return InterruptOutcome::NotFound;
        };
        // Creation cannot be cancelled; only a running terminal can.
        let Some(terminal) = found else {
            self.emitter.system(task_id, MSG_NOT_RUNNING);
            return InterruptOutcome::NotRunning;
        };
        self.escalator.interrupt(&terminal, &self.emitter).await
    }

    /// Tear down every terminal. Safe to call more than once.
    pub async fn cleanup(&self) {
        self.closed.store(true, Ordering::Release);
        let terminals: Vec<Arc<Terminal>> = lock(&self.terminals)
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Ready(terminal) => Some(terminal),
                Slot::Creating => None,
            })
            .collect();
        if terminals.is_empty() {
            return;
        }

        info!(session = %self.id, count = terminals.len(), "cleaning up terminals");
        join_all(terminals.iter().map(|terminal| self.teardown(terminal))).await;
    }

    /// Stop every process of one terminal, let its pump flush, and close it.
    async fn teardown(&self, terminal: &Arc<Terminal>) {
        let group = ProcessGroup(terminal.as_ref());
        if !group.has_exited() {
            let plan = self.escalator.teardown_plan();
            if let Err(e) = self.escalator.run(&group, &plan).await {
                warn!(session = %self.id, task = terminal.task_id(), "teardown escalation failed: {e}");
            }
        }
        if let Some(pump) = terminal.take_pump() {
            if !terminal.wait_finished(self.terminal_config.flush_grace()).await {
                debug!(session = %self.id, task = terminal.task_id(), "aborting output pump");
                pump.abort();
            }
        }
        terminal.close();
    }

    pub fn running_tasks(&self) -> Vec<TaskId> {
        lock(&self.terminals)
            .iter()
            .filter_map(|(task_id, slot)| match slot {
                Slot::Ready(terminal) if terminal.is_running() => Some(task_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn task_status(&self, task_id: &str) -> TaskLookup {
        match lock(&self.terminals).get(task_id) {
            None => TaskLookup::NotFound,
            Some(Slot::Creating) => TaskLookup::Running,
            Some(Slot::Ready(terminal)) if terminal.state().is_finished() => TaskLookup::Completed,
            Some(Slot::Ready(_)) => TaskLookup::Running,
        }
    }

    /// Summaries of created terminals, oldest first.
    pub fn tasks(&self) -> Vec<TaskSummary> {
        let mut tasks: Vec<TaskSummary> = lock(&self.terminals)
            .values()
            .filter_map(|slot| match slot {
                Slot::Ready(terminal) => Some(terminal.summary()),
                Slot::Creating => None,
            })
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.task_id.cmp(&b.task_id)));
        tasks
    }

    pub fn len(&self) -> usize {
        lock(&self.terminals).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("terminals", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
