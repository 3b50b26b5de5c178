//! Routes client events to the session registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use termbridge_common::{EventSink, ServerEvent, SessionId, TaskId, TermError, ValidationError};
use termbridge_pty::{Session, SessionRegistry};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::protocol::ClientEvent;

/// Per-connection state: where events go, which sessions to clean up when
/// the connection closes, and the input queue of each task written to.
pub struct ConnectionState {
    pub events: Arc<dyn EventSink>,
    pub owned: HashSet<SessionId>,
    inputs: HashMap<(SessionId, TaskId), mpsc::UnboundedSender<String>>,
}

impl ConnectionState {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            events,
            owned: HashSet::new(),
            inputs: HashMap::new(),
        }
    }

    /// Queue input for a task. Writes to one task keep their order; a slow
    /// task never holds up the connection or its sibling tasks.
    fn queue_input(&mut self, session: Arc<Session>, task_id: TaskId, data: String) {
        let key = (session.id().clone(), task_id);
        let data = match self.inputs.get(&key) {
            Some(queue) => match queue.send(data) {
                Ok(()) => return,
                Err(mpsc::error::SendError(data)) => data,
            },
            None => data,
        };
        let queue = spawn_input_writer(session, key.1.clone(), Arc::clone(&self.events));
        if queue.send(data).is_ok() {
            self.inputs.insert(key, queue);
        }
    }

    fn drop_inputs(&mut self, session_id: &SessionId) {
        self.inputs.retain(|(id, _), _| id != session_id);
    }

    fn error(&self, session_id: Option<&str>, task_id: Option<&str>, error: impl Into<String>) {
        self.events.emit(ServerEvent::Error {
            session_id: session_id.map(SessionId::from),
            task_id: task_id.map(str::to_string),
            error: error.into(),
        });
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, event: ClientEvent, conn: &mut ConnectionState) {
        debug!(event = event.name(), "client event");
        match event {
            ClientEvent::Connect => match self.registry.connect(Arc::clone(&conn.events)).await {
                Ok(id) => {
                    conn.owned.insert(id);
                }
                Err(e) => conn.error(None, None, e.to_string()),
            },

            ClientEvent::Command {
                session_id,
                task_id,
                command,
                rows,
                cols,
            } => {
                let Some(session) = self.require_session(conn, session_id.as_deref(), task_id.as_deref()).await
                else {
                    return;
                };
                let task_id = task_id.unwrap_or_default();
                let command = command.unwrap_or_default();
                if let Err(e) = session.create_terminal(&task_id, &command, rows, cols) {
                    log_rejection(&e);
                    let task = (!task_id.is_empty()).then_some(task_id.as_str());
                    conn.error(Some(session.id().as_str()), task, e.to_string());
                }
            }

            ClientEvent::Input {
                session_id,
                task_id,
                data,
            } => {
                let Some(session) = self.lookup(session_id.as_deref()).await else {
                    warn!(session = ?session_id, "input for unknown session");
                    return;
                };
                let Some(task_id) = task_id.filter(|t| !t.is_empty()) else {
                    warn!(session = %session.id(), "input without task id");
                    return;
                };
                conn.queue_input(session, task_id, data);
            }

            ClientEvent::Resize {
                session_id,
                task_id,
                rows,
                cols,
            } => {
                let Some(session) = self.lookup(session_id.as_deref()).await else {
                    return;
                };
                let Some(task_id) = task_id else {
                    return;
                };
                let defaults = &self.registry.config().terminal;
                session.resize(
                    &task_id,
                    rows.unwrap_or(defaults.default_rows),
                    cols.unwrap_or(defaults.default_cols),
                );
            }

            ClientEvent::Interrupt {
                session_id,
                task_id,
            } => {
                let Some(session) = self.require_session(conn, session_id.as_deref(), task_id.as_deref()).await
                else {
                    return;
                };
                let Some(task_id) = task_id.filter(|t| !t.is_empty()) else {
                    conn.error(
                        Some(session.id().as_str()),
                        None,
                        ValidationError::MissingTaskId.to_string(),
                    );
                    return;
                };
                // Escalation can take seconds; keep reading the connection.
                tokio::spawn(async move {
                    let outcome = session.interrupt(&task_id).await;
                    debug!(task = %task_id, ?outcome, "interrupt finished");
                });
            }

            ClientEvent::Disconnect { session_id } => {
                let Some(session_id) = session_id.filter(|s| !s.is_empty()) else {
                    return;
                };
                let id = SessionId::from(session_id);
                conn.owned.remove(&id);
                conn.drop_inputs(&id);
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    registry.disconnect(&id).await;
                });
            }

            ClientEvent::Health => conn.events.emit(self.registry.health()),

            ClientEvent::Tasks { session_id } => {
                let Some(session) = self.require_session(conn, session_id.as_deref(), None).await else {
                    return;
                };
                conn.events.emit(ServerEvent::Tasks {
                    session_id: session.id().clone(),
                    tasks: session.tasks(),
                });
            }
        }
    }

    async fn lookup(&self, session_id: Option<&str>) -> Option<Arc<Session>> {
        let id = session_id.filter(|s| !s.is_empty())?;
        self.registry.get(&SessionId::from(id)).await
    }

    /// Look up a session, reporting an error event when it does not exist.
    async fn require_session(
        &self,
        conn: &ConnectionState,
        session_id: Option<&str>,
        task_id: Option<&str>,
    ) -> Option<Arc<Session>> {
        if let Some(session) = self.lookup(session_id).await {
            return Some(session);
        }
        let session_id = session_id.filter(|s| !s.is_empty());
        let err = ValidationError::UnknownSession(session_id.unwrap_or("unknown").to_string());
        error!("{err}");
        conn.error(session_id, task_id, err.to_string());
        None
    }

    /// Disconnect every session this connection created.
    pub async fn release(&self, conn: &mut ConnectionState) {
        conn.inputs.clear();
        for id in conn.owned.drain() {
            self.registry.disconnect(&id).await;
        }
    }
}

/// Writer task draining one task's input queue in order.
fn spawn_input_writer(
    session: Arc<Session>,
    task_id: TaskId,
    events: Arc<dyn EventSink>,
) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if !session.write(&task_id, &data).await {
                events.emit(ServerEvent::Error {
                    session_id: Some(session.id().clone()),
                    task_id: Some(task_id.clone()),
                    error: "Failed to send input to terminal".into(),
                });
            }
        }
    });
    tx
}

fn log_rejection(err: &TermError) {
    match err {
        TermError::Validation(e) => warn!("command rejected: {e}"),
        other => error!("command failed: {other}"),
    }
}
