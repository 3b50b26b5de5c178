//! Server-to-client events and the sink they are emitted through.
//!
//! The terminal core only ever talks to an [`EventSink`]; the transport that
//! drains it (WebSocket, tests, anything else) is decided by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::id::{SessionId, TaskId};

/// Exit code reported when the process status could not be determined.
pub const EXIT_CODE_UNKNOWN: i32 = -1;

/// Exit code reported when a task was stopped by the interrupt protocol.
pub const EXIT_CODE_INTERRUPTED: i32 = -2;

/// Lifecycle status as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Creating,
    Running,
    Idle,
}

/// Origin of an output payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Raw bytes read from the PTY master.
    Pty,
    /// Informational text generated by the server itself.
    System,
    /// Line-buffered output of a pipe-based process.
    Stdout,
}

/// Internal run-state of one terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Creating,
    Running,
    Idle,
    Interrupted,
    Failed,
}

impl RunState {
    /// Idle, Interrupted and Failed accept no further input or interrupts.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Idle | Self::Interrupted | Self::Failed)
    }
}

/// Snapshot of one task, returned by task listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub command: String,
    pub state: RunState,
    pub rows: u16,
    pub cols: u16,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Connected {
        session_id: SessionId,
        message: String,
        features: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    Status {
        session_id: SessionId,
        task_id: TaskId,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Output {
        session_id: SessionId,
        task_id: TaskId,
        output: String,
        #[serde(rename = "type")]
        kind: OutputKind,
    },

    #[serde(rename_all = "camelCase")]
    Complete {
        session_id: SessionId,
        task_id: TaskId,
        exit_code: i32,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    Error {
        session_id: Option<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    Health {
        available: bool,
        terminal_type: String,
        features: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    Tasks {
        session_id: SessionId,
        tasks: Vec<TaskSummary>,
    },
}

impl ServerEvent {
    /// Task this event belongs to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Status { task_id, .. }
            | Self::Output { task_id, .. }
            | Self::Complete { task_id, .. } => Some(task_id),
            Self::Error { task_id, .. } => task_id.as_deref(),
            _ => None,
        }
    }
}

/// Human-readable completion message for an exit code.
pub fn completion_message(exit_code: i32) -> String {
    if exit_code == EXIT_CODE_INTERRUPTED {
        "Terminal interrupted by user".to_string()
    } else {
        format!("Process exited with code {exit_code}")
    }
}

/// Destination for server events. Emitting never blocks and never fails from
/// the caller's point of view; a closed transport drops the event.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ServerEvent);
}

impl EventSink for mpsc::UnboundedSender<ServerEvent> {
    fn emit(&self, event: ServerEvent) {
        if self.send(event).is_err() {
            tracing::trace!("event dropped: receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_event_wire_shape() {
        let event = ServerEvent::Output {
            session_id: SessionId::from("S1"),
            task_id: "T1".into(),
            output: "hi\r\n".into(),
            kind: OutputKind::Pty,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "output",
                "sessionId": "S1",
                "taskId": "T1",
                "output": "hi\r\n",
                "type": "pty"
            })
        );
    }

    #[test]
    fn status_event_omits_missing_command() {
        let event = ServerEvent::Status {
            session_id: SessionId::from("S1"),
            task_id: "T1".into(),
            status: TaskStatus::Idle,
            command: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"event": "status", "sessionId": "S1", "taskId": "T1", "status": "idle"})
        );
    }

    #[test]
    fn complete_event_uses_camel_case_exit_code() {
        let event = ServerEvent::Complete {
            session_id: SessionId::from("S1"),
            task_id: "T1".into(),
            exit_code: EXIT_CODE_INTERRUPTED,
            message: completion_message(EXIT_CODE_INTERRUPTED),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "complete");
        assert_eq!(value["exitCode"], -2);
        assert_eq!(value["message"], "Terminal interrupted by user");
    }

    #[test]
    fn completion_message_for_normal_exit() {
        assert_eq!(completion_message(0), "Process exited with code 0");
        assert_eq!(completion_message(EXIT_CODE_UNKNOWN), "Process exited with code -1");
    }

    #[test]
    fn exit_code_sentinels_are_distinct() {
        assert_ne!(EXIT_CODE_UNKNOWN, EXIT_CODE_INTERRUPTED);
        assert!(EXIT_CODE_UNKNOWN < 0 && EXIT_CODE_INTERRUPTED < 0);
    }

    #[test]
    fn run_state_finished_states() {
        assert!(!RunState::Creating.is_finished());
        assert!(!RunState::Running.is_finished());
        assert!(RunState::Idle.is_finished());
        assert!(RunState::Interrupted.is_finished());
        assert!(RunState::Failed.is_finished());
    }

    #[test]
    fn task_id_accessor() {
        let event = ServerEvent::Error {
            session_id: None,
            task_id: Some("T9".into()),
            error: "boom".into(),
        };
        assert_eq!(event.task_id(), Some("T9"));

        let event = ServerEvent::Health {
            available: true,
            terminal_type: "pty".into(),
            features: vec![],
        };
        assert_eq!(event.task_id(), None);
    }

    #[tokio::test]
    async fn unbounded_sender_is_an_event_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: &dyn EventSink = &tx;
        sink.emit(ServerEvent::Health {
            available: true,
            terminal_type: "pty".into(),
            features: vec!["pty".into()],
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ServerEvent::Health { available: true, .. }));
    }

    #[test]
    fn emitting_into_closed_channel_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel::<ServerEvent>();
        drop(rx);
        tx.emit(ServerEvent::Error {
            session_id: None,
            task_id: None,
            error: "nobody listening".into(),
        });
    }
}
