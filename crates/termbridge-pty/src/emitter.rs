//! Session-scoped event emission.

use std::sync::Arc;

use termbridge_common::{
    completion_message, EventSink, OutputKind, ServerEvent, SessionId, TaskStatus,
};

/// Stamps every event with its session id before handing it to the sink.
#[derive(Clone)]
pub struct Emitter {
    session_id: SessionId,
    sink: Arc<dyn EventSink>,
}

impl Emitter {
    pub fn new(session_id: SessionId, sink: Arc<dyn EventSink>) -> Self {
        Self { session_id, sink }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn emit(&self, event: ServerEvent) {
        self.sink.emit(event);
    }

    pub fn status(&self, task_id: &str, status: TaskStatus, command: Option<&str>) {
        self.emit(ServerEvent::Status {
            session_id: self.session_id.clone(),
            task_id: task_id.to_string(),
            status,
            command: command.map(str::to_string),
        });
    }

    pub fn output(&self, task_id: &str, output: String, kind: OutputKind) {
        self.emit(ServerEvent::Output {
            session_id: self.session_id.clone(),
            task_id: task_id.to_string(),
            output,
            kind,
        });
    }

    pub fn system(&self, task_id: &str, text: &str) {
        self.output(task_id, text.to_string(), OutputKind::System);
    }

    pub fn complete(&self, task_id: &str, exit_code: i32) {
        self.emit(ServerEvent::Complete {
            session_id: self.session_id.clone(),
            task_id: task_id.to_string(),
            exit_code,
            message: completion_message(exit_code),
        });
    }

    pub fn error(&self, task_id: Option<&str>, error: impl Into<String>) {
        self.emit(ServerEvent::Error {
            session_id: Some(self.session_id.clone()),
            task_id: task_id.map(str::to_string),
            error: error.into(),
        });
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[test]
    fn events_carry_session_id() {
        let sink = RecordingSink::new();
        let emitter = Emitter::new(SessionId::from("S1"), sink.clone());
        emitter.status("T1", TaskStatus::Running, Some("ls"));
        emitter.complete("T1", 0);
        emitter.error(None, "boom");

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            ServerEvent::Status { session_id, status: TaskStatus::Running, command: Some(c), .. }
                if session_id.as_str() == "S1" && c == "ls"
        ));
        assert!(matches!(
            &events[1],
            ServerEvent::Complete { exit_code: 0, message, .. } if message == "Process exited with code 0"
        ));
        assert!(matches!(
            &events[2],
            ServerEvent::Error { session_id: Some(_), task_id: None, error } if error == "boom"
        ));
    }

    #[test]
    fn system_output_is_tagged_system() {
        let sink = RecordingSink::new();
        let emitter = Emitter::new(SessionId::from("S1"), sink.clone());
        emitter.system("T1", "Terminal not found.\r\n");
        assert_eq!(sink.outputs("T1", OutputKind::System), "Terminal not found.\r\n");
    }
}
