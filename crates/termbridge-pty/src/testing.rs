//! Test helpers shared by the unit tests of this crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use termbridge_common::{EventSink, OutputKind, ServerEvent, TaskStatus};

/// Event sink that records everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ServerEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn task_events(&self, task: &str) -> Vec<ServerEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.task_id() == Some(task))
            .collect()
    }

    /// Concatenated output of one kind for a task.
    pub fn outputs(&self, task: &str, kind: OutputKind) -> String {
        self.task_events(task)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Output { output, kind: k, .. } if k == kind => Some(output),
                _ => None,
            })
            .collect()
    }

    pub fn completion(&self, task: &str) -> Option<i32> {
        self.task_events(task).into_iter().find_map(|e| match e {
            ServerEvent::Complete { exit_code, .. } => Some(exit_code),
            _ => None,
        })
    }

    pub fn statuses(&self, task: &str) -> Vec<TaskStatus> {
        self.task_events(task)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    /// Wait until `pred` holds for the recorded events.
    pub async fn wait_for<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&[ServerEvent]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if pred(&self.events()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait for the final `idle` status of a task.
    pub async fn wait_idle(&self, task: &str, timeout: Duration) -> bool {
        self.wait_for(timeout, |events| {
            events.iter().any(|e| {
                matches!(e, ServerEvent::Status { task_id, status: TaskStatus::Idle, .. } if task_id == task)
            })
        })
        .await
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ServerEvent) {
        self.events.lock().unwrap().push(event);
    }
}
