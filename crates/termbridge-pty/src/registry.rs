//! Process-wide registry of sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use termbridge_common::{EventSink, ServerEvent, SessionId, TermError};
use termbridge_config::TermbridgeConfig;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::session::Session;

pub const CONNECT_MESSAGE: &str = "PTY Terminal session established";
pub const CONNECT_FEATURES: &[&str] = &["pty", "ansi_colors", "interactive", "resize"];
pub const HEALTH_FEATURES: &[&str] = &["pty", "ansi_colors", "interactive", "resize", "multi_task"];

/// Owns every live session. Built once by the composition root and shared
/// by reference; `shutdown` tears everything down exactly once.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    config: TermbridgeConfig,
    shut_down: AtomicBool,
}

impl SessionRegistry {
    pub fn new(config: TermbridgeConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &TermbridgeConfig {
        &self.config
    }

    /// Register a new empty session whose events go to `sink`, and announce
    /// it with a `connected` event.
    pub async fn connect(&self, sink: Arc<dyn EventSink>) -> Result<SessionId, TermError> {
        if self.is_shut_down() {
            return Err(TermError::ShuttingDown);
        }
        let id = SessionId::new();
        let session = Arc::new(Session::new(id.clone(), Arc::clone(&sink), &self.config));
        {
            let mut sessions = self.sessions.write().await;
            // Shutdown may have drained the map while we were waiting.
            if self.is_shut_down() {
                return Err(TermError::ShuttingDown);
            }
            sessions.insert(id.clone(), session);
        }

        sink.emit(ServerEvent::Connected {
            session_id: id.clone(),
            message: CONNECT_MESSAGE.to_string(),
            features: CONNECT_FEATURES.iter().map(|f| f.to_string()).collect(),
        });
        info!(session = %id, "session connected");
        Ok(id)
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Clean up and remove a session. Returns false for unknown ids.
    pub async fn disconnect(&self, id: &SessionId) -> bool {
        let session = self.sessions.write().await.remove(id);
        let Some(session) = session else {
            debug!(session = %id, "disconnect for unknown session");
            return false;
        };
        session.cleanup().await;
        info!(session = %id, "session disconnected");
        true
    }

    /// Clean up every remaining session. Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        info!(count = sessions.len(), "shutting down terminal sessions");
        join_all(sessions.iter().map(|session| session.cleanup())).await;
        info!("terminal sessions shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Availability of the terminal core and its capabilities.
    pub fn health(&self) -> ServerEvent {
        ServerEvent::Health {
            available: !self.is_shut_down(),
            terminal_type: "pty".to_string(),
            features: HEALTH_FEATURES.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use std::time::Duration;

    #[tokio::test]
    async fn connect_announces_session() {
        let registry = SessionRegistry::new(TermbridgeConfig::default());
        let sink = RecordingSink::new();
        let id = registry.connect(sink.clone()).await.unwrap();

        assert_eq!(registry.count().await, 1);
        assert!(registry.get(&id).await.is_some());
        match &sink.events()[0] {
            ServerEvent::Connected { session_id, message, features } => {
                assert_eq!(session_id, &id);
                assert_eq!(message, CONNECT_MESSAGE);
                assert_eq!(features, &["pty", "ansi_colors", "interactive", "resize"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let registry = SessionRegistry::new(TermbridgeConfig::default());
        let sink = RecordingSink::new();
        let a = registry.connect(sink.clone()).await.unwrap();
        let b = registry.connect(sink.clone()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let registry = SessionRegistry::new(TermbridgeConfig::default());
        let id = registry.connect(RecordingSink::new()).await.unwrap();
        assert!(registry.disconnect(&id).await);
        assert!(!registry.disconnect(&id).await);
        assert!(!registry.disconnect(&SessionId::from("never-existed")).await);
        assert_eq!(registry.count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn disconnect_terminates_children() {
        let registry = SessionRegistry::new(TermbridgeConfig::default());
        let sink = RecordingSink::new();
        let id = registry.connect(sink.clone()).await.unwrap();
        let session = registry.get(&id).await.unwrap();
        session.create_terminal("T1", "sleep 30", None, None).unwrap().await.unwrap();
        let terminal = session.terminal("T1").unwrap();
        let pid = terminal.pid().unwrap() as i32;

        assert!(registry.disconnect(&id).await);
        assert!(terminal.is_closed());
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
        assert!(!alive);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn shutdown_runs_once_and_refuses_new_sessions() {
        let registry = SessionRegistry::new(TermbridgeConfig::default());
        let sink = RecordingSink::new();
        registry.connect(sink.clone()).await.unwrap();
        registry.connect(sink.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), registry.shutdown())
            .await
            .unwrap();
        registry.shutdown().await;

        assert_eq!(registry.count().await, 0);
        assert!(matches!(
            registry.connect(sink.clone()).await,
            Err(TermError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn health_reports_availability() {
        let registry = SessionRegistry::new(TermbridgeConfig::default());
        match registry.health() {
            ServerEvent::Health { available, terminal_type, features } => {
                assert!(available);
                assert_eq!(terminal_type, "pty");
                assert!(features.iter().any(|f| f == "multi_task"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        registry.shutdown().await;
        assert!(matches!(registry.health(), ServerEvent::Health { available: false, .. }));
    }
}
