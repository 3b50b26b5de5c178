use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Rejected requests. These are reported to the client verbatim and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Session not found: {0}")]
    UnknownSession(String),

    #[error("Task ID is required")]
    MissingTaskId,

    #[error("Empty command")]
    EmptyCommand,

    #[error("Terminal already exists")]
    DuplicateTask(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("failed to allocate PTY: {0}")]
    PtyAllocation(String),

    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("failed to prepare PTY master: {0}")]
    Master(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("failed to deliver {signal} to process group {pgid}: {reason}")]
    Signal {
        signal: &'static str,
        pgid: i32,
        reason: String,
    },

    #[error("failed to write interrupt byte: {0}")]
    InterruptByte(#[source] std::io::Error),

    #[error("failed to terminate process: {0}")]
    Terminate(#[source] std::io::Error),

    #[error("process {0} still alive after forced kill")]
    Unreaped(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum TermError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Escalation(#[from] EscalationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("terminal service is shutting down")]
    ShuttingDown,
}
