pub mod errors;
pub mod events;
pub mod id;

pub use errors::{ConfigError, EscalationError, ResourceError, TermError, ValidationError};
pub use events::{
    completion_message, EventSink, OutputKind, RunState, ServerEvent, TaskStatus, TaskSummary,
    EXIT_CODE_INTERRUPTED, EXIT_CODE_UNKNOWN,
};
pub use id::{new_id, SessionId, TaskId};
