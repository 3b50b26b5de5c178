//! PTY session core: terminals, output pumps, signal escalation, and the
//! session registry that owns them.
//!
//! Every task runs one shell command inside its own pseudo-terminal. Output
//! is streamed through an [`EventSink`](termbridge_common::EventSink); input,
//! resize and interrupt requests are routed by task id.

mod child;
mod emitter;
mod escalate;
mod escalator;
mod pump;
mod registry;
mod session;
mod size;
mod terminal;

#[cfg(test)]
mod testing;

pub use child::{build_command, terminal_env, ChildProcess};
pub use emitter::Emitter;
pub use escalate::{Delivery, Escalate, EscalationLevel};
pub use escalator::{InterruptOutcome, SignalEscalator, Stage};
pub use pump::{OutputPump, OutputSource, PumpSettings};
pub use registry::{SessionRegistry, CONNECT_FEATURES, CONNECT_MESSAGE, HEALTH_FEATURES};
pub use session::{Session, TaskLookup};
pub use size::TerminalSize;
pub use terminal::Terminal;

/// Byte written to the master to ask the line discipline for SIGINT.
pub const INTERRUPT_BYTE: u8 = 0x03;
