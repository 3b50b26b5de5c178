//! The `escalate(level)` capability and its platform bodies.

use termbridge_common::EscalationError;

use crate::terminal::Terminal;
use crate::INTERRUPT_BYTE;

/// How hard to ask a process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationLevel {
    /// Polite: the terminal's interrupt character.
    Interrupt,
    /// Termination request to the whole process group.
    Terminate,
    /// Forced kill of the whole process group.
    Kill,
}

/// Result of a successful delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The target no longer exists. Counts as success.
    Gone,
}

/// Something that can be asked to stop, in increasing order of force.
pub trait Escalate: Send + Sync {
    fn escalate(&self, level: EscalationLevel) -> Result<Delivery, EscalationError>;

    /// True once the target process has exited.
    fn has_exited(&self) -> bool;

    fn pid(&self) -> Option<u32> {
        None
    }
}

#[cfg(unix)]
impl Escalate for Terminal {
    fn escalate(&self, level: EscalationLevel) -> Result<Delivery, EscalationError> {
        use nix::sys::signal::Signal;

        match level {
            EscalationLevel::Interrupt => match self.write_byte(INTERRUPT_BYTE) {
                Ok(()) => Ok(Delivery::Sent),
                Err(_) if self.has_exited() => Ok(Delivery::Gone),
                Err(e) => Err(EscalationError::InterruptByte(e)),
            },
            EscalationLevel::Terminate => signal_group(self.child().pgid(), Signal::SIGTERM),
            EscalationLevel::Kill => signal_group(self.child().pgid(), Signal::SIGKILL),
        }
    }

    fn has_exited(&self) -> bool {
        Terminal::has_exited(self)
    }

    fn pid(&self) -> Option<u32> {
        Terminal::pid(self)
    }
}

#[cfg(not(unix))]
impl Escalate for Terminal {
    fn escalate(&self, level: EscalationLevel) -> Result<Delivery, EscalationError> {
        match level {
            EscalationLevel::Interrupt => match self.write_byte(INTERRUPT_BYTE) {
                Ok(()) => Ok(Delivery::Sent),
                Err(_) if self.has_exited() => Ok(Delivery::Gone),
                Err(e) => Err(EscalationError::InterruptByte(e)),
            },
            EscalationLevel::Terminate | EscalationLevel::Kill => {
                if self.has_exited() {
                    return Ok(Delivery::Gone);
                }
                match self.child().kill() {
                    Ok(()) => Ok(Delivery::Sent),
                    Err(_) if self.has_exited() => Ok(Delivery::Gone),
                    Err(e) => Err(EscalationError::Terminate(e)),
                }
            }
        }
    }

    fn has_exited(&self) -> bool {
        Terminal::has_exited(self)
    }

    fn pid(&self) -> Option<u32> {
        Terminal::pid(self)
    }
}

/// Every process a terminal started, including background jobs that
/// outlive the shell. Exited once the leader is reaped and no member of its
/// process group remains.
pub(crate) struct ProcessGroup<'a>(pub(crate) &'a Terminal);

impl Escalate for ProcessGroup<'_> {
    fn escalate(&self, level: EscalationLevel) -> Result<Delivery, EscalationError> {
        self.0.escalate(level)
    }

    fn has_exited(&self) -> bool {
        // Reap the leader first; a zombie leader keeps the group alive.
        Terminal::has_exited(self.0) && group_is_empty(self.0.child().pgid())
    }

    fn pid(&self) -> Option<u32> {
        Terminal::pid(self.0)
    }
}

#[cfg(unix)]
fn group_is_empty(pgid: Option<i32>) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match pgid.filter(|pgid| *pgid > 0) {
        Some(pgid) => killpg(Pid::from_raw(pgid), None) == Err(Errno::ESRCH),
        None => true,
    }
}

#[cfg(not(unix))]
fn group_is_empty(_pgid: Option<i32>) -> bool {
    true
}

/// Signal every process in the group led by `pgid`.
#[cfg(unix)]
fn signal_group(
    pgid: Option<i32>,
    signal: nix::sys::signal::Signal,
) -> Result<Delivery, EscalationError> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pgid) = pgid.filter(|pgid| *pgid > 0) else {
        return Ok(Delivery::Gone);
    };
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) => {
            tracing::debug!(pgid, signal = signal.as_str(), "signalled process group");
            Ok(Delivery::Sent)
        }
        Err(Errno::ESRCH) => Ok(Delivery::Gone),
        Err(e) => Err(EscalationError::Signal {
            signal: signal.as_str(),
            pgid,
            reason: e.desc().to_string(),
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;

    #[test]
    fn signalling_missing_group_is_gone() {
        // Far above any realistic pid_max.
        let delivery = signal_group(Some(0x3fff_fff0), Signal::SIGTERM).unwrap();
        assert_eq!(delivery, Delivery::Gone);
    }

    #[test]
    fn missing_pgid_is_gone() {
        assert_eq!(signal_group(None, Signal::SIGKILL).unwrap(), Delivery::Gone);
        assert_eq!(signal_group(Some(0), Signal::SIGKILL).unwrap(), Delivery::Gone);
    }

    #[test]
    fn empty_group_detection() {
        assert!(group_is_empty(None));
        assert!(group_is_empty(Some(0x3fff_fff0)));
        assert!(!group_is_empty(Some(nix::unistd::getpgrp().as_raw())));
    }
}
