//! One task: a PTY master, the child running on its slave side, and the
//! bookkeeping shared with its output pump.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, MasterPty};
use termbridge_common::{ResourceError, RunState, TaskId, TaskSummary};
use termbridge_config::TerminalConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::child::{build_command, ChildProcess};
use crate::escalate::{Escalate, EscalationLevel, ProcessGroup};
use crate::pump::OutputSource;
use crate::size::TerminalSize;

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Terminal {
    task_id: TaskId,
    command: String,
    created_at: DateTime<Utc>,
    state: Mutex<RunState>,
    size: Mutex<TerminalSize>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: ChildProcess,
    write_deadline: Duration,
    /// Held by whoever is escalating, and by the pump while it finalizes.
    pub(crate) escalation: tokio::sync::Mutex<()>,
    finished: watch::Sender<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Terminal {
    /// Allocate a PTY, spawn `command` on it, and prepare the master for
    /// the output pump. Blocks briefly; call from a blocking context.
    ///
    /// On failure everything acquired so far is released.
    pub fn spawn(
        task_id: &str,
        command: &str,
        size: TerminalSize,
        config: &TerminalConfig,
    ) -> Result<(Terminal, OutputSource), ResourceError> {
        let pair = native_pty_system()
            .openpty(size.to_pty_size())
            .map_err(|e| ResourceError::PtyAllocation(e.to_string()))?;

        let cmd = build_command(command, size, config);
        let child = ChildProcess::spawn(pair.slave.as_ref(), cmd)?;
        drop(pair.slave);

        let master = pair.master;
        let prepared = master
            .take_writer()
            .map_err(|e| ResourceError::Master(format!("failed to take writer: {e}")))
            .and_then(|writer| Ok((writer, OutputSource::from_master(master.as_ref())?)));
        let (writer, source) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                abandon(&child);
                return Err(e);
            }
        };

        let (finished, _) = watch::channel(false);
        debug!(task = task_id, pid = ?child.pid(), rows = size.rows, cols = size.cols, "terminal spawned");

        let terminal = Terminal {
            task_id: task_id.to_string(),
            command: command.trim().to_string(),
            created_at: Utc::now(),
            state: Mutex::new(RunState::Creating),
            size: Mutex::new(size),
            master: Mutex::new(Some(master)),
            writer: Mutex::new(Some(writer)),
            child,
            write_deadline: config.write_deadline(),
            escalation: tokio::sync::Mutex::new(()),
            finished,
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        Ok((terminal, source))
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.pid()
    }

    pub(crate) fn child(&self) -> &ChildProcess {
        &self.child
    }

    pub fn state(&self) -> RunState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: RunState) {
        *lock(&self.state) = state;
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    pub fn size(&self) -> TerminalSize {
        *lock(&self.size)
    }

    pub fn summary(&self) -> TaskSummary {
        let size = self.size();
        TaskSummary {
            task_id: self.task_id.clone(),
            command: self.command.clone(),
            state: self.state(),
            rows: size.rows,
            cols: size.cols,
            created_at: self.created_at,
        }
    }

    /// Write one input payload, retrying partial writes and would-block
    /// conditions until the write deadline. Blocking.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "terminal closed"))?;

        let deadline = Instant::now() + self.write_deadline;
        let mut written = 0;
        while written < data.len() {
            match writer.write(&data[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("wrote {written} of {} bytes before deadline", data.len()),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(e),
            }
        }
        match writer.flush() {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            other => other,
        }
    }

    /// Single non-retrying write, used for control bytes.
    pub(crate) fn write_byte(&self, byte: u8) -> io::Result<()> {
        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "terminal closed"))?;
        writer.write_all(&[byte])
    }

    /// Apply a new window size. A finished or closed terminal keeps its
    /// last size and the call succeeds.
    pub fn resize(&self, size: TerminalSize) -> io::Result<()> {
        if self.state().is_finished() {
            return Ok(());
        }
        let master = lock(&self.master);
        let Some(master) = master.as_ref() else {
            return Ok(());
        };
        size.apply(master.as_ref())?;
        *lock(&self.size) = size;
        debug!(task = %self.task_id, rows = size.rows, cols = size.cols, "terminal resized");
        Ok(())
    }

    pub fn has_exited(&self) -> bool {
        self.child.has_exited()
    }

    pub(crate) fn set_pump(&self, handle: JoinHandle<()>) {
        *lock(&self.pump) = Some(handle);
    }

    pub(crate) fn take_pump(&self) -> Option<JoinHandle<()>> {
        lock(&self.pump).take()
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until the pump has emitted the final events, up to `timeout`.
    pub async fn wait_finished(&self, timeout: Duration) -> bool {
        let mut rx = self.finished.subscribe();
        let done = tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await;
        matches!(done, Ok(Ok(_)))
    }

    /// Close the master and writer. Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(lock(&self.writer).take());
        drop(lock(&self.master).take());
        debug!(task = %self.task_id, "terminal closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Kill and reap a child whose terminal never came up.
fn abandon(child: &ChildProcess) {
    if let Err(e) = child.kill() {
        debug!(pid = ?child.pid(), "kill after failed setup: {e}");
    }
    child.reap_within(Duration::from_secs(1));
}

impl Drop for Terminal {
    fn drop(&mut self) {
        if !ProcessGroup(self).has_exited() {
            warn!(task = %self.task_id, pid = ?self.child.pid(), "terminal dropped with live processes, killing");
            if let Err(e) = self.escalate(EscalationLevel::Kill) {
                warn!(task = %self.task_id, "kill on drop failed: {e}");
            }
            self.child.reap_within(Duration::from_millis(500));
        }
        self.close();
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("task_id", &self.task_id)
            .field("command", &self.command)
            .field("state", &self.state())
            .field("pid", &self.child.pid())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spawn(command: &str) -> (Terminal, OutputSource) {
        Terminal::spawn("T1", command, TerminalSize::default(), &TerminalConfig::default())
            .expect("spawn")
    }

    #[test]
    fn spawn_records_metadata() {
        let (terminal, _source) = spawn("  sleep 5  ");
        assert_eq!(terminal.task_id(), "T1");
        assert_eq!(terminal.command(), "sleep 5");
        assert_eq!(terminal.state(), RunState::Creating);
        assert!(terminal.pid().is_some());
        assert!(!terminal.has_exited());
    }

    #[test]
    fn spawn_failure_is_resource_error() {
        let config = TerminalConfig {
            shell: "/definitely/not/a/shell".into(),
            ..Default::default()
        };
        let Err(err) = Terminal::spawn("T1", "true", TerminalSize::default(), &config) else {
            panic!("spawn with a missing shell succeeded");
        };
        assert!(matches!(err, ResourceError::Spawn { .. }));
    }

    #[test]
    fn resize_is_idempotent() {
        let (terminal, _source) = spawn("sleep 5");
        terminal.set_state(RunState::Running);
        let size = TerminalSize::new(24, 80);
        terminal.resize(size).unwrap();
        terminal.resize(size).unwrap();
        assert_eq!(terminal.size(), size);

        terminal.resize(TerminalSize::new(40, 100)).unwrap();
        assert_eq!(terminal.size(), TerminalSize::new(40, 100));
    }

    #[test]
    fn resize_after_finish_is_noop() {
        let (terminal, _source) = spawn("sleep 5");
        terminal.set_state(RunState::Idle);
        terminal.resize(TerminalSize::new(50, 50)).unwrap();
        assert_eq!(terminal.size(), TerminalSize::default());
    }

    #[test]
    fn close_is_idempotent_and_blocks_writes() {
        let (terminal, _source) = spawn("sleep 5");
        terminal.close();
        terminal.close();
        assert!(terminal.is_closed());
        let err = terminal.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn write_reaches_child() {
        let (terminal, _source) = spawn("read line; exit 7");
        terminal.write(b"hello\n").unwrap();
        assert_eq!(terminal.child().reap_within(Duration::from_secs(5)), Some(7));
    }

    #[tokio::test]
    async fn wait_finished_follows_pump_completion() {
        let (terminal, _source) = spawn("sleep 5");
        assert!(!terminal.wait_finished(Duration::from_millis(50)).await);
        terminal.mark_finished();
        assert!(terminal.is_finished());
        assert!(terminal.wait_finished(Duration::from_millis(50)).await);
    }

    #[test]
    fn drop_kills_live_process() {
        let (terminal, _source) = spawn("sleep 30");
        let pid = terminal.pid().unwrap() as i32;
        drop(terminal);
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
        assert!(!alive, "process {pid} survived terminal drop");
    }
}
