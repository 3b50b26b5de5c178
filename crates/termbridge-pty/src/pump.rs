//! Per-terminal output pump.
//!
//! Drains the PTY master without blocking the runtime and forwards text to
//! the session's sink. The pump is the only emitter of a task's final
//! `complete` and `idle` events, so they always follow every output event.

use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use portable_pty::MasterPty;
use termbridge_common::{
    OutputKind, ResourceError, RunState, TaskStatus, EXIT_CODE_INTERRUPTED, EXIT_CODE_UNKNOWN,
};
use termbridge_config::{EscalationConfig, TerminalConfig};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::emitter::Emitter;
use crate::terminal::Terminal;

pub const INTERRUPTED_BANNER: &str = "\r\n^C (interrupted)\r\n";

#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub chunk_bytes: usize,
    pub poll_interval: Duration,
    pub flush_grace: Duration,
    pub poll_step: Duration,
}

impl PumpSettings {
    pub fn new(terminal: &TerminalConfig, escalation: &EscalationConfig) -> Self {
        Self {
            chunk_bytes: terminal.read_chunk_bytes.max(1),
            poll_interval: terminal.poll_interval(),
            flush_grace: terminal.flush_grace(),
            poll_step: escalation.poll_step(),
        }
    }
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self::new(&TerminalConfig::default(), &EscalationConfig::default())
    }
}

/// The readable side of a terminal, handed from spawn to the pump.
pub enum OutputSource {
    /// Non-blocking duplicate of the master descriptor.
    #[cfg(unix)]
    Descriptor(std::fs::File),
    #[cfg(not(unix))]
    Reader(Box<dyn io::Read + Send>),
}

impl OutputSource {
    /// Duplicate the master and switch it to non-blocking mode. The flag is
    /// shared by every descriptor of the master, including the writer.
    #[cfg(unix)]
    pub(crate) fn from_master(master: &dyn MasterPty) -> Result<Self, ResourceError> {
        use std::os::fd::BorrowedFd;

        let raw = master
            .as_raw_fd()
            .ok_or_else(|| ResourceError::Master("master has no descriptor".into()))?;
        // SAFETY: `raw` is owned by `master`, which is alive for this call;
        // the borrow is only used to duplicate it.
        let owned = unsafe { BorrowedFd::borrow_raw(raw) }
            .try_clone_to_owned()
            .map_err(|e| ResourceError::Master(format!("failed to duplicate master: {e}")))?;
        set_nonblocking(&owned)
            .map_err(|e| ResourceError::Master(format!("failed to set O_NONBLOCK: {e}")))?;
        Ok(Self::Descriptor(std::fs::File::from(owned)))
    }

    #[cfg(not(unix))]
    pub(crate) fn from_master(master: &dyn MasterPty) -> Result<Self, ResourceError> {
        master
            .try_clone_reader()
            .map(Self::Reader)
            .map_err(|e| ResourceError::Master(format!("failed to clone reader: {e}")))
    }
}

#[cfg(unix)]
fn set_nonblocking(fd: &std::os::fd::OwnedFd) -> nix::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};

    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

enum ReadOutcome {
    Data(Vec<u8>),
    /// Nothing arrived within the wait.
    Idle,
    /// EOF, or the slave side hung up.
    Closed,
    Failed(io::Error),
}

enum Reader {
    #[cfg(unix)]
    Fd(tokio::io::unix::AsyncFd<std::fs::File>),
    #[cfg(not(unix))]
    Channel(tokio::sync::mpsc::UnboundedReceiver<io::Result<Vec<u8>>>),
}

impl Reader {
    #[cfg(unix)]
    fn open(source: OutputSource, _chunk: usize) -> io::Result<Self> {
        let OutputSource::Descriptor(file) = source;
        let fd = tokio::io::unix::AsyncFd::try_new(file).map_err(|e| e.into_parts().1)?;
        Ok(Self::Fd(fd))
    }

    /// No readiness API for the master here; a thread does blocking reads.
    #[cfg(not(unix))]
    fn open(source: OutputSource, chunk: usize) -> io::Result<Self> {
        use std::io::Read;

        let OutputSource::Reader(mut reader) = source;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; chunk];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })?;
        Ok(Self::Channel(rx))
    }

    #[cfg(unix)]
    async fn next(&mut self, buf: &mut [u8], wait: Duration) -> ReadOutcome {
        use std::io::Read;

        let Self::Fd(fd) = self;
        let mut guard = match timeout(wait, fd.readable()).await {
            Err(_) => return ReadOutcome::Idle,
            Ok(Err(e)) => return ReadOutcome::Failed(e),
            Ok(Ok(guard)) => guard,
        };
        match guard.try_io(|inner| {
            let mut file = inner.get_ref();
            file.read(buf)
        }) {
            Ok(Ok(0)) => ReadOutcome::Closed,
            Ok(Ok(n)) => ReadOutcome::Data(buf[..n].to_vec()),
            Ok(Err(e)) if e.raw_os_error() == Some(nix::errno::Errno::EIO as i32) => {
                ReadOutcome::Closed
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::Idle,
            Ok(Err(e)) => ReadOutcome::Failed(e),
            Err(_would_block) => ReadOutcome::Idle,
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self, _buf: &mut [u8], wait: Duration) -> ReadOutcome {
        let Self::Channel(rx) = self;
        match timeout(wait, rx.recv()).await {
            Err(_) => ReadOutcome::Idle,
            Ok(None) => ReadOutcome::Closed,
            Ok(Some(Ok(data))) => ReadOutcome::Data(data),
            Ok(Some(Err(e))) if e.kind() == io::ErrorKind::BrokenPipe => ReadOutcome::Closed,
            Ok(Some(Err(e))) => ReadOutcome::Failed(e),
        }
    }
}

/// Lossy UTF-8 decoding that holds back a multi-byte sequence split across
/// two reads.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let split = self.pending.len() - incomplete_tail(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a trailing sequence that is valid so far but not complete.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let byte = bytes[i];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let need = if byte >= 0xF0 {
            4
        } else if byte >= 0xE0 {
            3
        } else if byte >= 0xC0 {
            2
        } else {
            1
        };
        let have = bytes.len() - i;
        return if need > have { have } else { 0 };
    }
    0
}

pub struct OutputPump;

impl OutputPump {
    /// Start the pump for `terminal`. Must be called inside the runtime.
    pub fn start(
        terminal: &Arc<Terminal>,
        source: OutputSource,
        emitter: Emitter,
        settings: PumpSettings,
    ) -> io::Result<()> {
        let reader = Reader::open(source, settings.chunk_bytes)?;
        let handle = tokio::spawn(run(
            Arc::downgrade(terminal),
            terminal.task_id().to_string(),
            reader,
            emitter,
            settings,
        ));
        terminal.set_pump(handle);
        Ok(())
    }
}

async fn run(
    terminal: Weak<Terminal>,
    task_id: String,
    mut reader: Reader,
    emitter: Emitter,
    settings: PumpSettings,
) {
    let mut buf = vec![0u8; settings.chunk_bytes];
    let mut decoder = Utf8Decoder::default();
    let mut drain_until: Option<Instant> = None;
    let mut failed = false;

    loop {
        match drain_until {
            None => match terminal.upgrade() {
                None => {
                    debug!(task = %task_id, "terminal dropped, pump stopping");
                    return;
                }
                Some(t) if t.has_exited() => {
                    debug!(task = %task_id, "child exited, draining");
                    drain_until = Some(Instant::now() + settings.flush_grace);
                }
                Some(_) => {}
            },
            Some(deadline) if Instant::now() >= deadline => break,
            Some(_) => {}
        }

        match reader.next(&mut buf, settings.poll_interval).await {
            ReadOutcome::Data(bytes) => {
                debug!(task = %task_id, bytes = bytes.len(), "pty output");
                let text = decoder.decode(&bytes);
                if !text.is_empty() {
                    emitter.output(&task_id, text, OutputKind::Pty);
                }
            }
            ReadOutcome::Idle if drain_until.is_some() => break,
            ReadOutcome::Idle => {}
            ReadOutcome::Closed => {
                debug!(task = %task_id, "pty closed");
                break;
            }
            ReadOutcome::Failed(e) => {
                warn!(task = %task_id, "error reading from pty: {e}");
                failed = true;
                break;
            }
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        emitter.output(&task_id, tail, OutputKind::Pty);
    }
    drop(reader);

    let Some(terminal) = terminal.upgrade() else {
        return;
    };
    finalize(&terminal, &emitter, settings, failed).await;
}

async fn finalize(terminal: &Terminal, emitter: &Emitter, settings: PumpSettings, failed: bool) {
    let task_id = terminal.task_id();
    let exit_code = wait_exit_code(terminal, settings).await;

    // An interrupt in flight decides how this task is reported.
    let _escalation = terminal.escalation.lock().await;
    if terminal.state() == RunState::Interrupted {
        info!(task = task_id, "task interrupted");
        emitter.system(task_id, INTERRUPTED_BANNER);
        emitter.complete(task_id, EXIT_CODE_INTERRUPTED);
    } else {
        let code = exit_code.unwrap_or(EXIT_CODE_UNKNOWN);
        info!(task = task_id, code, "task completed");
        terminal.set_state(if failed { RunState::Failed } else { RunState::Idle });
        emitter.complete(task_id, code);
    }
    emitter.status(task_id, TaskStatus::Idle, None);
    terminal.mark_finished();
}

async fn wait_exit_code(terminal: &Terminal, settings: PumpSettings) -> Option<i32> {
    let deadline = Instant::now() + settings.flush_grace;
    loop {
        if let Some(code) = terminal.child().exit_code() {
            return Some(code);
        }
        if Instant::now() >= deadline {
            debug!(task = terminal.task_id(), "exit status unavailable");
            return None;
        }
        tokio::time::sleep(settings.poll_step).await;
    }
}
