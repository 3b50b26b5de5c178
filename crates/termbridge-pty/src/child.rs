//! Child process spawning and exit tracking.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use portable_pty::{Child, CommandBuilder, SlavePty};
use termbridge_common::{ResourceError, EXIT_CODE_UNKNOWN};
use termbridge_config::TerminalConfig;
use tracing::debug;

use crate::size::TerminalSize;
use crate::terminal::lock;

/// Environment forcing color-capable terminal identification.
///
/// Configured extra variables are applied after these and win on conflict.
pub fn terminal_env(size: TerminalSize) -> Vec<(&'static str, String)> {
    vec![
        ("TERM", "xterm-256color".into()),
        ("COLORTERM", "truecolor".into()),
        ("COLUMNS", size.cols.to_string()),
        ("LINES", size.rows.to_string()),
        ("CLICOLOR", "1".into()),
        ("FORCE_COLOR", "1".into()),
        ("CLICOLOR_FORCE", "1".into()),
        ("PAGER", "cat".into()),
        ("LESS", "-R".into()),
        ("PYTHONUNBUFFERED", "1".into()),
        ("PY_COLORS", "1".into()),
    ]
}

/// Build the shell invocation for one task command.
pub fn build_command(command: &str, size: TerminalSize, config: &TerminalConfig) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(&config.shell);
    if cfg!(windows) {
        cmd.arg("/C");
    } else {
        cmd.arg("-c");
    }
    cmd.arg(command.trim());

    for (key, value) in terminal_env(size) {
        cmd.env(key, value);
    }
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    // CommandBuilder defaults to $HOME; keep the server's directory instead.
    let cwd = config
        .working_directory
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok());
    if let Some(cwd) = cwd {
        cmd.cwd(cwd);
    }

    cmd
}

struct ChildSlot {
    child: Box<dyn Child + Send + Sync>,
    exit_code: Option<i32>,
}

/// A spawned child process. The exit status is collected at most once and
/// cached afterwards.
pub struct ChildProcess {
    slot: Mutex<ChildSlot>,
    pid: Option<u32>,
}

impl ChildProcess {
    /// Spawn `cmd` with its stdio bound to `slave`. On POSIX the child gets
    /// a new session, so its pid is also its process group id.
    pub fn spawn(slave: &dyn SlavePty, cmd: CommandBuilder) -> Result<Self, ResourceError> {
        let command = cmd
            .get_argv()
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        let child = slave
            .spawn_command(cmd)
            .map_err(|e| ResourceError::Spawn {
                command,
                reason: e.to_string(),
            })?;
        Ok(Self::from_child(child))
    }

    pub(crate) fn from_child(child: Box<dyn Child + Send + Sync>) -> Self {
        let pid = child.process_id();
        Self {
            slot: Mutex::new(ChildSlot {
                child,
                exit_code: None,
            }),
            pid,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Process group id for group-wide signals.
    pub fn pgid(&self) -> Option<i32> {
        self.pid.and_then(|pid| i32::try_from(pid).ok())
    }

    /// Exit code if the process has exited, reaping it on first observation.
    pub fn exit_code(&self) -> Option<i32> {
        let mut slot = lock(&self.slot);
        if slot.exit_code.is_some() {
            return slot.exit_code;
        }
        match slot.child.try_wait() {
            Ok(Some(status)) => {
                let code = i32::try_from(status.exit_code()).unwrap_or(EXIT_CODE_UNKNOWN);
                debug!(pid = ?self.pid, code, "child exited");
                slot.exit_code = Some(code);
                slot.exit_code
            }
            Ok(None) => None,
            Err(e) => {
                debug!(pid = ?self.pid, "try_wait failed: {e}");
                None
            }
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Poll for exit until `timeout` elapses. Blocks the calling thread.
    pub fn reap_within(&self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.exit_code() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Platform terminate primitive for the child itself.
    pub fn kill(&self) -> io::Result<()> {
        let mut slot = lock(&self.slot);
        if slot.exit_code.is_some() {
            return Ok(());
        }
        slot.child.kill()
    }
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess").field("pid", &self.pid).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_pty::native_pty_system;
    use std::collections::HashMap;
    use std::ffi::{OsStr, OsString};

    #[test]
    fn env_forces_color_terminal() {
        let env: HashMap<_, _> = terminal_env(TerminalSize::new(30, 100)).into_iter().collect();
        assert_eq!(env["TERM"], "xterm-256color");
        assert_eq!(env["COLORTERM"], "truecolor");
        assert_eq!(env["COLUMNS"], "100");
        assert_eq!(env["LINES"], "30");
        assert_eq!(env["FORCE_COLOR"], "1");
        assert_eq!(env["PAGER"], "cat");
    }

    #[cfg(unix)]
    #[test]
    fn command_runs_through_shell() {
        let config = TerminalConfig::default();
        let cmd = build_command("  ls -la  ", TerminalSize::default(), &config);
        let argv: Vec<_> = cmd.get_argv().iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(argv, vec!["/bin/sh", "-c", "ls -la"]);
    }

    #[test]
    fn configured_env_overrides_defaults() {
        let mut config = TerminalConfig::default();
        config.env.insert("TERM".into(), "dumb".into());
        config.env.insert("EDITOR".into(), "vi".into());
        let cmd = build_command("true", TerminalSize::default(), &config);
        assert_eq!(cmd.get_env("TERM"), Some(OsStr::new("dumb")));
        assert_eq!(cmd.get_env("EDITOR"), Some(OsStr::new("vi")));
        assert_eq!(cmd.get_env("COLORTERM"), Some(OsStr::new("truecolor")));
    }

    #[test]
    fn working_directory_defaults_to_current_dir() {
        let config = TerminalConfig::default();
        let cmd = build_command("true", TerminalSize::default(), &config);
        let expected = std::env::current_dir().unwrap().into_os_string();
        assert_eq!(cmd.get_cwd(), Some(&expected));
    }

    #[test]
    fn configured_working_directory_is_used() {
        let config = TerminalConfig {
            working_directory: Some("/tmp".into()),
            ..Default::default()
        };
        let cmd = build_command("true", TerminalSize::default(), &config);
        assert_eq!(cmd.get_cwd(), Some(&OsString::from("/tmp")));
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_is_cached_after_reap() {
        let pair = native_pty_system()
            .openpty(TerminalSize::default().to_pty_size())
            .unwrap();
        let cmd = build_command("exit 3", TerminalSize::default(), &TerminalConfig::default());
        let child = ChildProcess::spawn(pair.slave.as_ref(), cmd).unwrap();
        drop(pair.slave);

        assert_eq!(child.reap_within(Duration::from_secs(5)), Some(3));
        assert_eq!(child.exit_code(), Some(3));
        assert!(child.kill().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn spawn_failure_names_the_command() {
        let pair = native_pty_system()
            .openpty(TerminalSize::default().to_pty_size())
            .unwrap();
        let config = TerminalConfig {
            shell: "/nonexistent/shell".into(),
            ..Default::default()
        };
        let cmd = build_command("true", TerminalSize::default(), &config);
        let err = ChildProcess::spawn(pair.slave.as_ref(), cmd).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/shell"));
    }
}
