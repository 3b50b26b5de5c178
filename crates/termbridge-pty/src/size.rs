//! Terminal window size.

use portable_pty::{MasterPty, PtySize};

/// Rows and columns of a terminal window. Both are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl TerminalSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows: rows.max(1),
            cols: cols.max(1),
        }
    }

    pub fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// Push this size to the kernel (`TIOCSWINSZ` on POSIX). The foreground
    /// process group receives `SIGWINCH`.
    pub fn apply(self, master: &dyn MasterPty) -> std::io::Result<()> {
        master
            .resize(self.to_pty_size())
            .map_err(|e| std::io::Error::other(format!("PTY resize failed: {e}")))
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

impl From<PtySize> for TerminalSize {
    fn from(size: PtySize) -> Self {
        Self::new(size.rows, size.cols)
    }
}
