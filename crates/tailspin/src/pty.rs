//! Pseudo-terminal plumbing: open, size, and attach a child.
//!
//! `portable_pty` owns the descriptors and the session setup in the child.
//! The supervisor only borrows the master's raw descriptor for readiness.

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair};
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub cols: u16,
    pub rows: u16,
}

impl PtySize {
    /// Zero-sized terminal; applied during teardown to unblock child I/O.
    pub const ZERO: Self = Self { cols: 0, rows: 0 };

    fn native(self) -> portable_pty::PtySize {
        portable_pty::PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Open a pty pair. Both ends are close-on-exec.
pub fn open(size: PtySize) -> io::Result<PtyPair> {
    native_pty_system()
        .openpty(size.native())
        .map_err(|e| io::Error::other(e.to_string()))
}

/// Raw view of a master descriptor, registrable with the reactor.
///
/// Valid only while the [`PtyProcess`] it came from is alive.
#[derive(Debug, Clone, Copy)]
pub struct MasterFd(RawFd);

impl AsRawFd for MasterFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// A child running on the slave side, plus the master that reads it.
pub struct PtyProcess {
    pid: Pid,
    master: Box<dyn MasterPty + Send>,
    _child: Box<dyn Child + Send>,
}

impl fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("master", &MasterPty::as_raw_fd(&*self.master))
            .finish_non_exhaustive()
    }
}

impl PtyProcess {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The master descriptor, switched to non-blocking reads.
    pub fn master_fd(&self) -> io::Result<MasterFd> {
        let fd = MasterPty::as_raw_fd(&*self.master)
            .ok_or_else(|| io::Error::other("pty master has no descriptor"))?;
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        Ok(MasterFd(fd))
    }

    pub fn resize(&self, size: PtySize) -> io::Result<()> {
        self.master
            .resize(size.native())
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Start `argv` as a session leader whose controlling terminal is the
/// slave side of `pair`, in the current working directory.
///
/// The slave is dropped once the child holds it, so the child's exit
/// surfaces as end of input on the master. The caller owns reaping.
pub fn spawn(argv: &[String], pair: PtyPair) -> io::Result<PtyProcess> {
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
    };

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    cmd.cwd(std::env::current_dir()?);

    let PtyPair { slave, master } = pair;
    let child = slave
        .spawn_command(cmd)
        .map_err(|e| io::Error::other(e.to_string()))?;
    drop(slave);

    let raw_pid = child
        .process_id()
        .ok_or_else(|| io::Error::other("spawned child has no process id"))?;

    Ok(PtyProcess {
        pid: Pid::from_raw(raw_pid as i32),
        master,
        _child: child,
    })
}
