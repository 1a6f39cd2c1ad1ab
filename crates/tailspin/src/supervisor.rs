//! Process supervisor: one child process attached to a pseudo-terminal.
//!
//! The supervisor spawns the child, pumps its output, and tears it down.
//! Everything it observes is reported through a [`SupervisorObserver`]:
//!
//! - `spawn` fires before the fork, so per-run state exists before any output
//! - `feed` carries each raw chunk read from the pty master
//! - `exitcode` carries the translated wait status once the child is reaped
//! - `done` fires exactly once per run, as the last notification
//!
//! For one run the order is always spawn, feed*, exitcode, done.
//!
//! Teardown escalates through SIGHUP, SIGCONT, SIGINT, SIGTERM and SIGKILL,
//! checking for exit after each signal and pausing between steps. The pause
//! is an awaited timer, so the reactor keeps running while a stubborn child
//! is being put down.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{debug, info, warn};

use crate::pty::{self, MasterFd, PtyProcess, PtySize};

/// Maximum bytes read from the pty per readiness notification.
pub const READ_CHUNK: usize = 4096;

/// Signals sent, in order, to a child that has not exited on its own.
pub const ESCALATION: [Signal; 5] = [
    Signal::SIGHUP,
    Signal::SIGCONT,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGKILL,
];

/// Default pause between escalation steps.
pub const DEFAULT_ESCALATION_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to open pseudo-terminal: {0}")]
    OpenPty(#[source] io::Error),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("a child is already running (pid {0})")]
    AlreadyRunning(Pid),
    #[error("event loop registration failed: {0}")]
    Register(#[source] io::Error),
    #[error("pty read failed: {0}")]
    Read(#[source] Errno),
    #[error("wait failed for pid {pid}: {source}")]
    Wait {
        pid: Pid,
        #[source]
        source: Errno,
    },
    #[error("unexpected wait status: {0:?}")]
    UnexpectedWaitStatus(WaitStatus),
    #[error("unrecognized raw wait status: {0:#x}")]
    UnrecognizedRawStatus(i32),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Receives supervisor notifications.
///
/// Errors returned by a handler propagate out of the supervisor call that
/// triggered it; `on_done` is still delivered when teardown fails midway.
pub trait SupervisorObserver {
    type Error: From<SupervisorError>;

    fn on_spawn(&mut self) -> std::result::Result<(), Self::Error>;
    fn on_feed(&mut self, data: &[u8]) -> std::result::Result<(), Self::Error>;
    fn on_exitcode(&mut self, code: i32) -> std::result::Result<(), Self::Error>;
    fn on_done(&mut self) -> std::result::Result<(), Self::Error>;

    /// The child is losing interactivity; called at the start of teardown.
    fn on_blur(&mut self) {}
}

/// Translate a wait status into an exit code.
///
/// Normal exits give the exit code (`>= 0`); deaths by signal give the
/// negated signal number.
pub fn exit_code(status: WaitStatus) -> Result<i32> {
    match status {
        WaitStatus::Exited(_, code) => Ok(code),
        WaitStatus::Signaled(_, signal, _) => Ok(-(signal as i32)),
        other => Err(SupervisorError::UnexpectedWaitStatus(other)),
    }
}

/// [`exit_code`] for a raw `waitpid(2)` status word.
pub fn exit_code_from_raw(raw: i32) -> Result<i32> {
    let status = WaitStatus::from_raw(Pid::from_raw(0), raw)
        .map_err(|_| SupervisorError::UnrecognizedRawStatus(raw))?;
    exit_code(status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
    Data(usize),
    Eof,
    WouldBlock,
    Interrupted,
    Failed(Errno),
}

fn read_chunk(fd: RawFd, buf: &mut [u8]) -> ReadOutcome {
    match unistd::read(fd, buf) {
        // Linux reports a closed slave as EIO rather than a zero-length read.
        Ok(0) | Err(Errno::EIO) => ReadOutcome::Eof,
        Ok(n) => ReadOutcome::Data(n),
        Err(Errno::EAGAIN) => ReadOutcome::WouldBlock,
        Err(Errno::EINTR) => ReadOutcome::Interrupted,
        Err(errno) => ReadOutcome::Failed(errno),
    }
}

#[derive(Debug)]
struct ProcessHandle {
    process: PtyProcess,
    /// Reactor registration of the master; taken when teardown unregisters it.
    watch: Option<AsyncFd<MasterFd>>,
}

/// Owns at most one pty-backed child at a time.
#[derive(Debug)]
pub struct ProcessSupervisor {
    command: Vec<String>,
    size: PtySize,
    escalation_delay: Duration,
    handle: Option<ProcessHandle>,
    terminated: bool,
}

impl ProcessSupervisor {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            size: PtySize::default(),
            escalation_delay: DEFAULT_ESCALATION_DELAY,
            handle: None,
            terminated: false,
        }
    }

    pub fn with_size(mut self, size: PtySize) -> Self {
        self.size = size;
        self
    }

    pub fn with_escalation_delay(mut self, delay: Duration) -> Self {
        self.escalation_delay = delay;
        self
    }

    /// Pid of the live child, if any.
    pub fn pid(&self) -> Option<Pid> {
        self.handle.as_ref().map(|h| h.process.pid())
    }

    /// Whether a run is in flight (spawned and `done` not yet delivered).
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start a new run.
    ///
    /// Notifies `on_spawn` first, then forks the child onto a fresh pty and
    /// registers the master with the reactor. Must be called from within a
    /// tokio runtime.
    pub fn spawn<O: SupervisorObserver>(
        &mut self,
        observer: &mut O,
    ) -> std::result::Result<(), O::Error> {
        if let Some(handle) = &self.handle {
            return Err(SupervisorError::AlreadyRunning(handle.process.pid()).into());
        }

        observer.on_spawn()?;
        self.terminated = false;

        let pair = pty::open(self.size).map_err(SupervisorError::OpenPty)?;
        let process = pty::spawn(&self.command, pair).map_err(|source| SupervisorError::Spawn {
            program: self.command.first().cloned().unwrap_or_default(),
            source,
        })?;
        let pid = process.pid();

        let registered = process
            .master_fd()
            .and_then(|fd| AsyncFd::with_interest(fd, Interest::READABLE));
        let watch = match registered {
            Ok(watch) => watch,
            Err(err) => {
                // The run cannot be observed; put the child down before failing.
                warn!(pid = %pid, error = %err, "failed to register pty; killing child");
                let _ = signal::kill(pid, Signal::SIGKILL);
                let _ = waitpid(pid, None);
                return Err(SupervisorError::Register(err).into());
            }
        };

        info!(pid = %pid, command = ?self.command, "spawned child");
        self.handle = Some(ProcessHandle {
            process,
            watch: Some(watch),
        });
        Ok(())
    }

    /// Wait for the pty to become readable and handle one read.
    ///
    /// A chunk is passed to `on_feed`; end of output tears the child down;
    /// "would block" just returns so the caller can wait again. Returns
    /// immediately when no run is in flight.
    pub async fn on_readable<O: SupervisorObserver>(
        &mut self,
        observer: &mut O,
    ) -> std::result::Result<(), O::Error> {
        let mut buf = [0u8; READ_CHUNK];

        let outcome = {
            let Some(watch) = self.handle.as_ref().and_then(|h| h.watch.as_ref()) else {
                return Ok(());
            };
            let mut guard = watch.readable().await.map_err(SupervisorError::Register)?;
            let outcome = read_chunk(watch.get_ref().as_raw_fd(), &mut buf);
            if outcome == ReadOutcome::WouldBlock {
                guard.clear_ready();
            }
            outcome
        };

        match outcome {
            ReadOutcome::Data(n) => observer.on_feed(&buf[..n]),
            ReadOutcome::WouldBlock | ReadOutcome::Interrupted => Ok(()),
            ReadOutcome::Eof => {
                debug!(pid = ?self.pid(), "pty closed");
                self.terminate(observer).await
            }
            ReadOutcome::Failed(errno) => Err(SupervisorError::Read(errno).into()),
        }
    }

    /// Tear down the current child and finish the run.
    ///
    /// Idempotent: only the first call per run does anything. Unregisters
    /// the pty, shrinks it to zero size, reaps the child (escalating signals
    /// if it is still alive), reports `on_exitcode` when a status was
    /// collected, and always finishes with `on_done`.
    pub async fn terminate<O: SupervisorObserver>(
        &mut self,
        observer: &mut O,
    ) -> std::result::Result<(), O::Error> {
        if self.terminated {
            return Ok(());
        }
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        self.terminated = true;

        let pid = handle.process.pid();
        // Deregister before the master can close underneath the reactor.
        drop(handle.watch.take());
        observer.on_blur();

        let reaped = self.reap(&handle.process, observer).await;
        drop(handle);

        if reaped.is_err() {
            warn!(pid = %pid, "teardown failed; finishing run anyway");
        }
        let done = observer.on_done();
        reaped.and(done)
    }

    async fn reap<O: SupervisorObserver>(
        &self,
        process: &PtyProcess,
        observer: &mut O,
    ) -> std::result::Result<(), O::Error> {
        let pid = process.pid();
        if let Err(err) = process.resize(PtySize::ZERO) {
            warn!(pid = %pid, error = %err, "failed to shrink pty");
        }

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status) => return Self::report(pid, status, observer),
            Err(source) => return Err(SupervisorError::Wait { pid, source }.into()),
        }

        for signal in ESCALATION {
            debug!(pid = %pid, signal = %signal, "sending signal");
            if let Err(errno) = signal::kill(pid, signal) {
                debug!(pid = %pid, signal = %signal, error = %errno, "kill failed; ending escalation");
                break;
            }

            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => return Self::report(pid, status, observer),
                Err(errno) => {
                    debug!(pid = %pid, error = %errno, "wait failed; ending escalation");
                    break;
                }
            }

            tokio::time::sleep(self.escalation_delay).await;
        }

        match waitpid(pid, None) {
            Ok(status) => Self::report(pid, status, observer),
            Err(Errno::ECHILD) => {
                debug!(pid = %pid, "child already reaped");
                Ok(())
            }
            Err(source) => Err(SupervisorError::Wait { pid, source }.into()),
        }
    }

    fn report<O: SupervisorObserver>(
        pid: Pid,
        status: WaitStatus,
        observer: &mut O,
    ) -> std::result::Result<(), O::Error> {
        let code = exit_code(status)?;
        debug!(pid = %pid, status = ?status, code, "child reaped");
        observer.on_exitcode(code)
    }
}
