//! tailspin - run a command over and over under a pseudo-terminal.
//!
//! Each run's raw terminal output is captured to its own log file and the
//! series is scored (pass rate, average runtime) as runs complete.

pub mod harness;
pub mod pty;
pub mod render;
pub mod runlog;
pub mod supervisor;

pub use harness::{HarnessError, HarnessOutcome, HarnessState, RunHarness};
pub use render::{PassthroughTerminal, StatusHeader};
pub use runlog::RunLogger;
pub use supervisor::{ProcessSupervisor, SupervisorError, SupervisorObserver};
