//! Boundaries to the terminal-emulation and display consumers.
//!
//! The harness never interprets the bytes it forwards and never decides
//! layout; it only hands data across these traits.

use std::time::Duration;

use crate::stats::{PassRate, RunCounter};

/// Receives raw child output in arrival order.
pub trait TerminalSink {
    fn feed(&mut self, data: &[u8]);

    /// Interactivity was lost (the child is being torn down).
    fn blur(&mut self) {}
}

/// One discrete statistic change for the status display.
#[derive(Debug, Clone, PartialEq)]
pub enum StatUpdate {
    /// The command line being looped, sent once before the first run.
    Command(String),
    Runs(RunCounter),
    Runtime(Duration),
    AverageRuntime(Duration),
    PassRate(PassRate),
}

/// Receives statistic updates; layout is entirely its responsibility.
pub trait StatusSink {
    fn update(&mut self, update: StatUpdate);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TerminalSink for NullSink {
    fn feed(&mut self, _data: &[u8]) {}
}

impl StatusSink for NullSink {
    fn update(&mut self, _update: StatUpdate) {}
}
