//! Run statistics: pass rate, rolling average duration, completed-run counter.
//!
//! Plain records with one update function each. Rendering is left to the
//! display consumer; the `Display` impls here give the canonical text.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Share of completed runs that exited 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassRate {
    pub successes: u64,
    pub total: u64,
}

impl PassRate {
    pub fn record(&mut self, success: bool) {
        if success {
            self.successes += 1;
        }
        self.total += 1;
    }

    /// Pass rate in percent, `None` before the first completion.
    pub fn percent(&self) -> Option<f64> {
        (self.total > 0).then(|| self.successes as f64 / self.total as f64 * 100.0)
    }

    /// Pass rate rounded to the nearest whole percent, ties to even.
    pub fn rounded(&self) -> Option<u64> {
        self.percent().map(|rate| rate.round_ties_even() as u64)
    }
}

impl fmt::Display for PassRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rounded() {
            Some(rate) => write!(f, "{rate}%"),
            None => f.write_str("N/A"),
        }
    }
}

/// Arithmetic mean over every duration recorded so far.
///
/// Keeps the whole history; nothing is windowed or forgotten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollingAverage {
    history: Vec<Duration>,
    mean: Option<Duration>,
}

impl RollingAverage {
    pub fn record(&mut self, duration: Duration) {
        self.history.push(duration);
        let sum: Duration = self.history.iter().sum();
        let count = u32::try_from(self.history.len()).unwrap_or(u32::MAX);
        self.mean = Some(sum / count);
    }

    pub fn mean(&self) -> Option<Duration> {
        self.mean
    }

    pub fn history(&self) -> &[Duration] {
        &self.history
    }
}

/// Completed runs against the desired count (0 = unbounded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounter {
    pub completed: u64,
    pub desired: u64,
}

impl RunCounter {
    pub fn new(desired: u64) -> Self {
        Self {
            completed: 0,
            desired,
        }
    }

    pub fn increment(&mut self) {
        self.completed += 1;
    }

    pub fn is_unbounded(&self) -> bool {
        self.desired == 0
    }

    /// Whether another run should be spawned.
    pub fn needs_more(&self) -> bool {
        self.is_unbounded() || self.completed < self.desired
    }
}

impl fmt::Display for RunCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "{} of \u{221e}", self.completed)
        } else {
            write!(f, "{} of {}", self.completed, self.desired)
        }
    }
}

/// All statistics for one run series.
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    pub pass_rate: PassRate,
    pub average: RollingAverage,
    pub last_duration: Option<Duration>,
    pub runs: RunCounter,
}

impl StatsAggregator {
    pub fn new(desired_runs: u64) -> Self {
        Self {
            runs: RunCounter::new(desired_runs),
            ..Self::default()
        }
    }

    /// Count a finished run towards the pass rate and the run counter.
    pub fn record_completion(&mut self, success: bool) {
        self.pass_rate.record(success);
        self.runs.increment();
    }

    pub fn record_duration(&mut self, duration: Duration) {
        self.last_duration = Some(duration);
        self.average.record(duration);
    }
}

/// Render a duration the way the status header shows it (`1.234s`).
pub fn format_duration(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}
