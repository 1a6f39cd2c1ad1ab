//! Core types for the run harness.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::stats::{PassRate, RunCounter};

/// 1-based sequential identifier of a run within one harness invocation.
pub type RunId = u64;

/// One finished execution of the command.
///
/// Created when the run's spawn notification fires and finalized when its
/// done notification fires; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// `>= 0` exit code, `< 0` negated signal number. `None` if the child
    /// could not be reaped.
    pub exit_status: Option<i32>,
    pub log_path: PathBuf,
}

impl RunRecord {
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(duration.as_millis() as u64)
}

/// Finalized runs of one harness invocation, in run id order.
///
/// Only holds records; the desired count and the continue decision live on
/// [`RunCounter`].
#[derive(Debug, Clone, Default)]
pub struct RunSeries {
    records: Vec<RunRecord>,
}

impl RunSeries {
    pub fn completed(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn successes(&self) -> u64 {
        self.records.iter().filter(|r| r.succeeded()).count() as u64
    }

    /// Id for the next run; ids have no gaps.
    pub fn next_run_id(&self) -> RunId {
        self.completed() + 1
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    /// Append a finalized run. Records must arrive in run id order.
    pub fn push(&mut self, record: RunRecord) {
        debug_assert_eq!(record.run_id, self.next_run_id());
        self.records.push(record);
    }
}

/// Contents of `summary.json`, written when a series ends.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub command: Vec<String>,
    pub log_dir: PathBuf,
    pub cancelled: bool,
    pub runs: RunCounter,
    pub pass_rate: PassRate,
    pub pass_rate_display: String,
    pub average_duration_ms: Option<u64>,
    pub records: Vec<RunRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(run_id: RunId, exit_status: Option<i32>, millis: u64) -> RunRecord {
        let now = Utc::now();
        RunRecord {
            run_id,
            started_at: now,
            ended_at: now,
            duration: Duration::from_millis(millis),
            exit_status,
            log_path: PathBuf::from(format!("logs/001/cmd-{run_id:04}.log")),
        }
    }

    #[test]
    fn series_assigns_ids_without_gaps() {
        let mut series = RunSeries::default();
        assert_eq!(series.next_run_id(), 1);
        series.push(record(1, Some(1), 10));
        assert_eq!(series.next_run_id(), 2);
        series.push(record(2, Some(0), 10));
        assert_eq!(series.next_run_id(), 3);
        assert_eq!(series.successes(), 1);
        series.push(record(3, None, 10));
        assert_eq!(series.completed(), 3);
        assert_eq!(series.successes(), 1);
    }

    #[test]
    fn missing_exit_status_is_not_success() {
        assert!(record(1, Some(0), 1).succeeded());
        assert!(!record(1, Some(2), 1).succeeded());
        assert!(!record(1, Some(-15), 1).succeeded());
        assert!(!record(1, None, 1).succeeded());
    }

    #[test]
    fn record_serializes_duration_in_millis() {
        let json = serde_json::to_value(record(7, Some(-9), 1500)).unwrap();
        assert_eq!(json["run_id"], 7);
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["exit_status"], -9);
        assert_eq!(json["log_path"], "logs/001/cmd-0007.log");
    }
}
