//! Run harness: loops the command and keeps score.
//!
//! Each run moves through `Spawning -> Running -> Finalizing`, then either
//! spawns again or settles in `Done`. The next run is only spawned after the
//! current run's `done` notification has been fully processed, so runs never
//! overlap and run ids come out strictly sequential.

use chrono::{DateTime, Utc};
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use tailspin_core::config::ConfigError;
use tailspin_core::logdir::LogDirError;
use tailspin_core::types::SeriesSummary;
use tailspin_core::{
    HarnessConfig, LogDirectory, RunId, RunRecord, RunSeries, StatUpdate, StatsAggregator,
    StatusSink, TerminalSink,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pty::PtySize;
use crate::runlog::{RunLogError, RunLogger};
use crate::supervisor::{ProcessSupervisor, SupervisorError, SupervisorObserver};

/// Name of the per-series summary written into the log directory.
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    LogDir(#[from] LogDirError),
    #[error(transparent)]
    RunLog(#[from] RunLogError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("{0} notification with no run in flight")]
    NoRunInFlight(&'static str),
    #[error("failed to write run summary: {0}")]
    Summary(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Where the harness is in its run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Idle,
    Spawning,
    Running,
    Finalizing,
    Done,
}

/// How a series ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessOutcome {
    /// Every desired run finished.
    Completed,
    /// Stopped from outside before the desired count was reached.
    Cancelled,
}

#[derive(Debug)]
struct InFlightRun {
    run_id: RunId,
    started_at: DateTime<Utc>,
    started: Instant,
    exit_status: Option<i32>,
    log_path: PathBuf,
}

/// Per-series state; receives the supervisor's notifications.
#[derive(Debug)]
struct RunSession<T, D> {
    logger: RunLogger,
    series: RunSeries,
    stats: StatsAggregator,
    terminal: T,
    display: D,
    in_flight: Option<InFlightRun>,
    state: HarnessState,
}

impl<T: TerminalSink, D: StatusSink> RunSession<T, D> {
    fn publish_stats(&mut self) {
        if let Some(last) = self.stats.last_duration {
            self.display.update(StatUpdate::Runtime(last));
        }
        if let Some(mean) = self.stats.average.mean() {
            self.display.update(StatUpdate::AverageRuntime(mean));
        }
        self.display.update(StatUpdate::PassRate(self.stats.pass_rate));
        self.display.update(StatUpdate::Runs(self.stats.runs));
    }
}

impl<T: TerminalSink, D: StatusSink> SupervisorObserver for RunSession<T, D> {
    type Error = HarnessError;

    fn on_spawn(&mut self) -> Result<()> {
        let run_id = self.series.next_run_id();
        let log_path = self.logger.open(run_id)?.to_path_buf();
        info!(run_id, log = %log_path.display(), "run starting");

        self.in_flight = Some(InFlightRun {
            run_id,
            started_at: Utc::now(),
            started: Instant::now(),
            exit_status: None,
            log_path,
        });
        self.state = HarnessState::Running;
        Ok(())
    }

    fn on_feed(&mut self, data: &[u8]) -> Result<()> {
        self.logger.write(data)?;
        self.terminal.feed(data);
        Ok(())
    }

    fn on_exitcode(&mut self, code: i32) -> Result<()> {
        let run = self
            .in_flight
            .as_mut()
            .ok_or(HarnessError::NoRunInFlight("exitcode"))?;
        run.exit_status = Some(code);
        self.state = HarnessState::Finalizing;
        Ok(())
    }

    fn on_blur(&mut self) {
        self.terminal.blur();
    }

    fn on_done(&mut self) -> Result<()> {
        let run = self
            .in_flight
            .take()
            .ok_or(HarnessError::NoRunInFlight("done"))?;
        let duration = run.started.elapsed();
        self.state = HarnessState::Finalizing;

        if run.exit_status.is_none() {
            warn!(run_id = run.run_id, "run finished without an exit status; counting as failure");
        }

        let record = RunRecord {
            run_id: run.run_id,
            started_at: run.started_at,
            ended_at: Utc::now(),
            duration,
            exit_status: run.exit_status,
            log_path: run.log_path,
        };

        self.stats.record_duration(duration);
        self.stats.record_completion(record.succeeded());
        self.logger.close()?;

        info!(
            run_id = record.run_id,
            exit_status = ?record.exit_status,
            duration_ms = duration.as_millis() as u64,
            pass_rate = %self.stats.pass_rate,
            runs = %self.stats.runs,
            "run finished"
        );
        self.series.push(record);
        self.publish_stats();

        debug_assert_eq!(self.series.completed(), self.stats.runs.completed);
        self.state = if self.stats.runs.needs_more() {
            HarnessState::Spawning
        } else {
            HarnessState::Done
        };
        Ok(())
    }
}

/// Drives the configured number of runs of one command.
#[derive(Debug)]
pub struct RunHarness<T, D> {
    config: HarnessConfig,
    log_dir: LogDirectory,
    supervisor: ProcessSupervisor,
    session: RunSession<T, D>,
}

impl<T: TerminalSink, D: StatusSink> RunHarness<T, D> {
    /// Validate `config` and allocate this invocation's log directory.
    pub fn new(config: HarnessConfig, terminal: T, display: D) -> Result<Self> {
        config.validate()?;

        let log_dir = LogDirectory::allocate(&config.logs_root)?;
        info!(dir = %log_dir, "allocated log directory");

        let supervisor = ProcessSupervisor::new(config.command.clone())
            .with_size(PtySize {
                cols: config.cols,
                rows: config.rows,
            })
            .with_escalation_delay(config.escalation_delay());

        let session = RunSession {
            logger: RunLogger::new(config.program(), log_dir.path()),
            series: RunSeries::default(),
            stats: StatsAggregator::new(config.runs),
            terminal,
            display,
            in_flight: None,
            state: HarnessState::Idle,
        };

        Ok(Self {
            config,
            log_dir,
            supervisor,
            session,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn log_dir(&self) -> &LogDirectory {
        &self.log_dir
    }

    pub fn state(&self) -> HarnessState {
        self.session.state
    }

    pub fn series(&self) -> &RunSeries {
        &self.session.series
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.session.stats
    }

    pub fn terminal(&self) -> &T {
        &self.session.terminal
    }

    pub fn display(&self) -> &D {
        &self.session.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.session.display
    }

    /// Run until the desired count is reached.
    ///
    /// With a desired count of 0 this only returns on error.
    pub async fn run(&mut self) -> Result<()> {
        if self.session.state == HarnessState::Idle {
            self.session
                .display
                .update(StatUpdate::Command(self.config.command_line()));
            self.session.publish_stats();
            self.session.state = HarnessState::Spawning;
        }

        while self.session.state == HarnessState::Spawning {
            self.supervisor.spawn(&mut self.session)?;
            while self.supervisor.is_running() {
                self.supervisor.on_readable(&mut self.session).await?;
            }
        }
        Ok(())
    }

    /// [`run`](Self::run), stopping early when `cancel` fires.
    ///
    /// Cancellation does not tear down an in-flight child. Either way the
    /// series summary is written to the log directory.
    pub async fn run_until_cancelled(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<HarnessOutcome> {
        let outcome = tokio::select! {
            result = self.run() => {
                result?;
                HarnessOutcome::Completed
            }
            () = cancel.cancelled() => HarnessOutcome::Cancelled,
        };
        if outcome == HarnessOutcome::Cancelled {
            info!(completed = self.session.series.completed(), "run loop cancelled");
        }

        self.session.state = HarnessState::Done;
        self.session.logger.close()?;
        self.write_summary(outcome)?;
        Ok(outcome)
    }

    /// Summary of everything finalized so far.
    pub fn summary(&self, outcome: HarnessOutcome) -> SeriesSummary {
        let stats = &self.session.stats;
        SeriesSummary {
            command: self.config.command.clone(),
            log_dir: self.log_dir.path().to_path_buf(),
            cancelled: outcome == HarnessOutcome::Cancelled,
            runs: stats.runs,
            pass_rate: stats.pass_rate,
            pass_rate_display: stats.pass_rate.to_string(),
            average_duration_ms: stats.average.mean().map(|d| d.as_millis() as u64),
            records: self.session.series.records().to_vec(),
        }
    }

    fn write_summary(&self, outcome: HarnessOutcome) -> Result<()> {
        let path = self.log_dir.path().join(SUMMARY_FILE);
        let json = serde_json::to_vec_pretty(&self.summary(outcome))
            .map_err(|e| HarnessError::Summary(e.into()))?;
        std::fs::write(&path, json).map_err(HarnessError::Summary)?;
        info!(path = %path.display(), "wrote run summary");
        Ok(())
    }
}
