//! Raw per-run capture files.
//!
//! One file per run, `<log dir>/<descriptor>-<run id>.log`, holding the
//! child's terminal output byte for byte.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tailspin_core::naming::logfile_name;
use tailspin_core::RunId;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RunLogError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("write with no run log open")]
    NotOpen,
}

pub type Result<T> = std::result::Result<T, RunLogError>;

#[derive(Debug)]
struct OpenLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Owns at most one open run log at a time.
#[derive(Debug)]
pub struct RunLogger {
    program: String,
    dir: PathBuf,
    current: Option<OpenLog>,
}

impl RunLogger {
    /// `program` is the command path the file names are derived from.
    pub fn new(program: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            dir: dir.into(),
            current: None,
        }
    }

    /// Path the log for `run_id` lives at.
    pub fn path_for(&self, run_id: RunId) -> PathBuf {
        logfile_name(&self.program, &self.dir, run_id)
    }

    /// Path of the currently open log, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|log| log.path.as_path())
    }

    /// Open (creating or truncating) the log for `run_id`, closing any
    /// log that is still open.
    pub fn open(&mut self, run_id: RunId) -> Result<&Path> {
        self.close()?;

        let path = self.path_for(run_id);
        let file = File::create(&path).map_err(|source| RunLogError::Open {
            path: path.clone(),
            source,
        })?;
        debug!(run_id, path = %path.display(), "opened run log");

        let log = self.current.insert(OpenLog {
            path,
            writer: BufWriter::new(file),
        });
        Ok(&log.path)
    }

    /// Append raw bytes to the open log.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let log = self.current.as_mut().ok_or(RunLogError::NotOpen)?;
        log.writer
            .write_all(data)
            .map_err(|source| RunLogError::Write {
                path: log.path.clone(),
                source,
            })
    }

    /// Flush and release the open log. No-op when nothing is open.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut log) = self.current.take() else {
            return Ok(());
        };
        log.writer.flush().map_err(|source| RunLogError::Write {
            path: log.path.clone(),
            source,
        })?;
        debug!(path = %log.path.display(), "closed run log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_raw_bytes_to_named_file() {
        let dir = TempDir::new().unwrap();
        let mut logger = RunLogger::new("./bin/flaky", dir.path());

        let path = logger.open(3).unwrap().to_path_buf();
        assert_eq!(path, dir.path().join("bin-flaky-0003.log"));

        logger.write(b"\x1b[31mred\x1b[0m\r\n").unwrap();
        logger.write(&[0xff, 0x00]).unwrap();
        logger.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, b"\x1b[31mred\x1b[0m\r\n\xff\x00");
    }

    #[test]
    fn open_closes_previous_log() {
        let dir = TempDir::new().unwrap();
        let mut logger = RunLogger::new("cmd", dir.path());

        logger.open(1).unwrap();
        logger.write(b"first").unwrap();
        logger.open(2).unwrap();
        logger.write(b"second").unwrap();
        logger.close().unwrap();

        assert_eq!(std::fs::read(dir.path().join("cmd-0001.log")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join("cmd-0002.log")).unwrap(), b"second");
    }

    #[test]
    fn reopening_truncates() {
        let dir = TempDir::new().unwrap();
        let mut logger = RunLogger::new("cmd", dir.path());

        logger.open(1).unwrap();
        logger.write(b"a long first attempt").unwrap();
        logger.open(1).unwrap();
        logger.write(b"short").unwrap();
        logger.close().unwrap();

        assert_eq!(std::fs::read(dir.path().join("cmd-0001.log")).unwrap(), b"short");
    }

    #[test]
    fn write_without_open_is_misuse() {
        let dir = TempDir::new().unwrap();
        let mut logger = RunLogger::new("cmd", dir.path());

        assert!(matches!(logger.write(b"x"), Err(RunLogError::NotOpen)));

        logger.open(1).unwrap();
        logger.close().unwrap();
        assert!(matches!(logger.write(b"x"), Err(RunLogError::NotOpen)));
    }

    #[test]
    fn close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut logger = RunLogger::new("cmd", dir.path());

        logger.close().unwrap();
        logger.open(1).unwrap();
        assert!(logger.current_path().is_some());
        logger.close().unwrap();
        logger.close().unwrap();
        assert!(logger.current_path().is_none());
    }

    #[test]
    fn open_fails_when_directory_is_missing() {
        let dir = TempDir::new().unwrap();
        let mut logger = RunLogger::new("cmd", dir.path().join("missing"));

        assert!(matches!(logger.open(1), Err(RunLogError::Open { .. })));
    }
}
