//! Log directory allocation.
//!
//! Every harness invocation gets its own numbered directory under the logs
//! root: `logs/001/`, `logs/002/`, ... The first id whose path does not
//! exist wins. Nothing is persisted between calls, so an id freed by
//! removing its directory is handed out again by the next allocation.
//!
//! Allocation is not synchronized across processes. Two invocations that
//! scan at the same moment can pick the same id; the loser fails when it
//! tries to create the directory.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Lowest directory id handed out.
pub const FIRST_DIR_ID: u16 = 1;

/// Highest directory id handed out.
pub const LAST_DIR_ID: u16 = 998;

#[derive(Debug, Error)]
pub enum LogDirError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no free log directory id under {} (001..=998 all in use)", root.display())]
    Exhausted { root: PathBuf },
}

pub type Result<T> = std::result::Result<T, LogDirError>;

/// A freshly allocated per-invocation log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirectory {
    id: u16,
    path: PathBuf,
}

impl LogDirectory {
    /// Allocate the first free numbered directory under `root`.
    ///
    /// Creates `root` if needed, then checks ids in increasing order and
    /// creates the first one that does not exist yet.
    pub fn allocate(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;

        for id in FIRST_DIR_ID..=LAST_DIR_ID {
            let path = root.join(format!("{id:03}"));
            if !path.exists() {
                fs::create_dir(&path)?;
                return Ok(Self { id, path });
            }
        }

        Err(LogDirError::Exhausted {
            root: root.to_path_buf(),
        })
    }

    /// Numeric id of the directory (1..=998).
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for LogDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
