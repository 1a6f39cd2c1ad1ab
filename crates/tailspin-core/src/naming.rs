//! Per-run log file naming.
//!
//! Turns a command path into a descriptive file name that looks like the
//! path it came from, minus the characters that don't belong in a name:
//! `./scripts/flaky.sh` run 27 lands in `<dir>/scripts-flaky.sh-0027.log`.

use std::path::{Path, PathBuf};

/// Minimum width of the zero-padded run id in a log file name.
pub const RUN_ID_WIDTH: usize = 4;

/// Build the log file path for one run of `command`.
///
/// Purely lexical: the filesystem is never consulted.
pub fn logfile_name(command: &str, dir: &Path, run_id: u64) -> PathBuf {
    let descriptor = descriptor(command);
    dir.join(format!("{descriptor}-{}.log", pad_run_id(run_id)))
}

/// Hyphen-joined, normalized form of a command path.
pub fn descriptor(command: &str) -> String {
    let normalized = normalize(command);
    let trimmed = normalized.trim_start_matches('.');
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    trimmed.replace('/', "-")
}

/// Zero-pad a run id to at least [`RUN_ID_WIDTH`] digits.
pub fn pad_run_id(run_id: u64) -> String {
    format!("{run_id:0width$}", width = RUN_ID_WIDTH)
}

/// Lexically normalize a slash-separated path.
///
/// Collapses duplicate separators and `.` segments and folds `..` into the
/// preceding segment. Leading `..` segments of a relative path are kept;
/// `..` directly under the root is dropped.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
