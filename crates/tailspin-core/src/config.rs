//! Harness configuration.
//!
//! Config files use a `key=value` format with `#` comments.
//! Precedence: CLI flags > `--config` file > `.tailspin/config` > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default project-local config file.
pub const DEFAULT_CONFIG_PATH: &str = ".tailspin/config";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("no command given")]
    EmptyCommand,
}

/// Everything one harness invocation needs, built once up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Command and arguments; `command[0]` also names the log files.
    pub command: Vec<String>,
    /// Desired number of runs; 0 loops until cancelled.
    pub runs: u64,
    /// Root under which `NNN/` run directories are allocated.
    pub logs_root: PathBuf,
    /// Initial pseudo-terminal size.
    pub cols: u16,
    pub rows: u16,
    /// Pause between termination signal steps.
    pub escalation_delay_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            runs: 1,
            logs_root: PathBuf::from("logs"),
            cols: 80,
            rows: 24,
            escalation_delay_ms: 100,
        }
    }
}

impl HarnessConfig {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let value = Self::unquote(value.trim());
            self.apply_value(key.trim(), &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "runs" => self.runs = Self::parse_int(key, value)?,
            "logs_dir" => self.logs_root = PathBuf::from(value),
            "cols" => self.cols = Self::parse_int(key, value)?,
            "rows" => self.rows = Self::parse_int(key, value)?,
            "escalation_delay_ms" => self.escalation_delay_ms = Self::parse_int(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Reject configurations the harness cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.first().map_or(true, String::is_empty) {
            return Err(ConfigError::EmptyCommand);
        }
        Ok(())
    }

    /// The program path, used to name per-run log files.
    pub fn program(&self) -> &str {
        self.command.first().map_or("", String::as_str)
    }

    pub fn escalation_delay(&self) -> Duration {
        Duration::from_millis(self.escalation_delay_ms)
    }

    /// The command as one display line.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_expected_values() {
        let config = HarnessConfig::default();
        assert_eq!(config.runs, 1);
        assert_eq!(config.logs_root, PathBuf::from("logs"));
        assert_eq!((config.cols, config.rows), (80, 24));
        assert_eq!(config.escalation_delay(), Duration::from_millis(100));
        assert!(config.command.is_empty());
    }

    #[test]
    fn parse_simple_config() {
        let mut config = HarnessConfig::default();
        let content = r#"
# stress settings
runs=0
logs_dir="/tmp/tailspin logs"
cols=132
rows = 50
escalation_delay_ms='25'
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.runs, 0);
        assert_eq!(config.logs_root, PathBuf::from("/tmp/tailspin logs"));
        assert_eq!((config.cols, config.rows), (132, 50));
        assert_eq!(config.escalation_delay(), Duration::from_millis(25));
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(HarnessConfig::unquote("\"hello\""), "hello");
        assert_eq!(HarnessConfig::unquote("'world'"), "world");
        assert_eq!(HarnessConfig::unquote("noquotes"), "noquotes");
        assert_eq!(HarnessConfig::unquote("\""), "\"");
    }

    #[test]
    fn parse_rejects_bad_input() {
        let mut config = HarnessConfig::default();
        assert!(matches!(
            config.parse_content("runs"),
            Err(ConfigError::InvalidLine(_))
        ));
        assert!(matches!(
            config.parse_content("runs=many"),
            Err(ConfigError::InvalidInt { .. })
        ));
        assert!(matches!(
            config.parse_content("cols=-1"),
            Err(ConfigError::InvalidInt { .. })
        ));
        assert!(matches!(
            config.parse_content("model=opus"),
            Err(ConfigError::UnknownKey(key)) if key == "model"
        ));
    }

    #[test]
    fn from_file_merges_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "runs=5\n").unwrap();

        let config = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(config.runs, 5);
        assert_eq!(config.cols, 80);
    }

    #[test]
    fn validate_requires_a_command() {
        let mut config = HarnessConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCommand)));

        config.command = vec![String::new()];
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCommand)));

        config.command = vec!["./flaky.sh".to_string(), "--fast".to_string()];
        config.validate().unwrap();
        assert_eq!(config.program(), "./flaky.sh");
        assert_eq!(config.command_line(), "./flaky.sh --fast");
    }
}
