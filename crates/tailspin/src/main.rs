//! tailspin - loop a command under a pseudo-terminal and keep score.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use eyre::WrapErr;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tailspin::{HarnessOutcome, PassthroughTerminal, RunHarness, StatusHeader};
use tailspin_core::config::{ConfigError, DEFAULT_CONFIG_PATH};
use tailspin_core::HarnessConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Diagnostic log, kept next to the numbered run directories.
const DIAGNOSTIC_LOG: &str = "tailspin.log";

#[derive(Parser, Debug)]
#[command(
    name = "tailspin",
    about = "Run a command repeatedly under a pseudo-terminal, logging every run",
    version
)]
struct Cli {
    /// Number of times to run the command (0 = until interrupted)
    #[arg(short, long, env = "TAILSPIN_RUNS")]
    runs: Option<u64>,

    /// Directory the numbered run directories are created under
    #[arg(long, env = "TAILSPIN_LOGS_DIR")]
    logs_dir: Option<PathBuf>,

    /// Config file (key=value), applied over .tailspin/config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Terminal width given to the command
    #[arg(long)]
    cols: Option<u16>,

    /// Terminal height given to the command
    #[arg(long)]
    rows: Option<u16>,

    /// Command to run, with its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    /// Where diagnostics go when the configuration itself cannot be resolved.
    fn fallback_logs_root(&self) -> PathBuf {
        self.logs_dir
            .clone()
            .unwrap_or_else(|| HarnessConfig::default().logs_root)
    }

    /// Layer the flags over the config files and defaults.
    fn resolve(self, default_file: &Path) -> Result<HarnessConfig, ConfigError> {
        let mut config = HarnessConfig::default();
        if default_file.is_file() {
            config.load_file(default_file)?;
        }
        if let Some(path) = &self.config {
            config.load_file(path)?;
        }

        if let Some(runs) = self.runs {
            config.runs = runs;
        }
        if let Some(logs_dir) = self.logs_dir {
            config.logs_root = logs_dir;
        }
        if let Some(cols) = self.cols {
            config.cols = cols;
        }
        if let Some(rows) = self.rows {
            config.rows = rows;
        }
        config.command = self.command;

        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    // eyre captures a backtrace where each report is created, if asked to.
    if std::env::var_os("RUST_LIB_BACKTRACE").is_none() {
        std::env::set_var("RUST_LIB_BACKTRACE", "1");
    }
    let cli = Cli::parse();
    let fallback_root = cli.fallback_logs_root();

    let config = match cli.resolve(Path::new(DEFAULT_CONFIG_PATH)) {
        Ok(config) => config,
        Err(e) => {
            if init_diagnostics(&fallback_root).is_ok() {
                error!("invalid configuration: {e}");
            }
            eprintln!("tailspin: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_diagnostics(&config.logs_root) {
        eprintln!("tailspin: {e:?}");
        return ExitCode::FAILURE;
    }
    install_panic_hook();
    debug!(?config, "starting");

    match run(config) {
        Ok(outcome) => {
            debug!(?outcome, "exiting");
            ExitCode::SUCCESS
        }
        Err(report) => {
            error!("fatal: {report:?}");
            eprintln!("tailspin: {report:?}");
            ExitCode::FAILURE
        }
    }
}

fn init_diagnostics(logs_root: &Path) -> eyre::Result<()> {
    std::fs::create_dir_all(logs_root)
        .wrap_err_with(|| format!("failed to create {}", logs_root.display()))?;
    let path = logs_root.join(DIAGNOSTIC_LOG);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .wrap_err_with(|| format!("failed to open {}", path.display()))?;

    fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TAILSPIN_LOG").unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = Backtrace::force_capture();
        error!("panic: {info}\n{backtrace}");
        default_hook(info);
    }));
}

fn run(config: HarnessConfig) -> eyre::Result<HarnessOutcome> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create tokio runtime")?;

    runtime.block_on(async {
        let mut harness =
            RunHarness::new(config, PassthroughTerminal::stdout(), StatusHeader::stderr())?;
        info!(dir = %harness.log_dir(), "logging runs");

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("received SIGINT, stopping");
                    cancel.cancel();
                }
            })
        };

        let outcome = harness.run_until_cancelled(cancel).await;
        interrupt.abort();
        let outcome = outcome?;

        let stats = harness.stats();
        eprintln!(
            "tailspin: {} runs, {} passed, logs in {}",
            stats.runs, stats.pass_rate, harness.log_dir()
        );
        Ok::<_, eyre::Report>(outcome)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn command_keeps_its_own_flags() {
        let cli = Cli::try_parse_from(["tailspin", "-r", "3", "./flaky", "--seed", "-v"]).unwrap();
        assert_eq!(cli.runs, Some(3));
        assert_eq!(cli.command, vec!["./flaky", "--seed", "-v"]);
    }

    #[test]
    fn missing_command_is_rejected() {
        assert!(Cli::try_parse_from(["tailspin", "--runs", "2"]).is_err());
    }

    #[test]
    fn flags_override_config_files() {
        let dir = TempDir::new().unwrap();
        let default_file = dir.path().join("default");
        let explicit = dir.path().join("explicit");
        std::fs::write(&default_file, "runs=4\ncols=100\nrows=40\n").unwrap();
        std::fs::write(&explicit, "runs=6\nlogs_dir=out\n").unwrap();

        let cli = Cli::try_parse_from([
            "tailspin",
            "--config",
            explicit.to_str().unwrap(),
            "--rows",
            "10",
            "true",
        ])
        .unwrap();
        let config = cli.resolve(&default_file).unwrap();

        assert_eq!(config.runs, 6);
        assert_eq!(config.logs_root, PathBuf::from("out"));
        assert_eq!((config.cols, config.rows), (100, 10));
        assert_eq!(config.command, vec!["true"]);
    }

    #[test]
    fn absent_default_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let cli = Cli::try_parse_from(["tailspin", "echo", "hi"]).unwrap();
        let config = cli.resolve(&dir.path().join("missing")).unwrap();
        assert_eq!(config.runs, 1);
        assert_eq!(config.logs_root, PathBuf::from("logs"));
    }

    #[test]
    fn fallback_root_follows_logs_flag() {
        let cli = Cli::try_parse_from(["tailspin", "--logs-dir", "/tmp/ts", "true"]).unwrap();
        assert_eq!(cli.fallback_logs_root(), PathBuf::from("/tmp/ts"));

        let cli = Cli::try_parse_from(["tailspin", "true"]).unwrap();
        assert_eq!(cli.fallback_logs_root(), PathBuf::from("logs"));
    }

    #[test]
    fn bad_config_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("explicit");
        std::fs::write(&explicit, "retries=2\n").unwrap();

        let cli =
            Cli::try_parse_from(["tailspin", "--config", explicit.to_str().unwrap(), "true"])
                .unwrap();
        assert!(matches!(
            cli.resolve(&dir.path().join("missing")),
            Err(ConfigError::UnknownKey(_))
        ));
    }
}
