pub mod config;
pub mod logdir;
pub mod naming;
pub mod sink;
pub mod stats;
pub mod types;

pub use config::HarnessConfig;
pub use logdir::LogDirectory;
pub use sink::{NullSink, StatUpdate, StatusSink, TerminalSink};
pub use stats::StatsAggregator;
pub use types::*;
