// Core library for the logweave log merger

pub mod cli;
pub mod config;
pub mod config_file;
pub mod discovery;
pub mod merge;
pub mod platform;
pub mod pool;
pub mod readers;
pub mod runner;
pub mod stats;
pub mod task;
pub mod timestamp;
pub mod tty;

pub use config::{Diagnostics, MergeConfig};
pub use merge::{LogLine, MergeBuffer, MergeError};
pub use pool::{CancelToken, ShutdownOutcome, WorkerPool};
pub use readers::{Charset, LineReader};
pub use runner::{run_merge, RunSummary};
pub use stats::RunStats;
pub use task::{TaskOutcome, TaskReport};
pub use timestamp::{LineTimestamp, TimestampParser};
