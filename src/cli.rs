// Command-line interface definitions and validation

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{FileOrder, StatsFormat};

/// Largest worker pool accepted on the command line
pub const MAX_THREADS: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "logweave")]
#[command(about = "Merge a directory of per-server log files into one time-ordered stream")]
#[command(
    long_about = "Merge a directory of per-server log files into one time-ordered stream\n\nEvery line must start with an ISO-8601 timestamp followed by the separator.\nFiles are read concurrently and merged through a shared timestamp-ordered\nbuffer; merged lines go to stdout, diagnostics to stderr.\n\nCOMMON EXAMPLES:\n  logweave /var/log/collected\n  logweave -e txt --pace 200ms ./logs\n  logweave --pace 0s --stats=json single-server/"
)]
#[command(author = "Dirk Loss <mail@dirk-loss.de>")]
#[command(version)]
#[command(args_override_self = true)]
pub struct Cli {
    /// Directory holding the log files to merge
    pub dir: Option<PathBuf>,

    /// Extension of the files to merge
    #[arg(
        short = 'e',
        long = "ext",
        default_value = crate::config::DEFAULT_EXTENSION,
        help_heading = "Input Options"
    )]
    pub extension: String,

    /// Separator between the timestamp and the rest of each line
    #[arg(
        short = 's',
        long = "separator",
        default_value_t = crate::config::DEFAULT_SEPARATOR,
        help_heading = "Input Options"
    )]
    pub separator: char,

    /// Custom chrono format for the timestamp field (default: ISO-8601)
    #[arg(long = "ts-format", help_heading = "Input Options")]
    pub ts_format: Option<String>,

    /// Order by UTC instant instead of the local time as written
    #[arg(long = "utc", help_heading = "Input Options")]
    pub utc: bool,

    /// Order in which files are handed to the workers
    #[arg(
        long = "file-order",
        value_enum,
        default_value_t = FileOrder::Name,
        help_heading = "Input Options"
    )]
    pub file_order: FileOrder,

    /// Fail instead of creating a missing input directory
    #[arg(long = "no-create-dir", help_heading = "Input Options")]
    pub no_create_dir: bool,

    /// Number of worker threads (0 = one per CPU)
    #[arg(
        short = 'j',
        long = "threads",
        default_value_t = crate::config::DEFAULT_THREADS,
        help_heading = "Performance Options"
    )]
    pub threads: usize,

    /// Delay after each merged line
    #[arg(
        long = "pace",
        default_value = "1s",
        value_parser = humantime::parse_duration,
        help_heading = "Performance Options",
        help = "Delay after each merged line, e.g. 1s, 250ms, 0s.\n\nKeeps files advancing through time at a similar rate, which is what keeps the merged output ordered. Only disable it for a single file or pre-aligned inputs."
    )]
    pub pace: Duration,

    /// Re-feed every line after a charset restart
    #[arg(long = "no-restart-skips-merged", help_heading = "Performance Options")]
    pub no_restart_skips_merged: bool,

    /// Orderly wait for the worker pool to finish
    #[arg(
        long = "shutdown-timeout",
        default_value = "150m",
        value_parser = humantime::parse_duration,
        help_heading = "Performance Options"
    )]
    pub shutdown_timeout: Duration,

    /// Wait for cancelled tasks before the pool is abandoned
    #[arg(
        long = "force-timeout",
        default_value = "10s",
        value_parser = humantime::parse_duration,
        help_heading = "Performance Options"
    )]
    pub force_timeout: Duration,

    /// Task failures do not affect the exit code
    #[arg(long = "no-strict", help_heading = "Error Handling")]
    pub no_strict: bool,

    /// Show per-file detail such as restarts and task results (-v)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Error Handling")]
    pub verbose: u8,

    /// Quiet mode: -q hides info markers, -qq also warnings, -qqq everything
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count, help_heading = "Display Options")]
    pub quiet: u8,

    /// Disable emoji prefixes in diagnostics
    #[arg(long = "no-emoji", help_heading = "Display Options")]
    pub no_emoji: bool,

    /// Print run statistics to stderr when done
    #[arg(long = "stats", help_heading = "Metrics and Stats")]
    pub stats: bool,

    /// Statistics format (implies --stats)
    #[arg(long = "stats-format", value_enum, help_heading = "Metrics and Stats")]
    pub stats_format: Option<StatsFormat>,

    /// Specify custom configuration file path
    #[arg(long = "config-file", help_heading = "Configuration Options")]
    pub config_file: Option<String>,

    /// Ignore configuration file
    #[arg(long = "ignore-config", help_heading = "Configuration Options")]
    pub ignore_config: bool,

    /// Show configuration file and exit
    #[arg(long = "show-config", help_heading = "Configuration Options")]
    pub show_config: bool,
}

impl Cli {
    /// Checks clap cannot express
    pub fn validate(&self) -> Result<()> {
        if self.threads > MAX_THREADS {
            return Err(anyhow!(
                "--threads must be between 1 and {} (or 0 for one per CPU), got {}",
                MAX_THREADS,
                self.threads
            ));
        }

        if self.separator == '\n' || self.separator == '\r' {
            return Err(anyhow!("--separator cannot be a line terminator"));
        }

        let extension = self.extension.trim_start_matches('.');
        if extension.is_empty() || extension.contains(['/', '\\']) {
            return Err(anyhow!("Invalid extension '{}'", self.extension));
        }

        if self.dir.is_none() {
            return Err(anyhow!(
                "No input directory given (pass DIR or set it in the config file defaults)"
            ));
        }

        Ok(())
    }
}
