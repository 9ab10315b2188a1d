use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

use crate::platform::SafeStderr;

/// Extension of the files picked up from the input directory
pub const DEFAULT_EXTENSION: &str = "log";
/// Separator between the timestamp field and the rest of a line
pub const DEFAULT_SEPARATOR: char = ',';
/// Number of worker threads in the pool
pub const DEFAULT_THREADS: usize = 15;
/// Delay after each merged line.
///
/// Every task waits this long between lines so that all files advance through
/// time at a comparable rate. The merge buffer only emits lines older than the
/// newest inserted one, so this pacing is what keeps the merged output ordered.
pub const DEFAULT_PACE: Duration = Duration::from_secs(1);
/// Orderly shutdown wait before in-flight tasks are cancelled
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(150 * 60);
/// Wait for cancelled tasks to stop before the pool is abandoned
pub const DEFAULT_FORCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Main configuration struct for a merge run
#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub input: InputConfig,
    pub performance: PerformanceConfig,
    pub shutdown: ShutdownConfig,
    pub output: OutputConfig,
}

/// Input configuration
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub dir: PathBuf,
    pub extension: String,
    pub file_order: FileOrder,
    pub create_dir: bool,
    pub separator: char,
    pub ts_format: Option<String>,
    /// Apply timestamp offsets so keys are UTC instants
    pub utc: bool,
}

/// Performance configuration
#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    pub threads: usize,
    pub pace: Duration,
    pub restart_skips_merged: bool,
}

/// Worker pool shutdown configuration
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub graceful_timeout: Duration,
    pub force_timeout: Duration,
}

/// Output and diagnostics configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub stats: bool,
    pub stats_format: StatsFormat,
    pub quiet_level: u8,
    pub verbose: u8,
    pub no_emoji: bool,
    pub strict: bool,
}

/// Order in which discovered files are handed to the pool
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileOrder {
    None,
    Name,
    Mtime,
}

/// Run statistics output format
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsFormat {
    Table,
    Json,
}

impl MergeConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(cli: &crate::cli::Cli) -> anyhow::Result<Self> {
        let dir = cli
            .dir
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No input directory given"))?;

        Ok(Self {
            input: InputConfig {
                dir,
                extension: cli.extension.trim_start_matches('.').to_string(),
                file_order: cli.file_order,
                create_dir: !cli.no_create_dir,
                separator: cli.separator,
                ts_format: cli.ts_format.clone(),
                utc: cli.utc,
            },
            performance: PerformanceConfig {
                threads: cli.threads,
                pace: cli.pace,
                restart_skips_merged: !cli.no_restart_skips_merged,
            },
            shutdown: ShutdownConfig {
                graceful_timeout: cli.shutdown_timeout,
                force_timeout: cli.force_timeout,
            },
            output: OutputConfig {
                stats: cli.stats || cli.stats_format.is_some(),
                stats_format: cli.stats_format.unwrap_or(StatsFormat::Table),
                quiet_level: cli.quiet,
                verbose: cli.verbose,
                no_emoji: cli.no_emoji,
                strict: !cli.no_strict,
            },
        })
    }

    /// Get effective thread count with defaults
    pub fn effective_threads(&self) -> usize {
        if self.performance.threads == 0 {
            num_cpus::get()
        } else {
            self.performance.threads
        }
    }

    /// Diagnostics writer honoring the quiet/verbose levels
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(
            self.output.quiet_level,
            self.output.verbose,
            crate::tty::should_use_emoji(self.output.no_emoji),
        )
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            input: InputConfig {
                dir: PathBuf::from("."),
                extension: DEFAULT_EXTENSION.to_string(),
                file_order: FileOrder::Name,
                create_dir: true,
                separator: DEFAULT_SEPARATOR,
                ts_format: None,
                utc: false,
            },
            performance: PerformanceConfig {
                threads: DEFAULT_THREADS,
                pace: DEFAULT_PACE,
                restart_skips_merged: true,
            },
            shutdown: ShutdownConfig {
                graceful_timeout: DEFAULT_GRACEFUL_TIMEOUT,
                force_timeout: DEFAULT_FORCE_TIMEOUT,
            },
            output: OutputConfig {
                stats: false,
                stats_format: StatsFormat::Table,
                quiet_level: 0,
                verbose: 0,
                no_emoji: false,
                strict: true,
            },
        }
    }
}

/// Writes diagnostics to stderr, separate from the merged output on stdout.
///
/// Quiet levels: 1 hides info markers, 2 also hides warnings, 3 hides errors.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    quiet_level: u8,
    verbose: u8,
    use_emoji: bool,
}

impl Diagnostics {
    pub fn new(quiet_level: u8, verbose: u8, use_emoji: bool) -> Self {
        Self {
            quiet_level,
            verbose,
            use_emoji,
        }
    }

    /// Diagnostics that never print anything
    pub fn silent() -> Self {
        Self::new(3, 0, false)
    }

    pub fn format_error_message(&self, message: &str) -> String {
        self.prefixed("⚠️ ", message)
    }

    pub fn format_warning_message(&self, message: &str) -> String {
        self.prefixed("⚠️ ", &format!("Warning: {}", message))
    }

    pub fn format_info_message(&self, message: &str) -> String {
        self.prefixed("🔹", message)
    }

    pub fn format_stats_message(&self, message: &str) -> String {
        if self.use_emoji {
            format!("📈 Stats:\n{}", message)
        } else {
            format!("logweave: Stats:\n{}", message)
        }
    }

    fn prefixed(&self, emoji: &str, message: &str) -> String {
        if self.use_emoji {
            format!("{} {}", emoji, message)
        } else {
            format!("logweave: {}", message)
        }
    }

    pub fn error(&self, message: &str) {
        if self.quiet_level < 3 {
            self.emit(&self.format_error_message(message));
        }
    }

    pub fn warn(&self, message: &str) {
        if self.quiet_level < 2 {
            self.emit(&self.format_warning_message(message));
        }
    }

    pub fn info(&self, message: &str) {
        if self.quiet_level < 1 {
            self.emit(&self.format_info_message(message));
        }
    }

    /// Per-task detail, only with -v
    pub fn detail(&self, message: &str) {
        if self.verbose > 0 && self.quiet_level < 1 {
            self.emit(&self.format_info_message(message));
        }
    }

    pub fn stats(&self, message: &str) {
        if self.quiet_level < 3 {
            self.emit(&self.format_stats_message(message));
        }
    }

    fn emit(&self, line: &str) {
        SafeStderr::new().writeln(line).unwrap_or(());
    }
}
