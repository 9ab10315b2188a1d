use anyhow::Result;
use clap::{CommandFactory, FromArgMatches};
use crossbeam_channel::unbounded;

use logweave::cli::Cli;
use logweave::config::{MergeConfig, StatsFormat};
use logweave::config_file::{self, ConfigFile};
use logweave::platform::{Ctrl, ExitCode, SafeStderr, SafeStdout, SignalHandler};
use logweave::runner::{run_merge, RunSummary};

fn main() -> Result<()> {
    // Shutdown requests from the signal handler
    let (ctrl_tx, ctrl_rx) = unbounded::<Ctrl>();

    // Initialize signal handling early
    let _signal_handler = match SignalHandler::new(ctrl_tx) {
        Ok(handler) => handler,
        Err(e) => {
            eprintln!("Failed to initialize signal handling: {}", e);
            ExitCode::GeneralError.exit();
        }
    };

    let mut stderr = SafeStderr::new();
    let cli = parse_args(&mut stderr);

    if let Err(e) = cli.validate() {
        stderr
            .writeln(&format!("logweave: Error: {}", e))
            .unwrap_or(());
        ExitCode::InvalidUsage.exit();
    }

    let config = match MergeConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            stderr
                .writeln(&format!("logweave: Error: {}", e))
                .unwrap_or(());
            ExitCode::InvalidUsage.exit();
        }
    };
    let diagnostics = config.diagnostics();

    let summary = match run_merge(&config, SafeStdout::new(), &ctrl_rx) {
        Ok(summary) => summary,
        Err(e) => {
            diagnostics.error(&format!("Merge failed: {:#}", e));
            ExitCode::GeneralError.exit();
        }
    };

    print_stats(&config, &summary);

    if summary.is_interrupted() {
        ExitCode::for_interruption().exit();
    }

    let failed = summary.aborted.is_some() || (config.output.strict && summary.has_failures());
    if failed {
        ExitCode::GeneralError.exit();
    }
    ExitCode::Success.exit();
}

fn print_stats(config: &MergeConfig, summary: &RunSummary) {
    let diagnostics = config.diagnostics();

    if config.output.stats {
        match config.output.stats_format {
            StatsFormat::Table => diagnostics.stats(&summary.stats.format_stats()),
            StatsFormat::Json => match summary.stats.to_json() {
                Ok(json) => SafeStderr::new().writeln(&json).unwrap_or(()),
                Err(e) => diagnostics.error(&format!("Failed to serialize stats: {}", e)),
            },
        }
    } else if let Some(failure_summary) = summary.stats.failure_summary() {
        diagnostics.warn(&failure_summary);
    }
}

/// Apply config file defaults, then parse
fn parse_args(stderr: &mut SafeStderr) -> Cli {
    let raw_args: Vec<String> = std::env::args().collect();

    // Check for --show-config first, before any other processing
    if raw_args.iter().any(|arg| arg == "--show-config") {
        print!("{}", ConfigFile::describe());
        ExitCode::Success.exit();
    }

    let processed_args = match config_file::process_args_with_config(raw_args) {
        Ok(args) => args,
        Err(e) => {
            stderr
                .writeln(&format!("logweave: Config file error: {:#}", e))
                .unwrap_or(());
            ExitCode::GeneralError.exit();
        }
    };

    // clap prints help/version and usage errors itself (exit 0 / 2)
    let matches = Cli::command().get_matches_from(processed_args);
    match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => {
            stderr
                .writeln(&format!("logweave: Error: {}", e))
                .unwrap_or(());
            ExitCode::InvalidUsage.exit();
        }
    }
}
