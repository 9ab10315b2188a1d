//! Merge run coordination
//!
//! One run discovers the input files, dispatches one task per file onto a
//! fresh worker pool, waits for the pool to shut down, and drains whatever is
//! left in the merge buffer.

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Diagnostics, MergeConfig};
use crate::discovery;
use crate::merge::MergeBuffer;
use crate::platform::Ctrl;
use crate::pool::{PoolShutdown, ShutdownOutcome, WorkerPool};
use crate::stats::RunStats;
use crate::task::{MergeTask, TaskOutcome, TaskReport, TaskSettings};
use crate::timestamp::TimestampParser;

/// Result of one merge run
#[derive(Debug)]
pub struct RunSummary {
    pub stats: RunStats,
    pub shutdown: ShutdownOutcome,
    pub reports: Vec<TaskReport>,
    /// Set when dispatching tasks failed and the pool was stopped early
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn is_interrupted(&self) -> bool {
        self.shutdown.is_interrupted()
    }

    /// The run did not do everything it set out to do
    pub fn has_failures(&self) -> bool {
        self.aborted.is_some() || self.stats.has_failures()
    }
}

/// Merge every matching file of the configured directory into `output`
pub fn run_merge<W: Write + Send + 'static>(
    config: &MergeConfig,
    output: W,
    ctrl_rx: &Receiver<Ctrl>,
) -> Result<RunSummary> {
    let started = Instant::now();
    let diagnostics = config.diagnostics();
    let dir = &config.input.dir;

    diagnostics.info(&format!("Merge started for {}", dir.display()));

    if config.input.create_dir && discovery::ensure_dir(dir)? {
        diagnostics.info(&format!("Created input directory {}", dir.display()));
    }

    let files = discovery::discover_log_files(dir, &config.input.extension, config.input.file_order)?;
    diagnostics.info(&format!(
        "Found {} .{} file{} to merge",
        files.len(),
        config.input.extension,
        if files.len() == 1 { "" } else { "s" }
    ));

    let buffer = Arc::new(MergeBuffer::new(output));
    let settings = Arc::new(TaskSettings {
        pace: config.performance.pace,
        restart_skips_merged: config.performance.restart_skips_merged,
        parser: TimestampParser::new(config.input.separator, config.input.ts_format.clone())
            .with_utc(config.input.utc),
        diagnostics: diagnostics.clone(),
    });

    let mut pool = WorkerPool::new(config.effective_threads())?;
    diagnostics.detail(&format!("Started {} worker threads", pool.size()));

    let mut aborted = None;
    for path in &files {
        let task = MergeTask::new(path.clone(), Arc::clone(&buffer), Arc::clone(&settings));
        if let Err(e) = pool.submit(path.clone(), move |cancel| task.run(cancel)) {
            diagnostics.error(&format!(
                "Failed to dispatch {}: {:#}",
                path.display(),
                e
            ));
            aborted = Some(format!("{:#}", e));
            break;
        }
    }

    let shutdown = if aborted.is_some() {
        pool.shutdown_now(config.shutdown.force_timeout)
    } else {
        pool.shutdown(&config.shutdown, ctrl_rx)
    };
    report_shutdown(&diagnostics, &shutdown);

    // Detached workers may still insert; the lock keeps the drain consistent
    let drained = buffer
        .drain()
        .context("Failed to write remaining merged lines")?;
    diagnostics.detail(&format!("Drained {} buffered lines", drained));

    for report in &shutdown.reports {
        report_task(&diagnostics, report, config.output.strict);
    }

    let stats = RunStats::from_reports(
        files.len(),
        &shutdown.reports,
        shutdown.unreported(),
        buffer.stats(),
        started.elapsed(),
    );

    diagnostics.info(&format!(
        "Merge finished for {} in {}ms",
        dir.display(),
        stats.elapsed.as_millis()
    ));

    Ok(RunSummary {
        stats,
        shutdown: shutdown.outcome,
        reports: shutdown.reports,
        aborted,
    })
}

fn report_shutdown(diagnostics: &Diagnostics, shutdown: &PoolShutdown) {
    match shutdown.outcome {
        ShutdownOutcome::Completed => {}
        ShutdownOutcome::Forced { remaining } => {
            diagnostics.warn("Shutdown timeout reached, cancelled running merge tasks");
            if remaining > 0 {
                diagnostics.warn(&format!(
                    "Worker pool did not terminate, {} worker{} detached",
                    remaining,
                    if remaining == 1 { "" } else { "s" }
                ));
            }
        }
        ShutdownOutcome::Interrupted { remaining } => {
            diagnostics.warn("Interrupted, cancelled running merge tasks");
            if remaining > 0 {
                diagnostics.warn(&format!(
                    "Worker pool did not terminate, {} worker{} detached",
                    remaining,
                    if remaining == 1 { "" } else { "s" }
                ));
            }
        }
    }
}

fn report_task(diagnostics: &Diagnostics, report: &TaskReport, strict: bool) {
    let path = report.path.display();
    match &report.outcome {
        TaskOutcome::Completed {
            lines,
            charset,
            restarts,
        } => {
            let restart_note = if *restarts > 0 {
                format!(" after {} restart{}", restarts, if *restarts == 1 { "" } else { "s" })
            } else {
                String::new()
            };
            diagnostics.detail(&format!(
                "{}: merged {} lines as {}{}",
                path, lines, charset, restart_note
            ));
        }
        TaskOutcome::Failed { error, lines, .. } => {
            let message = format!("{}: {} ({} lines merged before failure)", path, error, lines);
            if strict {
                diagnostics.error(&message);
            } else {
                diagnostics.detail(&message);
            }
        }
        TaskOutcome::Cancelled { lines } => {
            diagnostics.detail(&format!("{}: cancelled after {} lines", path, lines));
        }
        TaskOutcome::Panicked { message } => {
            diagnostics.error(&format!("{}: merge task panicked: {}", path, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeConfig;
    use crossbeam_channel::unbounded;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedSink {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn test_config(dir: &std::path::Path) -> MergeConfig {
        let mut config = MergeConfig::default();
        config.input.dir = dir.to_path_buf();
        config.performance.pace = Duration::ZERO;
        config.performance.threads = 2;
        config.output.quiet_level = 3;
        config
    }

    #[test]
    fn test_single_file_run() {
        let dir = TempDir::new().unwrap();
        let content = "2024-01-01T00:00:01,a\n2024-01-01T00:00:02,b\n2024-01-01T00:00:03,c\n";
        fs::write(dir.path().join("one.log"), content).unwrap();
        fs::write(dir.path().join("ignored.txt"), "not,a,log\n").unwrap();

        let sink = SharedSink::default();
        let (_tx, rx) = unbounded();
        let summary = run_merge(&test_config(dir.path()), sink.clone(), &rx).unwrap();

        assert_eq!(sink.text(), content);
        assert_eq!(summary.shutdown, ShutdownOutcome::Completed);
        assert_eq!(summary.stats.files_found, 1);
        assert_eq!(summary.stats.completed, 1);
        assert_eq!(summary.stats.lines_merged, 3);
        assert_eq!(summary.stats.lines_emitted + summary.stats.lines_drained, 3);
        assert!(!summary.has_failures());
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let sink = SharedSink::default();
        let (_tx, rx) = unbounded();
        let summary = run_merge(&test_config(dir.path()), sink.clone(), &rx).unwrap();

        assert_eq!(summary.stats.files_found, 0);
        assert!(sink.text().is_empty());
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("incoming");
        let (_tx, rx) = unbounded();
        let summary = run_merge(&test_config(&target), SharedSink::default(), &rx).unwrap();

        assert!(target.is_dir());
        assert_eq!(summary.stats.files_found, 0);
    }

    #[test]
    fn test_missing_directory_without_create_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir.path().join("absent"));
        config.input.create_dir = false;
        let (_tx, rx) = unbounded();

        let err = run_merge(&config, SharedSink::default(), &rx).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to list directory"));
    }

    #[test]
    fn test_failed_task_does_not_stop_others() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.log"), "yesterday,oops\n").unwrap();
        fs::write(dir.path().join("good.log"), "2024-01-01T00:00:01,fine\n").unwrap();

        let sink = SharedSink::default();
        let (_tx, rx) = unbounded();
        let summary = run_merge(&test_config(dir.path()), sink.clone(), &rx).unwrap();

        assert_eq!(sink.text(), "2024-01-01T00:00:01,fine\n");
        assert_eq!(summary.stats.completed, 1);
        assert_eq!(summary.stats.failed, 1);
        assert!(summary.has_failures());
    }
}
