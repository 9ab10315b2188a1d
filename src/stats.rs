use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::merge::MergeStats;
use crate::task::{TaskOutcome, TaskReport};

/// Statistics collected over one merge run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub files_found: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub panicked: usize,
    /// Tasks whose worker was detached before reporting
    pub unreported: usize,
    pub lines_merged: usize,
    pub lines_emitted: usize,
    pub lines_drained: usize,
    pub restarts: usize,
    pub duplicates: usize,
    /// Failed tasks by error category
    pub failures_by_kind: BTreeMap<String, usize>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl RunStats {
    pub fn from_reports(
        files_found: usize,
        reports: &[TaskReport],
        unreported: usize,
        merge: MergeStats,
        elapsed: Duration,
    ) -> Self {
        let mut stats = Self {
            files_found,
            unreported,
            lines_emitted: merge.emitted,
            lines_drained: merge.drained,
            duplicates: merge.duplicates,
            elapsed,
            ..Default::default()
        };

        for report in reports {
            stats.lines_merged += report.outcome.lines();
            stats.restarts += report.outcome.restarts();
            match &report.outcome {
                TaskOutcome::Completed { .. } => stats.completed += 1,
                TaskOutcome::Failed { error, .. } => {
                    stats.failed += 1;
                    *stats
                        .failures_by_kind
                        .entry(error.as_label().to_string())
                        .or_insert(0) += 1;
                }
                TaskOutcome::Cancelled { .. } => stats.cancelled += 1,
                TaskOutcome::Panicked { .. } => stats.panicked += 1,
            }
        }

        stats
    }

    /// Any task failed or panicked
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.panicked > 0
    }

    pub fn format_stats(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "Files: {} found, {} completed",
            self.files_found, self.completed
        ));
        if self.failed > 0 {
            output.push_str(&format!(", {} failed", self.failed));
        }
        if self.cancelled > 0 {
            output.push_str(&format!(", {} cancelled", self.cancelled));
        }
        if self.panicked > 0 {
            output.push_str(&format!(", {} panicked", self.panicked));
        }
        if self.unreported > 0 {
            output.push_str(&format!(", {} unreported", self.unreported));
        }
        output.push('\n');

        output.push_str(&format!(
            "Lines: {} merged, {} emitted during run, {} drained at end",
            self.lines_merged, self.lines_emitted, self.lines_drained
        ));
        if self.restarts > 0 {
            output.push_str(&format!(", {} charset restarts", self.restarts));
        }
        if self.duplicates > 0 {
            output.push_str(&format!(", {} duplicate timestamps", self.duplicates));
        }

        let elapsed_ms = self.elapsed.as_millis();
        output.push_str(&format!(" in {}ms", elapsed_ms));
        if elapsed_ms > 0 && self.lines_merged > 0 {
            let lines_per_sec = (self.lines_merged as f64 * 1000.0) / elapsed_ms as f64;
            output.push_str(&format!(" ({:.0} lines/s)", lines_per_sec));
        }

        output
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One-line summary of failed tasks, if any
    pub fn failure_summary(&self) -> Option<String> {
        if !self.has_failures() {
            return None;
        }

        let mut parts: Vec<String> = self
            .failures_by_kind
            .iter()
            .map(|(kind, count)| format!("{} {}", count, kind))
            .collect();
        if self.panicked > 0 {
            parts.push(format!("{} panicked", self.panicked));
        }

        let total = self.failed + self.panicked;
        Some(format!(
            "{} of {} file{} failed ({})",
            total,
            self.files_found,
            if self.files_found == 1 { "" } else { "s" },
            parts.join(", ")
        ))
    }
}
