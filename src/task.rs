//! One merge task per discovered file
//!
//! A task reads its file line by line, keys each line by its timestamp and
//! inserts it into the shared merge buffer, pausing between lines. Decoding
//! starts with UTF-8; a decode failure restarts the file from the beginning
//! with the next charset in [`CHARSET_CANDIDATES`].

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Diagnostics;
use crate::merge::{LogLine, MergeBuffer, MergeError};
use crate::pool::CancelToken;
use crate::readers::{Charset, LineReader, ReadError, CHARSET_CANDIDATES};
use crate::timestamp::{TimestampError, TimestampParser};

/// Settings shared by every task of a run
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub pace: Duration,
    pub restart_skips_merged: bool,
    pub parser: TimestampParser,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("line {line}: {source}")]
    Timestamp {
        line: usize,
        source: TimestampError,
    },
    #[error("line {line}: {source}")]
    Merge { line: usize, source: MergeError },
}

impl TaskError {
    /// Short category used in summaries and statistics
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Read(ReadError::Decode { .. }) => "decode",
            TaskError::Read(_) => "read",
            TaskError::Timestamp { .. } => "timestamp",
            TaskError::Merge {
                source: MergeError::DuplicateTimestamp { .. },
                ..
            } => "duplicate",
            TaskError::Merge { .. } => "output",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.as_label() == "duplicate"
    }
}

/// What happened to one file
#[derive(Debug)]
pub enum TaskOutcome {
    Completed {
        lines: usize,
        charset: Charset,
        restarts: usize,
    },
    Failed {
        error: TaskError,
        lines: usize,
        restarts: usize,
    },
    Cancelled {
        lines: usize,
    },
    Panicked {
        message: String,
    },
}

impl TaskOutcome {
    /// Lines this task merged into the buffer
    pub fn lines(&self) -> usize {
        match self {
            TaskOutcome::Completed { lines, .. }
            | TaskOutcome::Failed { lines, .. }
            | TaskOutcome::Cancelled { lines } => *lines,
            TaskOutcome::Panicked { .. } => 0,
        }
    }

    pub fn restarts(&self) -> usize {
        match self {
            TaskOutcome::Completed { restarts, .. } | TaskOutcome::Failed { restarts, .. } => {
                *restarts
            }
            _ => 0,
        }
    }
}

/// Outcome of one file, sent back to the pool
#[derive(Debug)]
pub struct TaskReport {
    pub path: PathBuf,
    pub outcome: TaskOutcome,
}

/// How one pass over the file ended
enum Pass {
    Finished,
    Cancelled,
    Failed(TaskError),
}

pub struct MergeTask<W> {
    path: PathBuf,
    buffer: Arc<MergeBuffer<W>>,
    settings: Arc<TaskSettings>,
}

impl<W: Write> MergeTask<W> {
    pub fn new(path: PathBuf, buffer: Arc<MergeBuffer<W>>, settings: Arc<TaskSettings>) -> Self {
        Self {
            path,
            buffer,
            settings,
        }
    }

    pub fn run(self, cancel: &CancelToken) -> TaskOutcome {
        let diagnostics = &self.settings.diagnostics;
        diagnostics.info(&format!("Reading file {}", self.path.display()));

        let mut merged = 0;
        let mut restarts = 0;

        for (attempt, charset) in CHARSET_CANDIDATES.iter().copied().enumerate() {
            // Lines the earlier passes already put into the buffer
            let skip = if self.settings.restart_skips_merged {
                merged
            } else {
                0
            };

            match self.read_pass(charset, skip, &mut merged, cancel) {
                Pass::Finished => {
                    return TaskOutcome::Completed {
                        lines: merged,
                        charset,
                        restarts,
                    }
                }
                Pass::Cancelled => return TaskOutcome::Cancelled { lines: merged },
                Pass::Failed(TaskError::Read(error))
                    if error.is_decode() && attempt + 1 < CHARSET_CANDIDATES.len() =>
                {
                    restarts += 1;
                    diagnostics.detail(&format!(
                        "{}: {}, restarting with {}",
                        self.path.display(),
                        error,
                        CHARSET_CANDIDATES[attempt + 1]
                    ));
                }
                Pass::Failed(error) => {
                    return TaskOutcome::Failed {
                        error,
                        lines: merged,
                        restarts,
                    }
                }
            }
        }

        // Only reachable with an empty candidate list
        TaskOutcome::Completed {
            lines: merged,
            charset: Charset::Utf8,
            restarts,
        }
    }

    /// Read the whole file once with `charset`, skipping the first `skip` lines
    fn read_pass(
        &self,
        charset: Charset,
        skip: usize,
        merged: &mut usize,
        cancel: &CancelToken,
    ) -> Pass {
        let mut reader = match LineReader::open(&self.path, charset) {
            Ok(reader) => reader,
            Err(error) => return Pass::Failed(error.into()),
        };
        // Already merged under an earlier charset, so not decoded again
        if let Err(error) = reader.skip_lines(skip) {
            return Pass::Failed(error.into());
        }

        loop {
            if cancel.is_cancelled() {
                return Pass::Cancelled;
            }

            let text = match reader.next() {
                Some(Ok(text)) => text,
                Some(Err(error)) => return Pass::Failed(error.into()),
                None => break,
            };

            let line_number = reader.line_number();
            let line = match LogLine::parse(text, &self.settings.parser) {
                Ok(line) => line,
                Err(source) => {
                    return Pass::Failed(TaskError::Timestamp {
                        line: line_number,
                        source,
                    })
                }
            };

            if let Err(source) = self.buffer.insert(line) {
                return Pass::Failed(TaskError::Merge {
                    line: line_number,
                    source,
                });
            }
            *merged += 1;

            if !cancel.wait(self.settings.pace) {
                return Pass::Cancelled;
            }
        }

        Pass::Finished
    }
}
