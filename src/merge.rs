//! Ordered merge buffer shared by every merge task
//!
//! Tasks read their files independently and insert each line here. An insert
//! flushes every buffered line strictly older than the inserted one to the
//! output sink, then buffers the new line. Memory stays bounded by roughly one
//! pacing window of lines, at the cost of best-effort ordering: a file that
//! falls behind can still deliver lines older than what was already emitted.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::timestamp::{LineTimestamp, TimestampError, TimestampParser};

/// One line of a log file together with its ordering key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: LineTimestamp,
    pub text: String,
}

impl LogLine {
    pub fn new(timestamp: LineTimestamp, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }

    /// Take ownership of `text` and key it by its leading timestamp
    pub fn parse(text: String, parser: &TimestampParser) -> Result<Self, TimestampError> {
        let timestamp = parser.parse_line(&text)?;
        Ok(Self { timestamp, text })
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("duplicate timestamp {timestamp}: '{rejected}' collides with buffered '{buffered}'")]
    DuplicateTimestamp {
        timestamp: LineTimestamp,
        buffered: String,
        rejected: String,
    },
    #[error("failed to write merged output: {0}")]
    Output(#[from] io::Error),
}

/// Counters kept by the buffer over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub emitted: usize,
    pub drained: usize,
    pub duplicates: usize,
    pub peak_buffered: usize,
}

struct BufferState<W> {
    entries: BTreeMap<LineTimestamp, String>,
    sink: W,
    stats: MergeStats,
}

/// Timestamp-ordered buffer in front of the output sink.
///
/// `insert` is the only way in: lookup, flush, removal and insertion happen
/// under one lock so no two tasks ever see the buffer mid-update.
pub struct MergeBuffer<W> {
    state: Mutex<BufferState<W>>,
}

impl<W: Write> MergeBuffer<W> {
    pub fn new(sink: W) -> Self {
        Self {
            state: Mutex::new(BufferState {
                entries: BTreeMap::new(),
                sink,
                stats: MergeStats::default(),
            }),
        }
    }

    /// Lock buffer state with poison recovery
    fn lock_state(&self) -> MutexGuard<'_, BufferState<W>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A panic inside the sink loses the lines being flushed; the map
                // still holds only unwritten lines, so merging continues
                eprintln!("⚠️  Worker thread panicked, recovering merge buffer");
                poisoned.into_inner()
            }
        }
    }

    /// Insert `line`, emitting every buffered line strictly older than it.
    ///
    /// Returns the number of lines written to the sink. A line whose timestamp
    /// is already buffered is rejected and leaves the buffer untouched. If the
    /// sink fails, the lines selected for that flush are lost and the new line
    /// is not buffered.
    pub fn insert(&self, line: LogLine) -> Result<usize, MergeError> {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        if let Some(buffered) = state.entries.get(&line.timestamp) {
            state.stats.duplicates += 1;
            return Err(MergeError::DuplicateTimestamp {
                timestamp: line.timestamp,
                buffered: buffered.clone(),
                rejected: line.text,
            });
        }

        // split_off keeps keys >= timestamp; what stays behind is older
        let newer = state.entries.split_off(&line.timestamp);
        let older = std::mem::replace(&mut state.entries, newer);
        let flushed = write_lines(&mut state.sink, older.values())?;

        state.stats.emitted += flushed;
        state.stats.inserted += 1;
        state.entries.insert(line.timestamp, line.text);
        state.stats.peak_buffered = state.stats.peak_buffered.max(state.entries.len());

        Ok(flushed)
    }

    /// Emit every remaining line in timestamp order and empty the buffer
    pub fn drain(&self) -> Result<usize, MergeError> {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let remaining = std::mem::take(&mut state.entries);
        let drained = write_lines(&mut state.sink, remaining.values())?;
        state.stats.drained += drained;
        Ok(drained)
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest buffered timestamp
    pub fn oldest_buffered(&self) -> Option<LineTimestamp> {
        self.lock_state().entries.keys().next().copied()
    }

    pub fn stats(&self) -> MergeStats {
        self.lock_state().stats
    }

    /// Give back the sink; buffered lines are discarded
    pub fn into_sink(self) -> W {
        match self.state.into_inner() {
            Ok(state) => state.sink,
            Err(poisoned) => poisoned.into_inner().sink,
        }
    }
}

fn write_lines<'a, W: Write>(
    sink: &mut W,
    lines: impl Iterator<Item = &'a String>,
) -> io::Result<usize> {
    let mut written = 0;
    for line in lines {
        sink.write_all(line.as_bytes())?;
        sink.write_all(b"\n")?;
        written += 1;
    }
    if written > 0 {
        sink.flush()?;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;

    fn at(seconds: u32) -> LineTimestamp {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(i64::from(seconds))
    }

    fn line(seconds: u32, text: &str) -> LogLine {
        LogLine::new(at(seconds), text)
    }

    fn output(buffer: MergeBuffer<Vec<u8>>) -> Vec<String> {
        String::from_utf8(buffer.into_sink())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_insert_flushes_strictly_older_lines() {
        let buffer = MergeBuffer::new(Vec::new());
        assert_eq!(buffer.insert(line(10, "t10")).unwrap(), 0);
        assert_eq!(buffer.insert(line(30, "t30")).unwrap(), 1);
        assert_eq!(buffer.insert(line(20, "t20")).unwrap(), 0);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.oldest_buffered(), Some(at(20)));

        // 25 flushes 20 only; 30 stays buffered
        assert_eq!(buffer.insert(line(25, "t25")).unwrap(), 1);
        assert_eq!(buffer.oldest_buffered(), Some(at(25)));
        assert_eq!(output(buffer), vec!["t10", "t20"]);
    }

    #[test]
    fn test_flush_emits_in_ascending_order() {
        let buffer = MergeBuffer::new(Vec::new());
        for (seconds, text) in [(5, "e"), (1, "a"), (3, "c"), (2, "b"), (4, "d")] {
            buffer.insert(line(seconds, text)).unwrap();
        }
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.insert(line(9, "z")).unwrap(), 2);
        buffer.drain().unwrap();
        assert_eq!(output(buffer), vec!["a", "b", "c", "d", "e", "z"]);
    }

    #[test]
    fn test_duplicate_timestamp_is_rejected() {
        let buffer = MergeBuffer::new(Vec::new());
        buffer.insert(line(1, "first")).unwrap();
        buffer.insert(line(2, "second")).unwrap();

        let err = buffer.insert(line(2, "other")).unwrap_err();
        match err {
            MergeError::DuplicateTimestamp {
                timestamp,
                buffered,
                rejected,
            } => {
                assert_eq!(timestamp, at(2));
                assert_eq!(buffered, "second");
                assert_eq!(rejected, "other");
            }
            other => panic!("unexpected error: {}", other),
        }

        // The earlier inserts are unaffected
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.stats().duplicates, 1);
        buffer.drain().unwrap();
        assert_eq!(output(buffer), vec!["first", "second"]);
    }

    #[test]
    fn test_emitted_timestamp_can_be_inserted_again() {
        let buffer = MergeBuffer::new(Vec::new());
        buffer.insert(line(1, "a")).unwrap();
        buffer.insert(line(2, "b")).unwrap();
        // 1 was emitted, so it is no longer a duplicate
        buffer.insert(line(1, "a-again")).unwrap();
        buffer.drain().unwrap();
        assert_eq!(output(buffer), vec!["a", "a-again", "b"]);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = MergeBuffer::new(Vec::new());
        buffer.insert(line(3, "c")).unwrap();
        buffer.insert(line(2, "b")).unwrap();
        assert_eq!(buffer.drain().unwrap(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.drain().unwrap(), 0);

        let stats = buffer.stats();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.emitted, 0);
        assert_eq!(stats.drained, 2);
        assert_eq!(stats.peak_buffered, 2);
        assert_eq!(output(buffer), vec!["b", "c"]);
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_is_reported() {
        let buffer = MergeBuffer::new(FailingSink);
        buffer.insert(line(1, "a")).unwrap();
        let err = buffer.insert(line(2, "b")).unwrap_err();
        assert!(matches!(err, MergeError::Output(_)));
        assert!(buffer.is_empty());
    }

    /// Records writes and panics on the first one
    #[derive(Default)]
    struct PanickingSink {
        written: Vec<u8>,
        panicked: bool,
    }

    impl Write for PanickingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.panicked {
                self.panicked = true;
                panic!("sink exploded");
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_panic_loses_flushed_lines_only() {
        let buffer = Arc::new(MergeBuffer::new(PanickingSink::default()));
        buffer.insert(line(1, "lost")).unwrap();

        let inserting = Arc::clone(&buffer);
        let result = thread::spawn(move || inserting.insert(line(2, "never-buffered"))).join();
        assert!(result.is_err());

        // The poisoned buffer recovers without the line that was being flushed
        assert!(buffer.is_empty());
        buffer.insert(line(3, "kept")).unwrap();
        buffer.insert(line(4, "last")).unwrap();
        buffer.drain().unwrap();

        let sink = Arc::try_unwrap(buffer).ok().unwrap().into_sink();
        assert_eq!(String::from_utf8(sink.written).unwrap(), "kept\nlast\n");
    }

    #[test]
    fn test_concurrent_inserts_emit_every_line_once() {
        let buffer = Arc::new(MergeBuffer::new(Vec::new()));
        let handles: Vec<_> = (0..4u32)
            .map(|worker| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..250u32 {
                        let seconds = i * 4 + worker;
                        buffer
                            .insert(line(seconds, &format!("w{}-{}", worker, i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        buffer.drain().unwrap();
        let buffer = Arc::try_unwrap(buffer).ok().expect("buffer still shared");
        let mut lines = output(buffer);
        assert_eq!(lines.len(), 1000);
        lines.sort();
        lines.dedup();
        assert_eq!(lines.len(), 1000);
    }

    proptest! {
        #[test]
        fn prop_flush_keeps_only_newer_lines(seconds in prop::collection::vec(0u32..500, 1..60)) {
            let buffer = MergeBuffer::new(Vec::new());
            let mut buffered = BTreeSet::new();
            let mut accepted = 0usize;

            for s in seconds {
                let before = buffer.stats().emitted;
                match buffer.insert(line(s, &s.to_string())) {
                    Ok(flushed) => {
                        accepted += 1;
                        let expected_flush = buffered.range(..s).count();
                        prop_assert_eq!(flushed, expected_flush);
                        buffered.retain(|&b| b >= s);
                        buffered.insert(s);
                        prop_assert_eq!(buffer.stats().emitted, before + expected_flush);
                        prop_assert_eq!(buffer.oldest_buffered(), Some(at(s)));
                    }
                    Err(MergeError::DuplicateTimestamp { .. }) => {
                        prop_assert!(buffered.contains(&s));
                    }
                    Err(e) => prop_assert!(false, "unexpected error: {}", e),
                }
                prop_assert_eq!(buffer.len(), buffered.len());
            }

            buffer.drain().unwrap();
            prop_assert!(buffer.is_empty());
            prop_assert_eq!(output(buffer).len(), accepted);
        }
    }
}
