use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Read buffer per open file (256KB for better throughput)
const READ_BUFFER_SIZE: usize = 256 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Character encodings a log file is decoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Charset {
    Utf8,
    Windows1252,
}

/// Charsets tried in order; a decode failure moves to the next one
pub const CHARSET_CANDIDATES: [Charset; 2] = [Charset::Utf8, Charset::Windows1252];

/// Bytes windows-1252 leaves unassigned. encoding_rs maps them to C1
/// controls; a strict decoder rejects them.
const WINDOWS_1252_UNMAPPED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

impl Charset {
    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Windows1252 => "windows-1252",
        }
    }

    /// Decode one line strictly
    fn decode(self, bytes: &[u8]) -> Result<String, String> {
        match self {
            Charset::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|e| e.to_string()),
            Charset::Windows1252 => {
                if let Some(pos) = bytes
                    .iter()
                    .position(|b| WINDOWS_1252_UNMAPPED.contains(b))
                {
                    return Err(format!(
                        "unmappable byte 0x{:02X} at offset {}",
                        bytes[pos], pos
                    ));
                }
                let (text, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
                Ok(text.into_owned())
            }
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to open '{}': {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("read error at line {line}: {source}")]
    Io { line: usize, source: io::Error },
    #[error("line {line} is not valid {charset}: {detail}")]
    Decode {
        line: usize,
        charset: Charset,
        detail: String,
    },
}

impl ReadError {
    pub fn is_decode(&self) -> bool {
        matches!(self, ReadError::Decode { .. })
    }
}

/// Forward-only iterator over the decoded lines of one file.
///
/// A line ends at `\n`, `\r\n` or a lone `\r`; terminators are stripped and a
/// leading UTF-8 byte order mark is skipped. The iterator ends after the first error. A file is
/// re-read under another charset by opening a new reader, never by seeking.
pub struct LineReader<R> {
    reader: R,
    charset: Charset,
    line_number: usize,
    buf: Vec<u8>,
    done: bool,
}

impl LineReader<BufReader<File>> {
    pub fn open(path: &Path, charset: Charset) -> Result<Self, ReadError> {
        let file = File::open(path).map_err(|source| ReadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(
            BufReader::with_capacity(READ_BUFFER_SIZE, file),
            charset,
        ))
    }
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R, charset: Charset) -> Self {
        Self {
            reader,
            charset,
            line_number: 0,
            buf: Vec::new(),
            done: false,
        }
    }

    /// Number of lines returned so far
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Move past `count` lines without decoding them.
    ///
    /// Returns the number of lines skipped, fewer if the file ends first.
    pub fn skip_lines(&mut self, count: usize) -> Result<usize, ReadError> {
        let mut skipped = 0;
        while skipped < count && !self.done {
            let line = self.line_number + 1;
            match self.read_raw_line() {
                Ok(true) => {
                    self.line_number = line;
                    skipped += 1;
                }
                Ok(false) => self.done = true,
                Err(source) => {
                    self.done = true;
                    return Err(ReadError::Io { line, source });
                }
            }
        }
        Ok(skipped)
    }

    fn read_raw_line(&mut self) -> io::Result<bool> {
        self.buf.clear();
        let mut read_any = false;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                break;
            }
            read_any = true;

            match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(pos) => {
                    let terminator = available[pos];
                    self.buf.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    if terminator == b'\r' {
                        self.consume_line_feed()?;
                    }
                    break;
                }
                None => {
                    let len = available.len();
                    self.buf.extend_from_slice(available);
                    self.reader.consume(len);
                }
            }
        }

        if read_any && self.line_number == 0 && self.buf.starts_with(UTF8_BOM) {
            self.buf.drain(..UTF8_BOM.len());
        }
        Ok(read_any)
    }

    /// Swallow the `\n` of a `\r\n` pair, which may sit in the next buffer fill
    fn consume_line_feed(&mut self) -> io::Result<()> {
        loop {
            match self.reader.fill_buf() {
                Ok(next) => {
                    if next.first() == Some(&b'\n') {
                        self.reader.consume(1);
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = Result<String, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let line = self.line_number + 1;
        match self.read_raw_line() {
            Ok(false) => {
                self.done = true;
                None
            }
            Ok(true) => {
                self.line_number = line;
                match self.charset.decode(&self.buf) {
                    Ok(text) => Some(Ok(text)),
                    Err(detail) => {
                        self.done = true;
                        Some(Err(ReadError::Decode {
                            line,
                            charset: self.charset,
                            detail,
                        }))
                    }
                }
            }
            Err(source) => {
                self.done = true;
                Some(Err(ReadError::Io { line, source }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn lines(bytes: &[u8], charset: Charset) -> Vec<Result<String, ReadError>> {
        LineReader::new(Cursor::new(bytes.to_vec()), charset).collect()
    }

    #[test]
    fn test_reads_lines_and_strips_terminators() {
        let result: Vec<String> = lines(b"one\ntwo\r\nthree", Charset::Utf8)
            .into_iter()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(result, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_lone_carriage_return_ends_line() {
        let result: Vec<String> = lines(b"one\rtwo\r\nthree\r\rfive\r", Charset::Utf8)
            .into_iter()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(result, vec!["one", "two", "three", "", "five"]);
    }

    #[test]
    fn test_crlf_split_across_buffer_fills() {
        let input = Cursor::new(b"first\r\nsecond\n".to_vec());
        // Capacity 6 puts the \r and \n of the first line in different fills
        let reader = LineReader::new(BufReader::with_capacity(6, input), Charset::Utf8);
        let result: Vec<String> = reader.map(|l| l.unwrap()).collect();
        assert_eq!(result, vec!["first", "second"]);
    }

    #[test]
    fn test_empty_input_has_no_lines() {
        assert!(lines(b"", Charset::Utf8).is_empty());
    }

    #[test]
    fn test_blank_lines_are_kept() {
        let result: Vec<String> = lines(b"a\n\nb\n", Charset::Utf8)
            .into_iter()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(result, vec!["a", "", "b"]);
    }

    #[test]
    fn test_skips_utf8_bom() {
        let result = lines(b"\xEF\xBB\xBFfirst\nsecond\n", Charset::Utf8);
        assert_eq!(result[0].as_ref().unwrap(), "first");
    }

    #[test]
    fn test_invalid_utf8_stops_with_decode_error() {
        let result = lines(b"ok\ncaf\xE9\nnever\n", Charset::Utf8);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].as_ref().unwrap(), "ok");
        match &result[1] {
            Err(ReadError::Decode { line, charset, .. }) => {
                assert_eq!(*line, 2);
                assert_eq!(*charset, Charset::Utf8);
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_windows_1252_decodes_assigned_bytes() {
        let result: Vec<String> = lines(b"caf\xE9\n\x80 price\n", Charset::Windows1252)
            .into_iter()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(result, vec!["café", "€ price"]);
    }

    #[test]
    fn test_windows_1252_rejects_unassigned_bytes() {
        for byte in WINDOWS_1252_UNMAPPED {
            let input = [b'o', b'k', b'\n', b'x', byte, b'\n'];
            let result = lines(&input, Charset::Windows1252);
            assert_eq!(result.len(), 2);
            assert_eq!(result[0].as_ref().unwrap(), "ok");
            match &result[1] {
                Err(ReadError::Decode { line, charset, .. }) => {
                    assert_eq!(*line, 2);
                    assert_eq!(*charset, Charset::Windows1252);
                }
                other => panic!("byte 0x{:02X}: expected decode error, got {:?}", byte, other),
            }
        }

        let result = lines(b"2024-01-01T00:00:00,\x81\x8D\x8F\x90\x9D\n", Charset::Windows1252);
        match &result[0] {
            Err(err @ ReadError::Decode { .. }) => {
                assert!(err.is_decode());
                assert!(err.to_string().contains("0x81"), "{}", err);
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_skip_lines_does_not_decode() {
        // "\xD0\x81" is valid UTF-8 but holds a byte windows-1252 rejects
        let mut reader = LineReader::new(
            Cursor::new(b"\xD0\x81 first\nsecond\n".to_vec()),
            Charset::Windows1252,
        );
        assert_eq!(reader.skip_lines(1).unwrap(), 1);
        assert_eq!(reader.line_number(), 1);
        assert_eq!(reader.next().unwrap().unwrap(), "second");
        assert_eq!(reader.line_number(), 2);
        assert_eq!(reader.skip_lines(5).unwrap(), 0);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_open_reports_missing_file() {
        let err = LineReader::open(Path::new("/nonexistent/logweave.log"), Charset::Utf8)
            .err()
            .expect("open should fail");
        assert!(matches!(err, ReadError::Open { .. }));
        assert!(!err.is_decode());
    }

    #[test]
    fn test_open_reads_file() -> anyhow::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        writeln!(temp_file, "line1")?;
        writeln!(temp_file, "line2")?;
        temp_file.flush()?;

        let mut reader = LineReader::open(temp_file.path(), Charset::Utf8)?;
        assert_eq!(reader.next().unwrap()?, "line1");
        assert_eq!(reader.next().unwrap()?, "line2");
        assert!(reader.next().is_none());
        assert_eq!(reader.line_number(), 2);
        Ok(())
    }

    #[test]
    fn test_candidates_start_with_utf8() {
        assert_eq!(CHARSET_CANDIDATES[0], Charset::Utf8);
        assert_eq!(CHARSET_CANDIDATES[1].to_string(), "windows-1252");
    }
}
