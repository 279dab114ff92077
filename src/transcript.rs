//! Subprocess transcript logging (spec.md §6 "Log format").
//!
//! Every line a destination-repo subprocess writes to stdout or stderr is
//! recorded as one CSV row: `timestamp;kind;cell;`, `kind` one of
//! `"stdout"`/`"stderr"`, with `;`-containing cells double-quoted. `\r`,
//! `\n`, and `\r\n` line endings are all normalised to one row per logical
//! line. This is separate from the `log`-crate operator diagnostics (C8's
//! other half): this is a faithful record of exactly what the child
//! process said, for post-mortem debugging of a failed action.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Writes CSV transcript rows for a single stream (stdout or stderr).
pub struct TranscriptLog {
    file: File,
}

impl TranscriptLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    /// Record one subprocess output blob, splitting it into logical lines
    /// and normalizing `\r`/`\n`/`\r\n` terminators into one row each.
    pub fn record(&mut self, timestamp: i64, kind: StreamKind, blob: &str) -> io::Result<()> {
        for line in split_lines(blob) {
            let row = format!(
                "{};{};{};\n",
                timestamp,
                kind.as_str(),
                quote_cell(line)
            );
            self.file.write_all(row.as_bytes())?;
        }
        Ok(())
    }
}

fn split_lines(blob: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = blob;
    loop {
        match rest.find(['\n', '\r']) {
            None => {
                if !rest.is_empty() {
                    lines.push(rest);
                }
                break;
            }
            Some(idx) => {
                lines.push(&rest[..idx]);
                let consumed = if rest.as_bytes()[idx] == b'\r'
                    && rest.as_bytes().get(idx + 1) == Some(&b'\n')
                {
                    idx + 2
                } else {
                    idx + 1
                };
                rest = &rest[consumed..];
            }
        }
    }
    lines
}

fn quote_cell(cell: &str) -> String {
    if cell.contains(';') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn splits_mixed_line_endings() {
        let lines = split_lines("a\r\nb\nc\rd");
        assert_eq!(lines, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn quotes_cells_containing_semicolons() {
        assert_eq!(quote_cell("plain"), "plain");
        assert_eq!(quote_cell("a;b"), "\"a;b\"");
    }

    #[test]
    fn records_rows_for_each_logical_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.csv");
        {
            let mut log = TranscriptLog::open(&path).unwrap();
            log.record(100, StreamKind::Stdout, "line one\nline two\n").unwrap();
        }
        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "100;stdout;line one;\n100;stdout;line two;\n");
    }
}
