//! JSON format adapter for import.
//!
//! Supports both newline-delimited JSON (NDJSON/JSONL) and JSON arrays.

use crate::io::traits::{ImportSource, record_from_json};
use crate::models::IncomingRecord;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::BufRead;

/// JSON import source.
///
/// Automatically detects and handles both formats:
/// - **NDJSON/JSONL**: One JSON object per line
/// - **Array**: A JSON array of objects `[{...}, {...}]`
pub struct JsonImportSource<R: BufRead> {
    reader: R,
    /// Parsed objects waiting to be converted.
    buffer: VecDeque<Value>,
    started: bool,
    array_mode: bool,
    array_len: usize,
    /// Line number (NDJSON) or element index (array) for error reporting.
    position: usize,
}

impl<R: BufRead> JsonImportSource<R> {
    /// Creates a new JSON import source.
    #[must_use]
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: VecDeque::new(),
            started: false,
            array_mode: false,
            array_len: 0,
            position: 0,
        }
    }

    /// Reads up to the first non-blank line and detects the format from it.
    fn detect_format(&mut self) -> Result<bool> {
        self.started = true;
        let Some(first_line) = self.read_non_blank_line()? else {
            return Ok(false);
        };

        if first_line.trim_start().starts_with('[') {
            self.array_mode = true;
            let mut remaining = String::new();
            self.reader
                .read_to_string(&mut remaining)
                .map_err(|e| Error::store("read_json", e))?;
            let full_content = format!("{first_line}{remaining}");

            let values: Vec<Value> = serde_json::from_str(&full_content)
                .map_err(|e| Error::InvalidInput(format!("Failed to parse JSON array: {e}")))?;
            self.array_len = values.len();
            self.buffer = values.into();
            self.position = 0;
        } else {
            self.buffer.push_back(self.parse_line(&first_line)?);
        }
        Ok(true)
    }

    fn read_non_blank_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| Error::store("read_json", e))?;
            if bytes_read == 0 {
                return Ok(None);
            }
            self.position += 1;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn parse_line(&self, line: &str) -> Result<Value> {
        serde_json::from_str(line.trim()).map_err(|e| {
            Error::InvalidInput(format!(
                "Line {}: Failed to parse JSON: {e}",
                self.position
            ))
        })
    }
}

impl<R: BufRead> ImportSource for JsonImportSource<R> {
    fn next(&mut self) -> Result<Option<IncomingRecord>> {
        if !self.started && !self.detect_format()? {
            return Ok(None);
        }

        if let Some(value) = self.buffer.pop_front() {
            if self.array_mode {
                self.position += 1;
            }
            return record_from_json(value, self.position).map(Some);
        }
        if self.array_mode {
            return Ok(None);
        }

        let Some(line) = self.read_non_blank_line()? else {
            return Ok(None);
        };
        let value = self.parse_line(&line)?;
        record_from_json(value, self.position).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        self.array_mode.then_some(self.array_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_import_ndjson() {
        let input = r#"{"id": "c1", "firstname": "Ada"}

{"id": "c2", "hs_additional_emails": ["a@x.org", "b@x.org"]}
"#;
        let mut source = JsonImportSource::new(Cursor::new(input));

        let first = source.next().unwrap().unwrap();
        assert_eq!(first.distant_id, "c1");

        let second = source.next().unwrap().unwrap();
        assert_eq!(second.distant_id, "c2");
        assert_eq!(second.value["hs_additional_emails"].entries().len(), 2);

        assert!(source.next().unwrap().is_none());
        assert_eq!(source.size_hint(), None);
    }

    #[test]
    fn test_import_array() {
        let input = r#"[
            {"id": "c1", "firstname": "Ada"},
            {"distant_id": "c2", "value": {"firstname": "Grace"}}
        ]"#;
        let mut source = JsonImportSource::new(Cursor::new(input));

        assert_eq!(source.next().unwrap().unwrap().distant_id, "c1");
        assert_eq!(source.size_hint(), Some(2));
        assert_eq!(source.next().unwrap().unwrap().distant_id, "c2");
        assert!(source.next().unwrap().is_none());
    }

    #[test]
    fn test_bad_line_reports_position() {
        let input = "{\"id\": \"c1\"}\n{not json}\n";
        let mut source = JsonImportSource::new(Cursor::new(input));

        source.next().unwrap();
        let err = source.next().unwrap_err();
        assert!(err.to_string().contains("Line 2"));
    }

    #[test]
    fn test_empty_input() {
        let mut source = JsonImportSource::new(Cursor::new("\n  \n"));
        assert!(source.next().unwrap().is_none());
    }
}
