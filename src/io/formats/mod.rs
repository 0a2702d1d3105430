//! Format adapters for record import.
//!
//! Each format implements [`ImportSource`].

pub mod csv;
pub mod json;

use crate::{Error, Result};
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use super::traits::ImportSource;

/// Supported import formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// JSON format (newline-delimited or array).
    Json,
    /// CSV with a header row.
    Csv,
}

impl Format {
    /// Returns every supported format.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Json, Self::Csv]
    }

    /// Returns the file extension for this format.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    /// Detects format from file extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the extension is not recognized.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match ext.as_deref() {
            Some("json" | "ndjson" | "jsonl") => Ok(Self::Json),
            Some("csv") => Ok(Self::Csv),
            Some(ext) => Err(Error::InvalidInput(format!(
                "Unsupported file extension: .{ext}"
            ))),
            None => Err(Error::InvalidInput(
                "Cannot determine format: file has no extension".to_string(),
            )),
        }
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" | "ndjson" | "jsonl" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(Error::InvalidInput(format!("Unknown format: {s}"))),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Creates an import source for the given format and reader.
///
/// # Errors
///
/// Returns an error if the source cannot read its header.
pub fn create_import_source<R: BufRead + 'static>(
    reader: R,
    format: Format,
) -> Result<Box<dyn ImportSource>> {
    match format {
        Format::Json => Ok(Box::new(json::JsonImportSource::new(reader))),
        Format::Csv => Ok(Box::new(csv::CsvImportSource::new(reader)?)),
    }
}
