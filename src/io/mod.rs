//! Record import.
//!
//! Reads CRM exports into [`IncomingRecord`]s for
//! [`crate::services::ItemSyncService`].
//!
//! # Supported Formats
//!
//! | Format | Notes |
//! |--------|-------|
//! | JSON | Newline-delimited (NDJSON) or array; flat or `{distant_id, value}` objects |
//! | CSV | Header row names the properties; `;` splits multi-valued cells |
//!
//! Both formats take the external ID from a `distant_id` or `id` property
//! and honour `merged_in_distant_id`.
//!
//! # Examples
//!
//! ```rust,ignore
//! use dupstack::io::{Format, open_import_source, read_records};
//! use std::path::Path;
//!
//! let mut source = open_import_source(Path::new("contacts.csv"), None)?;
//! let records = read_records(source.as_mut())?;
//! println!("Read {} records", records.len());
//! ```

pub mod formats;
pub mod traits;

pub use formats::{Format, create_import_source};
pub use traits::{ImportSource, record_from_json, record_from_properties};

use crate::models::IncomingRecord;
use crate::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Opens a file as an import source.
///
/// The format is detected from the extension unless given.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or its format is unknown.
pub fn open_import_source(path: &Path, format: Option<Format>) -> Result<Box<dyn ImportSource>> {
    let format = match format {
        Some(format) => format,
        None => Format::from_path(path)?,
    };
    let file = File::open(path)
        .map_err(|e| Error::store("open_import_file", format!("{}: {e}", path.display())))?;
    create_import_source(BufReader::new(file), format)
}

/// Drains a source into memory.
///
/// # Errors
///
/// Returns the first error the source reports.
pub fn read_records(source: &mut dyn ImportSource) -> Result<Vec<IncomingRecord>> {
    let mut records = Vec::with_capacity(source.size_hint().unwrap_or_default());
    while let Some(record) = source.next()? {
        records.push(record);
    }
    Ok(records)
}
