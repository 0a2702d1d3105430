//! CSV format adapter for import.
//!
//! The header row names the CRM properties; the `id` or `distant_id`
//! column holds the external ID.

use crate::io::traits::{ID_PROPERTIES, ImportSource, record_from_properties};
use crate::models::{FieldValue, IncomingRecord};
use crate::{Error, Result};
use std::io::BufRead;

/// CSV import source.
///
/// Empty cells are dropped and a cell containing `;` becomes a multi-valued
/// property.
pub struct CsvImportSource<R: BufRead> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    /// Data row number for error reporting.
    position: usize,
}

impl<R: BufRead> CsvImportSource<R> {
    /// Creates a new CSV import source.
    ///
    /// # Errors
    ///
    /// Returns an error if headers cannot be read or no ID column exists.
    pub fn new(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| Error::store("read_csv_headers", e))?
            .iter()
            .map(String::from)
            .collect();

        let has_id = headers
            .iter()
            .any(|h| ID_PROPERTIES.contains(&h.to_lowercase().as_str()));
        if !has_id {
            return Err(Error::InvalidInput(
                "CSV must have an 'id' or 'distant_id' column".to_string(),
            ));
        }

        Ok(Self {
            reader: csv_reader,
            headers,
            position: 0,
        })
    }

    fn parse_record(&self, record: &csv::StringRecord) -> Result<IncomingRecord> {
        let properties = self
            .headers
            .iter()
            .zip(record.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(header, cell)| (header.clone(), cell_value(cell)));
        record_from_properties(properties, self.position)
    }
}

fn cell_value(cell: &str) -> FieldValue {
    if cell.contains(';') {
        FieldValue::List(
            cell.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    } else {
        FieldValue::Text(cell.to_string())
    }
}

impl<R: BufRead> ImportSource for CsvImportSource<R> {
    fn next(&mut self) -> Result<Option<IncomingRecord>> {
        let mut record = csv::StringRecord::new();

        let has_record = self
            .reader
            .read_record(&mut record)
            .map_err(|e| Error::store("read_csv", e))?;
        if !has_record {
            return Ok(None);
        }
        self.position += 1;

        self.parse_record(&record).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_import_basic_csv() {
        let input = r#"id,firstname,lastname,hs_additional_emails
c1,Ada,Lovelace,"ada@x.org; ada@y.org"
c2,Grace,,
"#;
        let mut source = CsvImportSource::new(Cursor::new(input)).unwrap();

        let first = source.next().unwrap().unwrap();
        assert_eq!(first.distant_id, "c1");
        assert_eq!(
            first.value["hs_additional_emails"],
            FieldValue::List(vec!["ada@x.org".to_string(), "ada@y.org".to_string()])
        );

        let second = source.next().unwrap().unwrap();
        assert_eq!(second.distant_id, "c2");
        assert!(!second.value.contains_key("lastname"));
        assert_eq!(second.value.len(), 1);

        assert!(source.next().unwrap().is_none());
    }

    #[test]
    fn test_merged_column() {
        let input = "Distant_Id,merged_in_distant_id,name\nx9,x1,Acme\n";
        let mut source = CsvImportSource::new(Cursor::new(input)).unwrap();

        let record = source.next().unwrap().unwrap();
        assert_eq!(record.distant_id, "x9");
        assert_eq!(record.merged_in_distant_id.as_deref(), Some("x1"));
    }

    #[test]
    fn test_missing_id_column() {
        let input = "firstname,lastname\nAda,Lovelace\n";
        assert!(CsvImportSource::new(Cursor::new(input)).is_err());
    }

    #[test]
    fn test_row_without_id_reports_position() {
        let input = "id,firstname\nc1,Ada\n,Grace\n";
        let mut source = CsvImportSource::new(Cursor::new(input)).unwrap();

        source.next().unwrap();
        let err = source.next().unwrap_err();
        assert!(err.to_string().contains("Record 2"));
    }
}
