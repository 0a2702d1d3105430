//! Core trait for record import.
//!
//! Format adapters implement [`ImportSource`]; the helpers here turn the
//! flat property maps every format produces into [`IncomingRecord`]s.

use crate::models::{FieldValue, IncomingRecord, ItemValue};
use crate::{Error, Result};
use serde_json::Value;

/// Property names accepted as the external ID, in priority order.
pub const ID_PROPERTIES: [&str; 2] = ["distant_id", "id"];

/// Property naming the record a merged record was folded into.
pub const MERGED_PROPERTY: &str = "merged_in_distant_id";

/// Source of imported CRM records.
///
/// Sources read incrementally where the format allows it, so large exports
/// do not need to fit in memory.
pub trait ImportSource {
    /// Reads the next record from the source.
    ///
    /// Returns `Ok(None)` when the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a malformed record and
    /// [`Error::OperationFailed`] for I/O failures.
    fn next(&mut self) -> Result<Option<IncomingRecord>>;

    /// Returns an estimate of the total number of records, if known.
    fn size_hint(&self) -> Option<usize> {
        None
    }
}

/// Builds a record from flat `(property, value)` pairs.
///
/// ID properties become the external ID, blank values are dropped, and
/// every other property lands in the record's value.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if no ID property holds a value.
pub fn record_from_properties(
    properties: impl IntoIterator<Item = (String, FieldValue)>,
    position: usize,
) -> Result<IncomingRecord> {
    let mut ids: [Option<String>; 2] = [None, None];
    let mut merged_into = None;
    let mut value = ItemValue::new();

    for (name, field) in properties {
        if field.is_blank() {
            continue;
        }
        let key = name.trim().to_lowercase();
        if let Some(slot) = ID_PROPERTIES.iter().position(|p| *p == key) {
            ids[slot] = field.entries().first().map(|s| (*s).to_string());
        } else if key == MERGED_PROPERTY {
            merged_into = field.entries().first().map(|s| (*s).to_string());
        } else {
            value.insert(name.trim().to_string(), field);
        }
    }

    let distant_id = ids.into_iter().flatten().next().ok_or_else(|| {
        Error::InvalidInput(format!(
            "Record {position}: missing external id (expected one of: {})",
            ID_PROPERTIES.join(", ")
        ))
    })?;

    Ok(IncomingRecord {
        distant_id,
        value,
        merged_in_distant_id: merged_into,
    })
}

/// Builds a record from one JSON object.
///
/// Accepts the flat form (`{"id": "42", "email": "..."}`) and the nested
/// form (`{"distant_id": "42", "value": {...}}`). Numbers and booleans are
/// kept as text and nulls are dropped.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a non-object, a nested property or a
/// missing external ID.
pub fn record_from_json(json: Value, position: usize) -> Result<IncomingRecord> {
    let Value::Object(mut object) = json else {
        return Err(Error::InvalidInput(format!(
            "Record {position}: expected a JSON object"
        )));
    };

    // nested form: properties under "value", ids at the top
    let mut properties = Vec::with_capacity(object.len());
    match object.remove("value") {
        Some(Value::Object(nested)) => {
            for (name, raw) in nested {
                if let Some(field) = json_field(&name, raw, position)? {
                    properties.push((name, field));
                }
            }
        },
        Some(raw) => {
            if let Some(field) = json_field("value", raw, position)? {
                properties.push(("value".to_string(), field));
            }
        },
        None => {},
    }
    for (name, raw) in object {
        if let Some(field) = json_field(&name, raw, position)? {
            properties.push((name, field));
        }
    }

    record_from_properties(properties, position)
}

fn json_field(name: &str, raw: Value, position: usize) -> Result<Option<FieldValue>> {
    match raw {
        Value::Null => Ok(None),
        Value::Array(values) => {
            let mut entries = Vec::with_capacity(values.len());
            for value in values {
                if let Some(text) = json_scalar(name, value, position)? {
                    entries.push(text);
                }
            }
            Ok(Some(FieldValue::List(entries)))
        },
        other => Ok(json_scalar(name, other, position)?.map(FieldValue::Text)),
    }
}

fn json_scalar(name: &str, raw: Value, position: usize) -> Result<Option<String>> {
    match raw {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Array(_) | Value::Object(_) => Err(Error::InvalidInput(format!(
            "Record {position}: property '{name}' is nested too deeply"
        ))),
    }
}
