//! CLI command implementations.
//!
//! Each submodule implements one `dupstack` subcommand. Commands take the
//! store and configuration from the binary and write their report to the
//! given output, which keeps them testable against an in-memory store.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `import` | Sync a JSON/NDJSON or CSV export into a workspace |
//! | `install` | Compute similarity edges for pending items |
//! | `resolve` | Build dup stacks from installed edges |
//! | `run` | Install then resolve, for one or every workspace |
//! | `status` | Show progress counters and item/edge/stack counts |
//! | `stacks` | List the dup stacks of a workspace |
//! | `compare` | Score two items against each other and explain the verdict |
//! | `config` | Print the effective configuration |
//!
//! # Example Usage
//!
//! ```bash
//! # Sync a contact export
//! dupstack import contacts.csv --workspace acme --item-type contacts
//!
//! # Install and resolve everything
//! dupstack run --all
//!
//! # Inspect the result
//! dupstack stacks --workspace acme --json
//! ```

mod compare;
mod config;
mod import;
mod install;
mod resolve;
mod run;
mod stacks;
mod status;

pub use compare::CompareCommand;
pub use config::ConfigCommand;
pub use import::ImportCommand;
pub use install::InstallCommand;
pub use resolve::ResolveCommand;
pub use run::RunCommand;
pub use stacks::StacksCommand;
pub use status::StatusCommand;

use crate::models::ItemType;
use crate::{Error, Result};
use serde::Serialize;
use std::io::Write;

/// Parses an item type argument.
///
/// # Errors
///
/// Returns a message naming the accepted values.
pub fn parse_item_type(s: &str) -> std::result::Result<ItemType, String> {
    ItemType::parse(s).ok_or_else(|| format!("unknown item type '{s}' (expected contacts or companies)"))
}

/// Item types selected by an optional `--item-type` argument.
pub(crate) fn selected_types(item_type: Option<ItemType>) -> Vec<ItemType> {
    item_type.map_or_else(|| ItemType::all().to_vec(), |t| vec![t])
}

#[allow(clippy::needless_pass_by_value)]
pub(crate) fn output_error(e: std::io::Error) -> Error {
    Error::store("write_output", e)
}

/// Writes `value` as pretty JSON followed by a newline.
pub(crate) fn write_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::store("serialize_output", e))?;
    writeln!(out, "{json}").map_err(output_error)
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("contacts", Some(ItemType::Contacts); "plural")]
    #[test_case("Company", Some(ItemType::Companies); "singular mixed case")]
    #[test_case("deals", None; "unknown")]
    fn test_parse_item_type(input: &str, expected: Option<ItemType>) {
        assert_eq!(parse_item_type(input).ok(), expected);
    }

    #[test]
    fn test_selected_types_defaults_to_all() {
        assert_eq!(selected_types(None), ItemType::all().to_vec());
        assert_eq!(
            selected_types(Some(ItemType::Companies)),
            vec![ItemType::Companies]
        );
    }
}
