//! Import CLI command.

use super::output_error;
use crate::config::DupstackConfig;
use crate::io::{Format, open_import_source, read_records};
use crate::models::{ItemType, WorkspaceId};
use crate::services::ItemSyncService;
use crate::storage::DedupStore;
use crate::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Syncs an export file into a workspace.
#[derive(Debug, Clone)]
pub struct ImportCommand {
    /// File to read.
    pub file: PathBuf,
    /// Target workspace.
    pub workspace: WorkspaceId,
    /// Type of the records in the file.
    pub item_type: ItemType,
    /// Format override; detected from the extension when unset.
    pub format: Option<Format>,
}

impl ImportCommand {
    /// Reads the file and upserts its records.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the store
    /// rejects the sync.
    pub fn execute<S: DedupStore + ?Sized>(
        &self,
        store: &Arc<S>,
        config: &DupstackConfig,
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut source = open_import_source(&self.file, self.format)?;
        let records = read_records(source.as_mut())?;
        tracing::info!(
            file = %self.file.display(),
            records = records.len(),
            "Read import file"
        );

        let report = ItemSyncService::new(Arc::clone(store), &config.fields).upsert_records(
            &self.workspace,
            self.item_type,
            &records,
        )?;

        writeln!(
            out,
            "Imported {} {} records into {}",
            records.len(),
            self.item_type,
            self.workspace
        )
        .map_err(output_error)?;
        writeln!(out, "  Created:     {}", report.created).map_err(output_error)?;
        writeln!(out, "  Updated:     {}", report.updated).map_err(output_error)?;
        writeln!(out, "  Invalidated: {}", report.invalidated).map_err(output_error)?;
        writeln!(out, "  Unchanged:   {}", report.unchanged).map_err(output_error)?;
        writeln!(out, "  Removed:     {}", report.removed).map_err(output_error)?;
        if report.stacks_dissolved > 0 {
            writeln!(out, "  Stacks dissolved: {}", report.stacks_dissolved)
                .map_err(output_error)?;
        }
        Ok(())
    }
}
