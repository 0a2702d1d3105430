//! Install CLI command.

use super::{output_error, selected_types};
use crate::config::DupstackConfig;
use crate::models::{ItemType, WorkspaceId};
use crate::services::SimilarityInstaller;
use crate::storage::DedupStore;
use crate::Result;
use std::io::Write;
use std::sync::Arc;

/// Computes similarity edges for the pending items of a workspace.
#[derive(Debug, Clone)]
pub struct InstallCommand {
    /// Target workspace.
    pub workspace: WorkspaceId,
    /// Restrict to one item type; both when unset.
    pub item_type: Option<ItemType>,
    /// Batch size override.
    pub batch_size: Option<usize>,
}

impl InstallCommand {
    /// Runs the installer for each selected item type.
    ///
    /// # Errors
    ///
    /// Returns the first installer error.
    pub fn execute<S: DedupStore + ?Sized>(
        &self,
        store: &Arc<S>,
        config: &DupstackConfig,
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut installer = SimilarityInstaller::new(Arc::clone(store), config);
        if let Some(batch_size) = self.batch_size {
            installer = installer.with_batch_size(batch_size);
        }

        for item_type in selected_types(self.item_type) {
            let report = installer.install_similarities(&self.workspace, item_type)?;
            writeln!(out, "{item_type}:").map_err(output_error)?;
            writeln!(out, "  Units:          {}", report.units_completed)
                .map_err(output_error)?;
            writeln!(
                out,
                "  Pairs compared: {} ({} skipped)",
                report.pairs_compared, report.pairs_failed
            )
            .map_err(output_error)?;
            writeln!(out, "  Edges written:  {}", report.edges_written).map_err(output_error)?;
            writeln!(
                out,
                "  Items checked:  {} ({} without edges)",
                report.items_checked, report.items_without_edges
            )
            .map_err(output_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::test_support::{output, seeded_store};

    #[test]
    fn test_install_reports_edges() {
        let store = seeded_store();
        let command = InstallCommand {
            workspace: WorkspaceId::new("acme"),
            item_type: Some(ItemType::Contacts),
            batch_size: Some(2),
        };
        let mut buf = Vec::new();
        command
            .execute(&store, &DupstackConfig::default(), &mut buf)
            .unwrap();

        let text = output(buf);
        assert!(text.starts_with("CONTACTS:"));
        assert!(text.contains("Items checked:  3"));
        assert!(store.edge_count() > 0);
    }
}
