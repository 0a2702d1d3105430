//! Resolve CLI command.

use super::output_error;
use crate::config::DupstackConfig;
use crate::models::{DupType, WorkspaceId};
use crate::services::DupStackResolver;
use crate::storage::DedupStore;
use crate::Result;
use std::io::Write;
use std::sync::Arc;

/// Runs resolver passes until the workspace is idle.
#[derive(Debug, Clone)]
pub struct ResolveCommand {
    /// Target workspace.
    pub workspace: WorkspaceId,
    /// Stop after this many passes.
    pub max_passes: Option<u64>,
}

impl ResolveCommand {
    /// Drains the resolution queue, printing one line per stack written.
    ///
    /// # Errors
    ///
    /// Returns the first resolver error; passes already committed stay
    /// persisted.
    pub fn execute<S: DedupStore + ?Sized>(
        &self,
        store: &Arc<S>,
        config: &DupstackConfig,
        out: &mut dyn Write,
    ) -> Result<()> {
        let resolver = DupStackResolver::new(Arc::clone(store), config);
        let mut passes = 0_u64;
        let mut stacks = 0_u64;

        while self.max_passes.is_none_or(|max| passes < max) {
            let Some(report) = resolver.resolve_next(&self.workspace)? else {
                break;
            };
            passes += 1;

            if let Some(stack) = &report.stack {
                stacks += 1;
                writeln!(
                    out,
                    "Stack {} ({}): reference {}, {} confident, {} potential",
                    stack.id,
                    stack.item_type,
                    report.reference,
                    stack.members_of_type(DupType::Confident).len(),
                    stack.members_of_type(DupType::Potential).len(),
                )
                .map_err(output_error)?;
            }
            if report.truncated {
                writeln!(
                    out,
                    "  Pass from {} hit the stack size limit; remaining neighbours stay queued",
                    report.reference
                )
                .map_err(output_error)?;
            }
        }

        let progress = store.get_progress(&self.workspace)?;
        writeln!(
            out,
            "Ran {passes} passes, wrote {stacks} stacks ({}/{} items decided)",
            progress.dup_done, progress.dup_total
        )
        .map_err(output_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::test_support::{output, seeded_store};
    use crate::models::ItemType;
    use crate::services::SimilarityInstaller;

    #[test]
    fn test_resolve_writes_one_stack() {
        let store = seeded_store();
        let config = DupstackConfig::default();
        let workspace = WorkspaceId::new("acme");
        SimilarityInstaller::new(Arc::clone(&store), &config)
            .install_similarities(&workspace, ItemType::Contacts)
            .unwrap();

        let command = ResolveCommand {
            workspace: workspace.clone(),
            max_passes: None,
        };
        let mut buf = Vec::new();
        command.execute(&store, &config, &mut buf).unwrap();

        let text = output(buf);
        assert!(text.contains("1 confident, 0 potential"));
        assert!(text.contains("wrote 1 stacks (3/3 items decided)"));
        assert_eq!(store.list_dup_stacks(&workspace, None).unwrap().len(), 1);
    }

    #[test]
    fn test_pass_limit_stops_early() {
        let store = seeded_store();
        let config = DupstackConfig::default();
        let workspace = WorkspaceId::new("acme");
        SimilarityInstaller::new(Arc::clone(&store), &config)
            .install_similarities(&workspace, ItemType::Contacts)
            .unwrap();

        let command = ResolveCommand {
            workspace,
            max_passes: Some(0),
        };
        let mut buf = Vec::new();
        command.execute(&store, &config, &mut buf).unwrap();

        assert!(output(buf).starts_with("Ran 0 passes, wrote 0 stacks"));
    }
}
