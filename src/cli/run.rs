//! Run CLI command.

use super::output_error;
use crate::config::DupstackConfig;
use crate::models::WorkspaceId;
use crate::services::DedupPipeline;
use crate::storage::DedupStore;
use crate::{Error, Result};
use std::io::Write;
use std::sync::Arc;

/// Installs and resolves one or more workspaces.
#[derive(Debug, Clone, Default)]
pub struct RunCommand {
    /// Workspaces to process; every stored workspace when empty.
    pub workspaces: Vec<WorkspaceId>,
}

impl RunCommand {
    /// Runs the pipeline and prints one summary per workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace list cannot be read or any
    /// workspace failed. Other workspaces still run to completion.
    pub fn execute<S: DedupStore + ?Sized + 'static>(
        &self,
        store: &Arc<S>,
        config: &DupstackConfig,
        out: &mut dyn Write,
    ) -> Result<()> {
        let workspaces = if self.workspaces.is_empty() {
            store.list_workspaces()?
        } else {
            self.workspaces.clone()
        };
        if workspaces.is_empty() {
            writeln!(out, "No workspaces to run").map_err(output_error)?;
            return Ok(());
        }

        let pipeline = DedupPipeline::new(Arc::clone(store), config);
        let mut failed = Vec::new();

        for (workspace, result) in pipeline.run_workspaces(&workspaces)? {
            match result {
                Ok(report) => {
                    let edges: u64 = report.installs.iter().map(|(_, r)| r.edges_written).sum();
                    writeln!(
                        out,
                        "{workspace}: {edges} edges, {} passes, {} stacks{}",
                        report.passes,
                        report.stacks_written,
                        if report.pass_budget_exhausted {
                            " (pass budget exhausted)"
                        } else {
                            ""
                        }
                    )
                    .map_err(output_error)?;
                },
                Err(e) => {
                    tracing::error!(workspace_id = %workspace, error = %e, "Workspace run failed");
                    writeln!(out, "{workspace}: failed: {e}").map_err(output_error)?;
                    failed.push(workspace);
                },
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::OperationFailed {
                operation: "run_workspaces".to_string(),
                cause: format!("{} of {} workspaces failed", failed.len(), workspaces.len()),
            })
        }
    }
}
