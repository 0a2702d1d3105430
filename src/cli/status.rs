//! Status CLI command.

use super::{output_error, write_json};
use crate::models::{ItemQuery, ItemType, WorkspaceId, WorkspaceProgress};
use crate::storage::DedupStore;
use crate::Result;
use serde::Serialize;
use std::io::Write;

/// Shows progress and counts for one or every workspace.
#[derive(Debug, Clone, Default)]
pub struct StatusCommand {
    /// Workspace to show; every stored workspace when unset.
    pub workspace: Option<WorkspaceId>,
    /// Print JSON instead of text.
    pub json: bool,
}

/// Counts of one item type inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCounts {
    /// Item type counted.
    pub item_type: ItemType,
    /// Unmerged items.
    pub items: u64,
    /// Items compared against every installed item.
    pub similarity_checked: u64,
    /// Items with a settled stack decision.
    pub dup_checked: u64,
    /// Persisted dup stacks.
    pub stacks: u64,
}

/// Status snapshot of one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceStatus {
    /// Stored progress counters.
    pub progress: WorkspaceProgress,
    /// Similarity edges in the workspace.
    pub edges: u64,
    /// Per-type counts.
    pub types: Vec<TypeCounts>,
}

impl WorkspaceStatus {
    /// Collects the status of a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if a store read fails.
    pub fn collect<S: DedupStore + ?Sized>(store: &S, workspace: &WorkspaceId) -> Result<Self> {
        let mut types = Vec::with_capacity(ItemType::all().len());
        for &item_type in ItemType::all() {
            let base = ItemQuery::new(workspace.clone()).with_item_type(item_type);
            types.push(TypeCounts {
                item_type,
                items: store.count_items(&base)?,
                similarity_checked: store
                    .count_items(&base.clone().with_similarity_checked(true))?,
                dup_checked: store.count_items(&base.with_dup_checked(true))?,
                stacks: store.list_dup_stacks(workspace, Some(item_type))?.len() as u64,
            });
        }

        Ok(Self {
            progress: store.get_progress(workspace)?,
            edges: store.count_edges(workspace)?,
            types,
        })
    }
}

impl StatusCommand {
    /// Prints the status.
    ///
    /// # Errors
    ///
    /// Returns an error if a store read fails.
    pub fn execute<S: DedupStore + ?Sized>(&self, store: &S, out: &mut dyn Write) -> Result<()> {
        let workspaces = match &self.workspace {
            Some(workspace) => vec![workspace.clone()],
            None => store.list_workspaces()?,
        };

        let statuses = workspaces
            .iter()
            .map(|ws| WorkspaceStatus::collect(store, ws))
            .collect::<Result<Vec<_>>>()?;

        if self.json {
            return write_json(out, &statuses);
        }
        if statuses.is_empty() {
            writeln!(out, "No workspaces").map_err(output_error)?;
            return Ok(());
        }

        for status in &statuses {
            display_status(status, out)?;
        }
        Ok(())
    }
}

fn display_status(status: &WorkspaceStatus, out: &mut dyn Write) -> Result<()> {
    let progress = &status.progress;
    writeln!(out, "Workspace {}", progress.workspace_id).map_err(output_error)?;
    writeln!(
        out,
        "  Similarity units: {}/{} ({:.0}%)",
        progress.batches_done,
        progress.batches_total,
        progress.batches_ratio() * 100.0
    )
    .map_err(output_error)?;
    writeln!(
        out,
        "  Dup decisions:    {}/{} ({:.0}%)",
        progress.dup_done,
        progress.dup_total,
        progress.dup_ratio() * 100.0
    )
    .map_err(output_error)?;
    writeln!(out, "  Edges:            {}", status.edges).map_err(output_error)?;
    for counts in &status.types {
        if counts.items == 0 && counts.stacks == 0 {
            continue;
        }
        writeln!(
            out,
            "  {}: {} items, {} similarity checked, {} dup checked, {} stacks",
            counts.item_type,
            counts.items,
            counts.similarity_checked,
            counts.dup_checked,
            counts.stacks
        )
        .map_err(output_error)?;
    }
    Ok(())
}
