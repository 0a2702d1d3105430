//! Stacks CLI command.

use super::{output_error, write_json};
use crate::models::{ItemType, WorkspaceId};
use crate::storage::DedupStore;
use crate::Result;
use chrono::TimeZone;
use std::collections::HashMap;
use std::io::Write;

/// Lists the dup stacks of a workspace.
#[derive(Debug, Clone)]
pub struct StacksCommand {
    /// Workspace to list.
    pub workspace: WorkspaceId,
    /// Restrict to one item type.
    pub item_type: Option<ItemType>,
    /// Print JSON instead of text.
    pub json: bool,
}

impl StacksCommand {
    /// Prints every stack with its members' external ids.
    ///
    /// # Errors
    ///
    /// Returns an error if a store read fails.
    pub fn execute<S: DedupStore + ?Sized>(&self, store: &S, out: &mut dyn Write) -> Result<()> {
        let stacks = store.list_dup_stacks(&self.workspace, self.item_type)?;
        if self.json {
            return write_json(out, &stacks);
        }
        if stacks.is_empty() {
            writeln!(out, "No dup stacks in {}", self.workspace).map_err(output_error)?;
            return Ok(());
        }

        let member_ids: Vec<_> = stacks.iter().flat_map(|s| s.item_ids()).collect();
        let distant: HashMap<_, _> = store
            .get_items(&member_ids)?
            .into_iter()
            .map(|item| (item.id, item.distant_id))
            .collect();

        writeln!(out, "{} dup stacks in {}:", stacks.len(), self.workspace)
            .map_err(output_error)?;
        for stack in &stacks {
            writeln!(out).map_err(output_error)?;
            writeln!(
                out,
                "  {} ({}, created {})",
                stack.id,
                stack.item_type,
                format_timestamp(stack.created_at)
            )
            .map_err(output_error)?;
            for member in &stack.members {
                let label = distant
                    .get(&member.item_id)
                    .map_or("?", String::as_str);
                writeln!(
                    out,
                    "    {:<10} {label} [{}]",
                    member.dup_type.as_str(),
                    member.item_id
                )
                .map_err(output_error)?;
            }
        }
        Ok(())
    }
}

fn format_timestamp(secs: u64) -> String {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    chrono::Utc
        .timestamp_opt(secs, 0)
        .single()
        .map_or_else(|| secs.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
