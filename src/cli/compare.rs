//! Compare CLI command.

use super::{output_error, write_json};
use crate::config::DupstackConfig;
use crate::models::{Item, ItemId, ItemType, SimilarityEdge, WorkspaceId};
use crate::services::{DecisionBreakdown, evaluate_similarity, explain};
use crate::storage::DedupStore;
use crate::{Error, Result};
use serde::Serialize;
use std::io::Write;

/// Scores two stored items against each other.
///
/// Nothing is written to the store.
#[derive(Debug, Clone)]
pub struct CompareCommand {
    /// Workspace holding both items.
    pub workspace: WorkspaceId,
    /// Type of both items.
    pub item_type: ItemType,
    /// External id (or internal id) of the first item.
    pub first: String,
    /// External id (or internal id) of the second item.
    pub second: String,
    /// Print JSON instead of text.
    pub json: bool,
}

#[derive(Serialize)]
struct Comparison<'a> {
    first: &'a Item,
    second: &'a Item,
    edges: &'a [SimilarityEdge],
    decision: &'a DecisionBreakdown,
}

impl CompareCommand {
    /// Evaluates the pair and explains the verdict.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an item cannot be found, and the
    /// evaluator's error if the pair is not comparable.
    pub fn execute<S: DedupStore + ?Sized>(
        &self,
        store: &S,
        config: &DupstackConfig,
        out: &mut dyn Write,
    ) -> Result<()> {
        let first = self.find(store, &self.first)?;
        let second = self.find(store, &self.second)?;

        let edges = evaluate_similarity(&config.fields, &first, &second)?;
        let decision = explain(config, &first, &second, &edges)?;

        if self.json {
            return write_json(
                out,
                &Comparison {
                    first: &first,
                    second: &second,
                    edges: &edges,
                    decision: &decision,
                },
            );
        }

        writeln!(out, "{} vs {}", first.distant_id, second.distant_id).map_err(output_error)?;
        if edges.is_empty() {
            writeln!(out, "  No matching fields").map_err(output_error)?;
        }
        for edge in &edges {
            writeln!(
                out,
                "  {:<12} {:<9} {:?} ~ {:?}",
                edge.field_id,
                edge.score.as_str(),
                edge.value_a,
                edge.value_b
            )
            .map_err(output_error)?;
        }
        writeln!(out).map_err(output_error)?;
        writeln!(out, "Verdict: {}", decision.verdict).map_err(output_error)?;
        writeln!(
            out,
            "  Confident score: {:.1} / Potential score: {:.1}",
            decision.confident_score, decision.potential_score
        )
        .map_err(output_error)?;
        writeln!(
            out,
            "  Missing-data bonus: {:.0}, multiplier: x{:.2}",
            decision.missing_data_bonus, decision.multiplier
        )
        .map_err(output_error)?;
        if decision.confident_prevented {
            writeln!(out, "  Confident verdict prevented by a mismatch").map_err(output_error)?;
        }
        if let Some(field) = &decision.prevented_by {
            writeln!(out, "  Ruled out by mismatching field '{field}'").map_err(output_error)?;
        }
        Ok(())
    }

    fn find<S: DedupStore + ?Sized>(&self, store: &S, key: &str) -> Result<Item> {
        if let Some(item) = store.get_item_by_distant_id(&self.workspace, self.item_type, key)? {
            return Ok(item);
        }
        store
            .get_items(&[ItemId::new(key)])?
            .into_iter()
            .find(|item| item.workspace_id == self.workspace)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "no {} item '{key}' in workspace {}",
                    self.item_type, self.workspace
                ))
            })
    }
}
