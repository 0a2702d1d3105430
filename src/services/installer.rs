//! Batched similarity installation.
//!
//! Compares every item that is not yet `similarity_checked` against the
//! rest of its batch, against earlier batches of the same run and against
//! every batch installed by previous runs.
//!
//! ```text
//! installed:  I1  I2 ... Im        (similarity_checked = true)
//! pending:    N1  N2 ... Nk        (chunks of batch_size)
//!
//! units for Nj:  Nj×Nj, Nj×N1 .. Nj×N(j-1), Nj×I1 .. Nj×Im
//! ```
//!
//! Items of `Nj` are flagged only after all of its units are persisted, so a
//! crash at any point leaves them pending and a rerun compares them again.
//! Edge writes are idempotent per pair and field, so replays add nothing.

use crate::config::{DupstackConfig, FieldConfigSet};
use crate::models::{
    Item, ItemFlagsUpdate, ItemId, ItemOrder, ItemQuery, ItemType, SimilarityEdge, WorkspaceId,
    item_ids,
};
use crate::services::similarity::evaluate_similarity;
use crate::storage::DedupStore;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Counters reported by one installer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Comparison units executed.
    pub units_completed: u64,
    /// Item pairs handed to the evaluator.
    pub pairs_compared: u64,
    /// Pairs skipped because the evaluator rejected them.
    pub pairs_failed: u64,
    /// Edges written (including rewrites of existing edges).
    pub edges_written: u64,
    /// Items flipped to `similarity_checked`.
    pub items_checked: u64,
    /// Items without any edge marked `dup_checked` directly.
    pub items_without_edges: u64,
}

/// Drives the similarity evaluator over a workspace in fixed-size batches.
pub struct SimilarityInstaller<S: DedupStore + ?Sized> {
    store: Arc<S>,
    fields: FieldConfigSet,
    batch_size: usize,
}

impl<S: DedupStore + ?Sized> SimilarityInstaller<S> {
    /// Creates an installer using the configured batch size and field rules.
    #[must_use]
    pub fn new(store: Arc<S>, config: &DupstackConfig) -> Self {
        Self {
            store,
            fields: config.fields.clone(),
            batch_size: config.installer.batch_size.max(1),
        }
    }

    /// Overrides the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Installs similarity edges for every pending item of a type.
    ///
    /// Safe to re-invoke after a failure: already flagged batches count as
    /// installed and pending ones are compared again from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the store fails and
    /// [`Error::InvariantViolation`] if the evaluator detects one. Pairs
    /// rejected with [`Error::InvalidInput`] are logged and skipped.
    #[allow(clippy::cast_possible_truncation)]
    #[instrument(skip(self), fields(workspace_id = %workspace_id, item_type = %item_type))]
    pub fn install_similarities(
        &self,
        workspace_id: &WorkspaceId,
        item_type: ItemType,
    ) -> Result<InstallReport> {
        let start = Instant::now();
        let mut report = InstallReport::default();

        let base = ItemQuery::new(workspace_id.clone())
            .with_item_type(item_type)
            .ordered_by(ItemOrder::Sequence);
        let installed = self
            .store
            .fetch_items(&base.clone().with_similarity_checked(true))?;
        let pending = self
            .store
            .fetch_items(&base.clone().with_similarity_checked(false))?;

        if !pending.is_empty() {
            self.install_pending(workspace_id, &installed, &pending, &mut report)?;
        }

        if self.store.count_items(&base.with_similarity_checked(false))? == 0 {
            report.items_without_edges = self.settle_unlinked(workspace_id, item_type)?;
        }

        tracing::info!(
            workspace_id = %workspace_id,
            item_type = %item_type,
            units = report.units_completed,
            pairs = report.pairs_compared,
            edges = report.edges_written,
            items_checked = report.items_checked,
            items_without_edges = report.items_without_edges,
            duration_ms = start.elapsed().as_millis() as u64,
            "Installed similarities"
        );
        metrics::histogram!("installer_run_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        Ok(report)
    }

    fn install_pending(
        &self,
        workspace_id: &WorkspaceId,
        installed: &[Item],
        pending: &[Item],
        report: &mut InstallReport,
    ) -> Result<()> {
        let new_batches: Vec<&[Item]> = pending.chunks(self.batch_size).collect();
        let installed_batches: Vec<&[Item]> = installed.chunks(self.batch_size).collect();

        let mut progress = self.store.get_progress(workspace_id)?;
        let planned = planned_units(new_batches.len(), installed_batches.len());
        progress.raise_batches_total(progress.batches_done + planned);
        self.store.save_progress(&progress)?;

        tracing::debug!(
            workspace_id = %workspace_id,
            pending = pending.len(),
            installed = installed.len(),
            planned_units = planned,
            "Scheduling similarity units"
        );

        for (j, batch) in new_batches.iter().enumerate() {
            self.run_unit(batch, None, report)?;
            progress.record_batch_done();
            self.store.save_progress(&progress)?;

            for other in new_batches[..j].iter().chain(installed_batches.iter()) {
                self.run_unit(batch, Some(*other), report)?;
                progress.record_batch_done();
                self.store.save_progress(&progress)?;
            }

            let ids = item_ids(batch);
            self.store
                .update_item_flags(&ids, ItemFlagsUpdate::similarity_checked(true))?;
            report.items_checked += ids.len() as u64;
        }

        Ok(())
    }

    /// Compares one batch with itself (`other = None`) or with another batch
    /// and persists the resulting edges.
    fn run_unit(
        &self,
        batch: &[Item],
        other: Option<&[Item]>,
        report: &mut InstallReport,
    ) -> Result<()> {
        let mut edges = Vec::new();

        match other {
            None => {
                for (i, a) in batch.iter().enumerate() {
                    for b in &batch[i + 1..] {
                        self.compare_pair(a, b, &mut edges, report)?;
                    }
                }
            },
            Some(other) => {
                for a in batch {
                    for b in other {
                        self.compare_pair(a, b, &mut edges, report)?;
                    }
                }
            },
        }

        if !edges.is_empty() {
            let written = self.store.upsert_edges(&edges)?;
            report.edges_written += written as u64;
            metrics::counter!("similarity_edges_upserted_total").increment(written as u64);
        }

        report.units_completed += 1;
        metrics::counter!("installer_units_completed_total").increment(1);
        Ok(())
    }

    fn compare_pair(
        &self,
        a: &Item,
        b: &Item,
        edges: &mut Vec<SimilarityEdge>,
        report: &mut InstallReport,
    ) -> Result<()> {
        report.pairs_compared += 1;
        metrics::counter!("similarity_pairs_compared_total").increment(1);

        match evaluate_similarity(&self.fields, a, b) {
            Ok(found) => {
                edges.extend(found);
                Ok(())
            },
            Err(Error::InvalidInput(reason)) => {
                tracing::warn!(item_a = %a.id, item_b = %b.id, reason = %reason, "Skipping pair");
                metrics::counter!("similarity_pair_errors_total").increment(1);
                report.pairs_failed += 1;
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    /// Marks items that ended up with no edge as resolved.
    fn settle_unlinked(&self, workspace_id: &WorkspaceId, item_type: ItemType) -> Result<u64> {
        let orphans = self.store.items_without_edges(workspace_id, item_type)?;
        let unsettled: Vec<ItemId> = self
            .store
            .get_items(&orphans)?
            .into_iter()
            .filter(|item| !item.dup_checked)
            .map(|item| item.id)
            .collect();

        if unsettled.is_empty() {
            return Ok(0);
        }

        self.store
            .update_item_flags(&unsettled, ItemFlagsUpdate::dup_checked(true))?;
        super::refresh_dup_progress(self.store.as_ref(), workspace_id)?;

        tracing::debug!(
            workspace_id = %workspace_id,
            count = unsettled.len(),
            "Marked items without edges as dup checked"
        );
        Ok(unsettled.len() as u64)
    }
}

/// Number of comparison units for `new` pending batches and `installed`
/// previously installed batches.
#[must_use]
pub const fn planned_units(new: usize, installed: usize) -> u64 {
    let new = new as u64;
    let installed = installed as u64;
    new * (new + 1) / 2 + new * installed
}
