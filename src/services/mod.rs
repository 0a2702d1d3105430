//! Business logic services.
//!
//! Services orchestrate a [`DedupStore`] and provide the engine's steps:
//! sync, similarity installation, dup stack resolution, and the pipeline
//! that chains them per workspace.

pub mod decision;
mod ingest;
mod installer;
mod pipeline;
pub mod resolver;
pub mod similarity;

pub use decision::{DecisionBreakdown, DuplicateVerdict, classify, explain};
pub use ingest::{ItemSyncService, SyncReport};
pub use installer::{InstallReport, SimilarityInstaller, planned_units};
pub use pipeline::{DedupPipeline, WorkspaceRunReport};
pub use resolver::{DupStackResolver, PassReport};
pub use similarity::evaluate_similarity;

use crate::models::{ItemQuery, WorkspaceId, WorkspaceProgress};
use crate::storage::DedupStore;
use crate::Result;

/// Recounts resolved items and folds the counts into the stored progress.
///
/// `dup_total` is the number of installed items and `dup_done` the number of
/// those already resolved. Both only ever grow.
pub(crate) fn refresh_dup_progress<S: DedupStore + ?Sized>(
    store: &S,
    workspace_id: &WorkspaceId,
) -> Result<WorkspaceProgress> {
    let installed = ItemQuery::new(workspace_id.clone()).with_similarity_checked(true);
    let total = store.count_items(&installed)?;
    let done = store.count_items(&installed.with_dup_checked(true))?;

    let mut progress = store.get_progress(workspace_id)?;
    progress.raise_dup_total(total);
    if done > progress.dup_done {
        progress.record_dups_done(done - progress.dup_done);
    }
    store.save_progress(&progress)?;
    Ok(progress)
}
