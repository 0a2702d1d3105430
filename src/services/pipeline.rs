//! Step runner for whole workspaces.
//!
//! Runs the installer for every item type, then drains the resolver. Runs
//! for the same workspace are serialised by an in-process lock; different
//! workspaces run as blocking tasks behind a semaphore sized by
//! `max_concurrent_workspaces`.

use super::{DupStackResolver, InstallReport, SimilarityInstaller};
use crate::config::DupstackConfig;
use crate::models::{ItemQuery, ItemType, WorkspaceId};
use crate::storage::DedupStore;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::instrument;

/// Minimum number of resolver passes allowed per run.
const MIN_PASS_BUDGET: u64 = 16;

/// Resolver passes allowed per installed item before a run gives up.
const PASSES_PER_ITEM: u64 = 4;

/// Outcome of one workspace run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceRunReport {
    /// Workspace that was processed.
    pub workspace_id: WorkspaceId,
    /// Installer outcome per item type.
    pub installs: Vec<(ItemType, InstallReport)>,
    /// Resolver passes run.
    pub passes: u64,
    /// Stacks written by those passes.
    pub stacks_written: u64,
    /// Whether the run stopped at the pass budget with work left.
    pub pass_budget_exhausted: bool,
}

type WorkspaceLocks = Mutex<HashMap<WorkspaceId, Arc<Mutex<()>>>>;

/// Chains installer and resolver per workspace.
///
/// Clones share the store and the workspace locks.
pub struct DedupPipeline<S: DedupStore + ?Sized> {
    store: Arc<S>,
    config: DupstackConfig,
    locks: Arc<WorkspaceLocks>,
}

impl<S: DedupStore + ?Sized> Clone for DedupPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<S: DedupStore + ?Sized> DedupPipeline<S> {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(store: Arc<S>, config: &DupstackConfig) -> Self {
        Self {
            store,
            config: config.clone(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Installs similarities for both item types, then resolves every
    /// pending dup stack of the workspace.
    ///
    /// Blocks while another run holds the same workspace.
    ///
    /// # Errors
    ///
    /// Returns the first installer or resolver error; steps already
    /// completed stay persisted.
    #[instrument(skip(self), fields(workspace_id = %workspace_id))]
    pub fn run_workspace(&self, workspace_id: &WorkspaceId) -> Result<WorkspaceRunReport> {
        let lock = self.workspace_lock(workspace_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.run_locked(workspace_id)
        };
        self.release_lock(workspace_id, &lock);
        result
    }

    /// Runs both steps; the caller holds the workspace lock.
    fn run_locked(&self, workspace_id: &WorkspaceId) -> Result<WorkspaceRunReport> {
        let start = Instant::now();

        let installer = SimilarityInstaller::new(Arc::clone(&self.store), &self.config);
        let mut installs = Vec::with_capacity(ItemType::all().len());
        for item_type in ItemType::all() {
            let report = installer.install_similarities(workspace_id, *item_type)?;
            installs.push((*item_type, report));
        }

        let installed = self.store.count_items(
            &ItemQuery::new(workspace_id.clone()).with_similarity_checked(true),
        )?;
        let budget = installed
            .saturating_mul(PASSES_PER_ITEM)
            .max(MIN_PASS_BUDGET);

        let resolver = DupStackResolver::new(Arc::clone(&self.store), &self.config);
        let mut passes = 0;
        let mut stacks_written = 0;
        let mut pass_budget_exhausted = false;
        loop {
            if passes >= budget {
                pass_budget_exhausted = true;
                tracing::warn!(
                    workspace_id = %workspace_id,
                    passes,
                    "Resolver pass budget exhausted, remaining items left for the next run"
                );
                break;
            }
            let Some(pass) = resolver.resolve_next(workspace_id)? else {
                break;
            };
            passes += 1;
            if pass.stack.is_some() {
                stacks_written += 1;
            }
        }

        metrics::histogram!("pipeline_run_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::info!(
            workspace_id = %workspace_id,
            passes,
            stacks_written,
            "Workspace run complete"
        );

        Ok(WorkspaceRunReport {
            workspace_id: workspace_id.clone(),
            installs,
            passes,
            stacks_written,
            pass_budget_exhausted,
        })
    }

    /// Runs several workspaces, at most `max_concurrent_workspaces` at once.
    ///
    /// Each workspace runs as a blocking task holding a semaphore permit.
    /// Results come back in input order; a failing workspace does not stop
    /// the others. Must not be called from within an async runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the task runtime cannot be started. Per-workspace
    /// failures, panics included, are reported in the returned list.
    #[instrument(skip(self, workspaces), fields(workspaces = workspaces.len()))]
    pub fn run_workspaces(
        &self,
        workspaces: &[WorkspaceId],
    ) -> Result<Vec<(WorkspaceId, Result<WorkspaceRunReport>)>>
    where
        S: 'static,
    {
        let permits = self.config.pipeline.max_concurrent_workspaces.max(1);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .max_blocking_threads(permits)
            .enable_all()
            .build()
            .map_err(|e| Error::store("pipeline_runtime_init", e))?;
        runtime.block_on(self.fan_out(workspaces, permits))
    }

    async fn fan_out(
        &self,
        workspaces: &[WorkspaceId],
        permits: usize,
    ) -> Result<Vec<(WorkspaceId, Result<WorkspaceRunReport>)>>
    where
        S: 'static,
    {
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();
        let mut slots: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut results: Vec<Option<Result<WorkspaceRunReport>>> =
            workspaces.iter().map(|_| None).collect();

        for (index, workspace_id) in workspaces.iter().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::store("pipeline_acquire_permit", e))?;
            metrics::gauge!("pipeline_available_permits")
                .set(semaphore.available_permits() as f64);

            let pipeline = self.clone();
            let workspace_id = workspace_id.clone();
            let handle = tasks.spawn_blocking(move || {
                let _permit = permit;
                pipeline.run_workspace(&workspace_id)
            });
            slots.insert(handle.id(), index);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (e.id(), Err(Error::store("run_workspace", e))),
            };
            let Some(index) = slots.remove(&id) else {
                continue;
            };
            if let Err(e) = &result {
                tracing::error!(
                    workspace_id = %workspaces[index],
                    error = %e,
                    "Workspace run failed"
                );
            }
            results[index] = Some(result);
        }

        Ok(workspaces
            .iter()
            .cloned()
            .zip(results)
            .filter_map(|(ws, slot)| slot.map(|result| (ws, result)))
            .collect())
    }

    /// Returns the lock serialising runs of one workspace.
    fn workspace_lock(&self, workspace_id: &WorkspaceId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(workspace_id.clone()).or_default())
    }

    /// Drops the workspace's lock entry once no other run holds or awaits it.
    fn release_lock(&self, workspace_id: &WorkspaceId, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one held by the caller
        let unused = locks
            .get(workspace_id)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(lock) <= 2);
        if unused {
            locks.remove(workspace_id);
        }
    }

    /// Number of workspaces with a live lock entry.
    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
