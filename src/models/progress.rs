//! Per-workspace progress counters.

use super::WorkspaceId;
use serde::{Deserialize, Serialize};

/// Resumability and UI progress counters for one workspace.
///
/// Counters only grow between explicit resets; every mutator here keeps
/// them monotonic and stores persist them with `MAX` semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceProgress {
    /// Workspace the counters belong to.
    pub workspace_id: WorkspaceId,
    /// Comparison units scheduled by the installer.
    pub batches_total: u64,
    /// Comparison units completed by the installer.
    pub batches_done: u64,
    /// Items queued for resolution.
    pub dup_total: u64,
    /// Items the resolver has decided.
    pub dup_done: u64,
}

impl WorkspaceProgress {
    /// Creates zeroed counters.
    #[must_use]
    pub const fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            batches_total: 0,
            batches_done: 0,
            dup_total: 0,
            dup_done: 0,
        }
    }

    /// Raises the scheduled unit count to at least `total`.
    pub fn raise_batches_total(&mut self, total: u64) {
        self.batches_total = self.batches_total.max(total);
    }

    /// Records one completed comparison unit.
    pub fn record_batch_done(&mut self) {
        self.batches_done += 1;
        self.batches_total = self.batches_total.max(self.batches_done);
    }

    /// Raises the resolution queue size to at least `total`.
    pub fn raise_dup_total(&mut self, total: u64) {
        self.dup_total = self.dup_total.max(total);
    }

    /// Records `count` newly decided items.
    pub fn record_dups_done(&mut self, count: u64) {
        self.dup_done += count;
        self.dup_total = self.dup_total.max(self.dup_done);
    }

    /// Folds another snapshot in, keeping the larger value of every counter.
    pub fn absorb(&mut self, other: &Self) {
        self.batches_total = self.batches_total.max(other.batches_total);
        self.batches_done = self.batches_done.max(other.batches_done);
        self.dup_total = self.dup_total.max(other.dup_total);
        self.dup_done = self.dup_done.max(other.dup_done);
    }

    /// Fraction of installer units completed, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn batches_ratio(&self) -> f64 {
        if self.batches_total == 0 {
            return 1.0;
        }
        (self.batches_done as f64 / self.batches_total as f64).min(1.0)
    }

    /// Fraction of resolution work completed, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn dup_ratio(&self) -> f64 {
        if self.dup_total == 0 {
            return 1.0;
        }
        (self.dup_done as f64 / self.dup_total as f64).min(1.0)
    }
}
