//! Dup stack resolution.
//!
//! Builds one dup stack per pass from the persisted similarity graph.
//!
//! # Pass
//!
//! ```text
//! pick reference ──► traverse ──► RestartWith(better) ──┐
//!  (most complete      │                                 │
//!   unresolved item)   │◄────────────────────────────────┘
//!                      ▼
//!                 Done(draft) ──► commit
//!                                  1. delete overlapping stacks, reset their other members
//!                                  2. insert the new stack (unless trivial)
//!                                  3. mark members dup_checked
//!                                  4. refresh progress
//! ```
//!
//! Nothing is written before the commit, so a pass killed midway leaves the
//! flags untouched and a rerun recomputes the same stack.

mod cache;
mod traversal;

pub use cache::PassCache;
pub use traversal::{StackDraft, Traversal, traverse};

use crate::config::DupstackConfig;
use crate::models::{
    DupStack, DupStackId, Item, ItemFlagsUpdate, ItemId, ItemOrder, ItemQuery, WorkspaceId,
};
use crate::storage::DedupStore;
use crate::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Summary of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Item that seeded the committed stack.
    pub reference: ItemId,
    /// The persisted stack, `None` when the reference had no duplicate.
    pub stack: Option<DupStack>,
    /// Restarts taken before the traversal settled.
    pub restarts: usize,
    /// Whether the size cap cut the expansion short.
    pub truncated: bool,
    /// Stacks deleted because they overlapped the new one.
    pub replaced_stacks: usize,
    /// Items of replaced stacks sent back to the resolution queue.
    pub requeued_items: usize,
}

/// Resolves dup stacks one pass at a time.
///
/// Passes over the same workspace must not run concurrently; the pipeline
/// serialises them.
pub struct DupStackResolver<S: DedupStore + ?Sized> {
    store: Arc<S>,
    config: DupstackConfig,
}

impl<S: DedupStore + ?Sized> DupStackResolver<S> {
    /// Creates a resolver.
    #[must_use]
    pub fn new(store: Arc<S>, config: &DupstackConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    /// Resolves the next stack of a workspace.
    ///
    /// Returns `false` once no item is left to resolve; callers loop until
    /// then.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve_next`].
    pub fn resolve_next_dup_stack(&self, workspace_id: &WorkspaceId) -> Result<bool> {
        Ok(self.resolve_next(workspace_id)?.is_some())
    }

    /// Resolves the next stack of a workspace and reports what was done.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if an edge points at a
    /// missing item, and [`crate::Error::OperationFailed`] if the store fails.
    #[instrument(skip(self), fields(workspace_id = %workspace_id))]
    pub fn resolve_next(&self, workspace_id: &WorkspaceId) -> Result<Option<PassReport>> {
        let start = Instant::now();

        let Some(seed) = self.pick_reference(workspace_id)? else {
            metrics::counter!("resolver_passes_total", "outcome" => "idle").increment(1);
            return Ok(None);
        };

        let mut cache = PassCache::new();
        cache.insert_item(seed.clone());
        let (draft, restarts) = self.settle_traversal(seed, &mut cache)?;
        let report = self.commit(workspace_id, draft, restarts)?;

        let outcome = if report.stack.is_some() { "stack" } else { "no_stack" };
        metrics::counter!("resolver_passes_total", "outcome" => outcome).increment(1);
        metrics::histogram!("resolver_pass_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::debug!(
            workspace_id = %workspace_id,
            reference = %report.reference,
            members = report.stack.as_ref().map_or(1, |s| s.members.len()),
            restarts = report.restarts,
            truncated = report.truncated,
            store_reads = cache.store_reads(),
            "Resolved dup stack"
        );

        Ok(Some(report))
    }

    /// Picks the most complete item that is installed but not resolved.
    fn pick_reference(&self, workspace_id: &WorkspaceId) -> Result<Option<Item>> {
        let query = ItemQuery::new(workspace_id.clone())
            .with_similarity_checked(true)
            .with_dup_checked(false)
            .ordered_by(ItemOrder::FilledScoreDesc)
            .with_limit(1);
        Ok(self.store.fetch_items(&query)?.into_iter().next())
    }

    /// Traverses from `reference`, following restarts until a draft is done.
    ///
    /// A draft cut short by the size cap must not pull members out of
    /// persisted stacks: the next pass would be capped again and dissolve
    /// the stack it just wrote. Such a draft is rebuilt with stacked
    /// neighbors left in place.
    fn settle_traversal(
        &self,
        mut reference: Item,
        cache: &mut PassCache,
    ) -> Result<(StackDraft, usize)> {
        let max_restarts = self.config.resolver.max_restarts;
        let mut restarts = 0;
        let mut skip_stacked = false;

        loop {
            let allow_restart = restarts < max_restarts;
            match traverse(
                self.store.as_ref(),
                &self.config,
                cache,
                &reference,
                allow_restart,
                skip_stacked,
            )? {
                Traversal::Done(draft) => {
                    if draft.truncated && !skip_stacked && self.absorbs_stacked(&draft, cache)? {
                        tracing::debug!(
                            reference = %reference.id,
                            "Capped draft overlaps stored stacks, leaving them in place"
                        );
                        skip_stacked = true;
                        continue;
                    }
                    if !allow_restart {
                        tracing::warn!(
                            reference = %reference.id,
                            restarts,
                            "Restart limit reached, keeping current reference"
                        );
                    }
                    return Ok((draft, restarts));
                },
                Traversal::RestartWith(better) => {
                    restarts += 1;
                    metrics::counter!("resolver_restarts_total").increment(1);
                    tracing::debug!(
                        from = %reference.id,
                        to = %better.id,
                        "Restarting traversal with more complete item"
                    );
                    reference = better;
                },
            }
        }
    }

    /// Returns true if any member of `draft` already sits in a stored stack.
    fn absorbs_stacked(&self, draft: &StackDraft, cache: &mut PassCache) -> Result<bool> {
        for id in draft.member_ids() {
            if cache.in_existing_stack(self.store.as_ref(), &id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Persists the outcome of a traversal.
    fn commit(
        &self,
        workspace_id: &WorkspaceId,
        draft: StackDraft,
        restarts: usize,
    ) -> Result<PassReport> {
        let members = draft.member_ids();
        let member_set: HashSet<&ItemId> = members.iter().collect();

        let overlapping = self.store.stacks_for_items(&members)?;
        let requeue: Vec<ItemId> = overlapping
            .iter()
            .flat_map(DupStack::item_ids)
            .filter(|id| !member_set.contains(id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        if !requeue.is_empty() {
            self.store
                .update_item_flags(&requeue, ItemFlagsUpdate::dup_checked(false))?;
        }
        if !overlapping.is_empty() {
            let ids: Vec<DupStackId> = overlapping.iter().map(|s| s.id.clone()).collect();
            let deleted = self.store.delete_dup_stacks(&ids)?;
            metrics::counter!("dup_stacks_deleted_total").increment(deleted as u64);
        }

        let stack = if draft.is_trivial() {
            None
        } else {
            let stack = DupStack::from_tiers(
                workspace_id.clone(),
                draft.reference.item_type,
                &draft.confident,
                &draft.potential,
            )?;
            self.store.upsert_dup_stack(&stack)?;
            metrics::counter!("dup_stacks_created_total").increment(1);
            Some(stack)
        };

        self.store
            .update_item_flags(&members, ItemFlagsUpdate::dup_checked(true))?;
        super::refresh_dup_progress(self.store.as_ref(), workspace_id)?;

        if draft.truncated {
            tracing::warn!(
                workspace_id = %workspace_id,
                reference = %draft.reference.id,
                members = members.len(),
                "Stack size limit reached, remaining duplicates left for later passes"
            );
        }

        Ok(PassReport {
            reference: draft.reference.id.clone(),
            stack,
            restarts,
            truncated: draft.truncated,
            replaced_stacks: overlapping.len(),
            requeued_items: requeue.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DupType, ItemType, ItemValue};
    use crate::services::SimilarityInstaller;
    use crate::storage::InMemoryDedupStore;

    fn contact(id: &str, filled: u32, fields: &[(&str, &str)]) -> Item {
        let mut item = Item::new(
            WorkspaceId::new("ws"),
            ItemType::Contacts,
            id,
            ItemValue::new(),
        )
        .with_id(id)
        .with_filled_score(filled);
        for (name, value) in fields {
            item = item.with_field(*name, *value);
        }
        item
    }

    fn installed_store(items: &[Item]) -> Arc<InMemoryDedupStore> {
        let store = Arc::new(InMemoryDedupStore::new());
        store.upsert_items(items).unwrap();
        SimilarityInstaller::new(Arc::clone(&store), &DupstackConfig::default())
            .install_similarities(&WorkspaceId::new("ws"), ItemType::Contacts)
            .unwrap();
        store
    }

    const ADA: [(&str, &str); 3] = [
        ("firstname", "Ada"),
        ("lastname", "Lovelace"),
        ("email", "ada@analytical.org"),
    ];

    #[test]
    fn test_resolves_one_stack_then_idles() {
        let store = installed_store(&[
            contact("a", 3, &ADA),
            contact("b", 7, &ADA),
            contact("c", 1, &[("firstname", "Grace")]),
        ]);
        let resolver = DupStackResolver::new(Arc::clone(&store), &DupstackConfig::default());
        let ws = WorkspaceId::new("ws");

        let report = resolver.resolve_next(&ws).unwrap().unwrap();
        let stack = report.stack.unwrap();
        assert_eq!(stack.reference(), Some(&ItemId::new("b")));
        assert_eq!(stack.members_of_type(DupType::Confident), vec![&ItemId::new("a")]);

        while resolver.resolve_next_dup_stack(&ws).unwrap() {}
        assert!(resolver.resolve_next(&ws).unwrap().is_none());
        let pending = store
            .count_items(
                &ItemQuery::new(ws.clone())
                    .with_similarity_checked(true)
                    .with_dup_checked(false),
            )
            .unwrap();
        assert_eq!(pending, 0);

        let progress = store.get_progress(&ws).unwrap();
        assert_eq!(progress.dup_total, 3);
        assert_eq!(progress.dup_done, 3);
    }

    #[test]
    fn test_restart_makes_richer_item_the_reference() {
        let store = installed_store(&[contact("x", 5, &ADA), contact("y", 9, &ADA)]);
        // y was settled earlier without a stack, so x is picked first
        store
            .update_item_flags(&[ItemId::new("y")], ItemFlagsUpdate::dup_checked(true))
            .unwrap();
        let resolver = DupStackResolver::new(Arc::clone(&store), &DupstackConfig::default());

        let report = resolver
            .resolve_next(&WorkspaceId::new("ws"))
            .unwrap()
            .unwrap();

        assert_eq!(report.restarts, 1);
        assert_eq!(report.reference, ItemId::new("y"));
        assert_eq!(report.stack.unwrap().reference(), Some(&ItemId::new("y")));
    }

    #[test]
    fn test_restart_skipped_for_stacked_neighbor() {
        let store = installed_store(&[contact("x", 5, &ADA), contact("y", 9, &ADA)]);
        let existing = DupStack::from_tiers(
            WorkspaceId::new("ws"),
            ItemType::Contacts,
            &[ItemId::new("y")],
            &[],
        )
        .unwrap();
        store.upsert_dup_stack(&existing).unwrap();
        store
            .update_item_flags(&[ItemId::new("y")], ItemFlagsUpdate::dup_checked(true))
            .unwrap();
        let resolver = DupStackResolver::new(Arc::clone(&store), &DupstackConfig::default());

        let report = resolver
            .resolve_next(&WorkspaceId::new("ws"))
            .unwrap()
            .unwrap();

        assert_eq!(report.restarts, 0);
        assert_eq!(report.reference, ItemId::new("x"));
        assert_eq!(report.replaced_stacks, 1);
        let stacks = store
            .list_dup_stacks(&WorkspaceId::new("ws"), None)
            .unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].item_ids(), vec![ItemId::new("x"), ItemId::new("y")]);
    }

    #[test]
    fn test_overlapping_stack_is_rebuilt_and_others_requeued() {
        let store = installed_store(&[
            contact("a", 9, &ADA),
            contact("b", 5, &ADA),
            contact("z", 1, &[("firstname", "Zed")]),
        ]);
        // stale stack grouping b with an unrelated item
        let stale = DupStack::from_tiers(
            WorkspaceId::new("ws"),
            ItemType::Contacts,
            &[ItemId::new("z")],
            &[ItemId::new("b")],
        )
        .unwrap();
        store.upsert_dup_stack(&stale).unwrap();
        let resolver = DupStackResolver::new(Arc::clone(&store), &DupstackConfig::default());

        let report = resolver
            .resolve_next(&WorkspaceId::new("ws"))
            .unwrap()
            .unwrap();

        assert_eq!(report.reference, ItemId::new("a"));
        assert_eq!(report.replaced_stacks, 1);
        assert_eq!(report.requeued_items, 1);
        let z = &store.get_items(&[ItemId::new("z")]).unwrap()[0];
        assert!(!z.dup_checked);

        while resolver.resolve_next_dup_stack(&WorkspaceId::new("ws")).unwrap() {}
        let stacks = store.list_dup_stacks(&WorkspaceId::new("ws"), None).unwrap();
        assert_eq!(stacks.len(), 1);
        assert!(stacks.iter().all(|s| s.validate().is_ok()));
    }

    #[test]
    fn test_capped_cluster_drains_without_dissolving_stacks() {
        let items: Vec<Item> = (0..6).map(|i| contact(&format!("c{i}"), 3, &ADA)).collect();
        let store = installed_store(&items);
        let mut config = DupstackConfig::default();
        config.resolver.max_stack_size = 3;
        let resolver = DupStackResolver::new(Arc::clone(&store), &config);
        let ws = WorkspaceId::new("ws");

        let mut reports = Vec::new();
        while let Some(report) = resolver.resolve_next(&ws).unwrap() {
            reports.push(report);
            assert!(reports.len() <= items.len(), "resolution did not settle");
        }

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.replaced_stacks == 0 && r.requeued_items == 0));
        let pending = store
            .count_items(&ItemQuery::new(ws.clone()).with_dup_checked(false))
            .unwrap();
        assert_eq!(pending, 0);

        let stacks = store.list_dup_stacks(&ws, None).unwrap();
        assert_eq!(stacks.len(), 2);
        let mut seen = HashSet::new();
        for stack in &stacks {
            assert_eq!(stack.members.len(), 3);
            assert!(stack.item_ids().into_iter().all(|id| seen.insert(id)));
        }
        assert_eq!(seen.len(), 6);
    }
}
