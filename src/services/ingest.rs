//! Item sync.
//!
//! Applies CRM records to the store and keeps the dedup state consistent
//! with them. A record whose similarity-relevant properties changed loses
//! its edges and flags, and every stack it belonged to is dissolved with the
//! other members sent back to resolution.

use crate::config::FieldConfigSet;
use crate::models::{
    DupStackId, IncomingRecord, Item, ItemFlagsUpdate, ItemId, ItemType, WorkspaceId,
};
use crate::storage::DedupStore;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Outcome of a sync call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records stored for the first time.
    pub created: usize,
    /// Records whose stored value changed.
    pub updated: usize,
    /// Updated records that must be compared again.
    pub invalidated: usize,
    /// Records identical to what was stored.
    pub unchanged: usize,
    /// Items deleted because the CRM merged or removed them.
    pub removed: usize,
    /// Stacks dissolved by this sync.
    pub stacks_dissolved: usize,
}

/// Applies CRM records to a [`DedupStore`].
pub struct ItemSyncService<S: DedupStore + ?Sized> {
    store: Arc<S>,
    fields: FieldConfigSet,
}

impl<S: DedupStore + ?Sized> ItemSyncService<S> {
    /// Creates a sync service using the given field rules.
    #[must_use]
    pub fn new(store: Arc<S>, fields: &FieldConfigSet) -> Self {
        Self {
            store,
            fields: fields.clone(),
        }
    }

    /// Creates or updates items from CRM records.
    ///
    /// Records carrying `merged_in_distant_id` remove the matching item
    /// instead. Later records win when a batch repeats an external ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a record without an external ID
    /// and an error if a store operation fails.
    #[instrument(
        skip(self, records),
        fields(workspace_id = %workspace_id, item_type = %item_type, records = records.len())
    )]
    pub fn upsert_records(
        &self,
        workspace_id: &WorkspaceId,
        item_type: ItemType,
        records: &[IncomingRecord],
    ) -> Result<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();
        let mut writes: Vec<Item> = Vec::new();
        let mut invalidated: Vec<ItemId> = Vec::new();
        let mut merged: Vec<ItemId> = Vec::new();
        let relevant = self.fields.relevant_sources(item_type);

        for record in dedupe_by_distant_id(records)? {
            let existing =
                self.store
                    .get_item_by_distant_id(workspace_id, item_type, &record.distant_id)?;

            if record.merged_in_distant_id.is_some() {
                if let Some(item) = existing {
                    merged.push(item.id);
                }
                continue;
            }

            let filled_score = self.fields.filled_score(item_type, &record.value);
            match existing {
                None => {
                    let item = Item::new(
                        workspace_id.clone(),
                        item_type,
                        record.distant_id.clone(),
                        record.value.clone(),
                    )
                    .with_filled_score(filled_score);
                    writes.push(item);
                    report.created += 1;
                },
                Some(item) if item.value == record.value => {
                    report.unchanged += 1;
                },
                Some(mut item) => {
                    let changed = relevant
                        .iter()
                        .any(|source| item.value.get(*source) != record.value.get(*source));
                    item.value = record.value.clone();
                    item.filled_score = filled_score;
                    item.updated_at = crate::current_timestamp();
                    if changed {
                        item.similarity_checked = false;
                        item.dup_checked = false;
                        invalidated.push(item.id.clone());
                    }
                    writes.push(item);
                    report.updated += 1;
                },
            }
        }

        if !invalidated.is_empty() {
            let (dissolved, requeued) = self.dissolve_stacks(&invalidated)?;
            report.stacks_dissolved += dissolved;
            // pending writes hold flags read before the requeue
            for item in writes.iter_mut().filter(|i| requeued.contains(&i.id)) {
                item.dup_checked = false;
            }
            self.store.delete_edges_for_items(&invalidated)?;
        }
        if !writes.is_empty() {
            self.store.upsert_items(&writes)?;
        }
        if !merged.is_empty() {
            report.stacks_dissolved += self.dissolve_stacks(&merged)?.0;
            report.removed = self.store.delete_items(&merged)?;
        }
        report.invalidated = invalidated.len();

        metrics::counter!("items_upserted_total", "item_type" => item_type.as_str())
            .increment((report.created + report.updated) as u64);
        metrics::histogram!("item_sync_duration_ms", "operation" => "upsert")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::info!(
            workspace_id = %workspace_id,
            item_type = %item_type,
            created = report.created,
            updated = report.updated,
            invalidated = report.invalidated,
            removed = report.removed,
            "Synced records"
        );

        Ok(report)
    }

    /// Deletes the items behind external IDs removed from the CRM.
    ///
    /// Unknown IDs are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    #[instrument(
        skip(self, distant_ids),
        fields(workspace_id = %workspace_id, item_type = %item_type, records = distant_ids.len())
    )]
    pub fn remove_records(
        &self,
        workspace_id: &WorkspaceId,
        item_type: ItemType,
        distant_ids: &[String],
    ) -> Result<SyncReport> {
        let mut ids = Vec::new();
        for distant_id in distant_ids {
            if let Some(item) =
                self.store
                    .get_item_by_distant_id(workspace_id, item_type, distant_id)?
            {
                ids.push(item.id);
            }
        }

        let mut report = SyncReport::default();
        if ids.is_empty() {
            return Ok(report);
        }
        report.stacks_dissolved = self.dissolve_stacks(&ids)?.0;
        report.removed = self.store.delete_items(&ids)?;

        metrics::counter!("items_deleted_total", "item_type" => item_type.as_str())
            .increment(report.removed as u64);
        tracing::info!(
            workspace_id = %workspace_id,
            item_type = %item_type,
            removed = report.removed,
            stacks_dissolved = report.stacks_dissolved,
            "Removed records"
        );
        Ok(report)
    }

    /// Deletes every stack containing one of `ids` and requeues the other
    /// members.
    ///
    /// Returns the number of stacks deleted and the requeued item IDs.
    fn dissolve_stacks(&self, ids: &[ItemId]) -> Result<(usize, HashSet<ItemId>)> {
        let stacks = self.store.stacks_for_items(ids)?;
        if stacks.is_empty() {
            return Ok((0, HashSet::new()));
        }

        let leaving: HashSet<&ItemId> = ids.iter().collect();
        let requeued: HashSet<ItemId> = stacks
            .iter()
            .flat_map(|s| s.members.iter().map(|m| &m.item_id))
            .filter(|id| !leaving.contains(id))
            .cloned()
            .collect();
        let others: Vec<ItemId> = requeued.iter().cloned().collect();
        if !others.is_empty() {
            self.store
                .update_item_flags(&others, ItemFlagsUpdate::dup_checked(false))?;
        }

        let stack_ids: Vec<DupStackId> = stacks.iter().map(|s| s.id.clone()).collect();
        let deleted = self.store.delete_dup_stacks(&stack_ids)?;
        metrics::counter!("dup_stacks_deleted_total").increment(deleted as u64);
        tracing::debug!(stacks = deleted, requeued = others.len(), "Dissolved dup stacks");
        Ok((deleted, requeued))
    }
}

/// Keeps the last record per external ID, in first-seen order.
fn dedupe_by_distant_id(records: &[IncomingRecord]) -> Result<Vec<&IncomingRecord>> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(records.len());
    for record in records.iter().rev() {
        if record.distant_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "record has no external id".to_string(),
            ));
        }
        if seen.insert(record.distant_id.as_str()) {
            kept.push(record);
        }
    }
    kept.reverse();
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DupstackConfig;
    use crate::models::{DupStack, ItemQuery, ItemValue};
    use crate::services::{DupStackResolver, SimilarityInstaller};
    use crate::storage::InMemoryDedupStore;

    fn record(distant_id: &str, fields: &[(&str, &str)]) -> IncomingRecord {
        let value: ItemValue = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).into()))
            .collect();
        IncomingRecord::new(distant_id, value)
    }

    fn ada(distant_id: &str) -> IncomingRecord {
        record(
            distant_id,
            &[
                ("firstname", "Ada"),
                ("lastname", "Lovelace"),
                ("email", "ada@analytical.org"),
            ],
        )
    }

    fn service(store: &Arc<InMemoryDedupStore>) -> ItemSyncService<InMemoryDedupStore> {
        ItemSyncService::new(Arc::clone(store), &FieldConfigSet::default())
    }

    fn item(store: &InMemoryDedupStore, distant_id: &str) -> Option<Item> {
        store
            .get_item_by_distant_id(&WorkspaceId::new("ws"), ItemType::Contacts, distant_id)
            .unwrap()
    }

    fn resolve_all(store: &Arc<InMemoryDedupStore>) {
        let config = DupstackConfig::default();
        let ws = WorkspaceId::new("ws");
        SimilarityInstaller::new(Arc::clone(store), &config)
            .install_similarities(&ws, ItemType::Contacts)
            .unwrap();
        let resolver = DupStackResolver::new(Arc::clone(store), &config);
        while resolver.resolve_next_dup_stack(&ws).unwrap() {}
    }

    #[test]
    fn test_create_computes_filled_score() {
        let store = Arc::new(InMemoryDedupStore::new());
        let report = service(&store)
            .upsert_records(
                &WorkspaceId::new("ws"),
                ItemType::Contacts,
                &[record("c1", &[("firstname", "Ada"), ("email", "ada@x.org"), ("notes", "x")])],
            )
            .unwrap();

        assert_eq!(report.created, 1);
        let stored = item(&store, "c1").unwrap();
        assert_eq!(stored.filled_score, 2);
        assert!(!stored.similarity_checked);
        assert!(stored.sequence > 0);
    }

    #[test]
    fn test_resync_identical_is_noop() {
        let store = Arc::new(InMemoryDedupStore::new());
        let sync = service(&store);
        let ws = WorkspaceId::new("ws");
        sync.upsert_records(&ws, ItemType::Contacts, &[ada("c1")]).unwrap();
        let before = item(&store, "c1").unwrap();

        let report = sync.upsert_records(&ws, ItemType::Contacts, &[ada("c1")]).unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(item(&store, "c1").unwrap().id, before.id);
    }

    #[test]
    fn test_irrelevant_change_keeps_flags() {
        let store = Arc::new(InMemoryDedupStore::new());
        let sync = service(&store);
        let ws = WorkspaceId::new("ws");
        sync.upsert_records(&ws, ItemType::Contacts, &[ada("c1"), ada("c2")]).unwrap();
        resolve_all(&store);

        let mut changed = ada("c1");
        changed.value.insert("notes".to_string(), "met at the conference".into());
        let report = sync.upsert_records(&ws, ItemType::Contacts, &[changed]).unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.invalidated, 0);
        let stored = item(&store, "c1").unwrap();
        assert!(stored.similarity_checked);
        assert!(stored.dup_checked);
        assert_eq!(store.list_dup_stacks(&ws, None).unwrap().len(), 1);
    }

    #[test]
    fn test_relevant_change_dissolves_stack() {
        let store = Arc::new(InMemoryDedupStore::new());
        let sync = service(&store);
        let ws = WorkspaceId::new("ws");
        sync.upsert_records(&ws, ItemType::Contacts, &[ada("c1"), ada("c2"), ada("c3")])
            .unwrap();
        resolve_all(&store);
        assert_eq!(store.list_dup_stacks(&ws, None).unwrap().len(), 1);

        let report = sync
            .upsert_records(
                &ws,
                ItemType::Contacts,
                &[record("c1", &[("firstname", "Grace"), ("email", "grace@navy.mil")])],
            )
            .unwrap();

        assert_eq!(report.invalidated, 1);
        assert_eq!(report.stacks_dissolved, 1);
        assert!(store.list_dup_stacks(&ws, None).unwrap().is_empty());
        let c1 = item(&store, "c1").unwrap();
        assert!(!c1.similarity_checked);
        assert!(store.fetch_edges_for_item(&c1.id).unwrap().is_empty());
        let requeued = store
            .count_items(&ItemQuery::new(ws.clone()).with_dup_checked(false))
            .unwrap();
        assert_eq!(requeued, 3);

        resolve_all(&store);
        let stacks: Vec<DupStack> = store.list_dup_stacks(&ws, None).unwrap();
        assert_eq!(stacks.len(), 1);
        assert!(!stacks[0].contains(&c1.id));
    }

    #[test]
    fn test_merged_and_removed_records_are_deleted() {
        let store = Arc::new(InMemoryDedupStore::new());
        let sync = service(&store);
        let ws = WorkspaceId::new("ws");
        sync.upsert_records(&ws, ItemType::Contacts, &[ada("c1"), ada("c2"), ada("c3")])
            .unwrap();
        resolve_all(&store);

        let report = sync
            .upsert_records(&ws, ItemType::Contacts, &[ada("c2").merged_into("c1")])
            .unwrap();
        assert_eq!(report.removed, 1);
        assert!(item(&store, "c2").is_none());

        let report = sync
            .remove_records(&ws, ItemType::Contacts, &["c3".to_string(), "ghost".to_string()])
            .unwrap();
        assert_eq!(report.removed, 1);
        assert!(store.list_dup_stacks(&ws, None).unwrap().is_empty());
        assert!(!item(&store, "c1").unwrap().dup_checked);
    }

    #[test]
    fn test_last_duplicate_record_wins() {
        let store = Arc::new(InMemoryDedupStore::new());
        let report = service(&store)
            .upsert_records(
                &WorkspaceId::new("ws"),
                ItemType::Contacts,
                &[record("c1", &[("firstname", "Ada")]), ada("c1")],
            )
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(item(&store, "c1").unwrap().filled_score, 3);
    }

    #[test]
    fn test_blank_distant_id_is_rejected() {
        let store = Arc::new(InMemoryDedupStore::new());
        let err = service(&store)
            .upsert_records(&WorkspaceId::new("ws"), ItemType::Contacts, &[ada(" ")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
