//! Read cache owned by one resolution pass.

use crate::models::{Item, ItemId, SimilarityEdge};
use crate::storage::DedupStore;
use crate::{Error, Result};
use std::collections::HashMap;

/// Items, edges and stack memberships read during one pass.
///
/// Created at the start of a pass and dropped at its end, so restarts
/// within a pass reuse reads but separate passes never share state.
#[derive(Debug, Default)]
pub struct PassCache {
    items: HashMap<ItemId, Item>,
    edges: HashMap<ItemId, Vec<SimilarityEdge>>,
    stacked: HashMap<ItemId, bool>,
    store_reads: usize,
}

impl PassCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the cache with an item already read by the caller.
    pub fn insert_item(&mut self, item: Item) {
        self.items.insert(item.id.clone(), item);
    }

    /// Returns the number of store round-trips issued through the cache.
    #[must_use]
    pub const fn store_reads(&self) -> usize {
        self.store_reads
    }

    /// Returns the edges touching `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn edges<S: DedupStore + ?Sized>(
        &mut self,
        store: &S,
        id: &ItemId,
    ) -> Result<Vec<SimilarityEdge>> {
        if let Some(edges) = self.edges.get(id) {
            return Ok(edges.clone());
        }
        self.store_reads += 1;
        let edges = store.fetch_edges_for_item(id)?;
        self.edges.insert(id.clone(), edges.clone());
        Ok(edges)
    }

    /// Returns the items for `ids`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if an id does not resolve to an
    /// item, and an error if the store read fails.
    pub fn items<S: DedupStore + ?Sized>(&mut self, store: &S, ids: &[ItemId]) -> Result<Vec<Item>> {
        let missing: Vec<ItemId> = ids
            .iter()
            .filter(|id| !self.items.contains_key(*id))
            .cloned()
            .collect();

        if !missing.is_empty() {
            self.store_reads += 1;
            for item in store.get_items(&missing)? {
                self.items.insert(item.id.clone(), item);
            }
        }

        ids.iter()
            .map(|id| {
                self.items.get(id).cloned().ok_or_else(|| {
                    Error::InvariantViolation(format!("similarity edge points at missing item {id}"))
                })
            })
            .collect()
    }

    /// Returns true if `id` is a member of a persisted dup stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn in_existing_stack<S: DedupStore + ?Sized>(
        &mut self,
        store: &S,
        id: &ItemId,
    ) -> Result<bool> {
        if let Some(stacked) = self.stacked.get(id) {
            return Ok(*stacked);
        }
        self.store_reads += 1;
        let stacked = !store.stacks_for_items(std::slice::from_ref(id))?.is_empty();
        self.stacked.insert(id.clone(), stacked);
        Ok(stacked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemType, ItemValue, WorkspaceId};
    use crate::storage::InMemoryDedupStore;

    fn item(id: &str) -> Item {
        Item::new(WorkspaceId::new("ws"), ItemType::Contacts, id, ItemValue::new()).with_id(id)
    }

    #[test]
    fn test_items_are_read_once() {
        let store = InMemoryDedupStore::new();
        store.upsert_items(&[item("a"), item("b")]).unwrap();
        let mut cache = PassCache::new();

        let ids = [ItemId::new("b"), ItemId::new("a")];
        let first = cache.items(&store, &ids).unwrap();
        assert_eq!(first[0].id.as_str(), "b");
        cache.items(&store, &ids).unwrap();
        assert_eq!(cache.store_reads(), 1);
    }

    #[test]
    fn test_missing_item_is_invariant_violation() {
        let store = InMemoryDedupStore::new();
        let mut cache = PassCache::new();

        let err = cache.items(&store, &[ItemId::new("ghost")]).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn test_membership_is_cached() {
        let store = InMemoryDedupStore::new();
        store.upsert_items(&[item("a")]).unwrap();
        let mut cache = PassCache::new();

        assert!(!cache.in_existing_stack(&store, &ItemId::new("a")).unwrap());
        assert!(!cache.in_existing_stack(&store, &ItemId::new("a")).unwrap());
        assert_eq!(cache.store_reads(), 1);
    }
}
