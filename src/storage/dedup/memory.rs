//! In-memory dedup store for testing.
//!
//! Provides a fast, non-persistent implementation of [`DedupStore`] for use
//! in unit tests and dry runs.

use crate::models::{
    DupStack, DupStackId, Item, ItemFlagsUpdate, ItemId, ItemQuery, ItemType, SimilarityEdge,
    WorkspaceId, WorkspaceProgress, sort_items,
};
use crate::storage::traits::DedupStore;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type EdgeSlot = (ItemId, ItemId, String);

#[derive(Debug, Default)]
struct MemoryState {
    items: HashMap<ItemId, Item>,
    edges: BTreeMap<EdgeSlot, SimilarityEdge>,
    stacks: BTreeMap<DupStackId, DupStack>,
    progress: HashMap<WorkspaceId, WorkspaceProgress>,
    next_sequence: u64,
}

/// In-memory dedup store.
///
/// Uses one `RwLock` over the whole state so every call is atomic.
/// Data is not persisted between runs.
///
/// # Example
///
/// ```rust,ignore
/// use dupstack::storage::InMemoryDedupStore;
///
/// let store = InMemoryDedupStore::new();
/// store.upsert_items(&[item])?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    state: RwLock<MemoryState>,
}

impl InMemoryDedupStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.state.read().map(|s| s.edges.len()).unwrap_or(0)
    }

    /// Returns every stored edge in canonical orientation.
    #[must_use]
    pub fn all_edges(&self) -> Vec<SimilarityEdge> {
        self.state
            .read()
            .map(|s| s.edges.values().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self, operation: &str) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| Error::store(operation, "Lock poisoned"))
    }

    fn write(&self, operation: &str) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| Error::store(operation, "Lock poisoned"))
    }
}

impl MemoryState {
    fn remove_memberships(&mut self, ids: &HashSet<&ItemId>) {
        for stack in self.stacks.values_mut() {
            stack.members.retain(|m| !ids.contains(&m.item_id));
        }
        self.stacks.retain(|_, stack| !stack.members.is_empty());
    }
}

fn assert_distant_id_free(items: &HashMap<ItemId, Item>, item: &Item) -> Result<()> {
    if item.is_merged() {
        return Ok(());
    }
    let taken = items.values().any(|other| {
        other.id != item.id
            && !other.is_merged()
            && other.workspace_id == item.workspace_id
            && other.item_type == item.item_type
            && other.distant_id == item.distant_id
    });
    if taken {
        return Err(Error::InvalidInput(format!(
            "distant id {} already used in workspace {}",
            item.distant_id, item.workspace_id
        )));
    }
    Ok(())
}

impl DedupStore for InMemoryDedupStore {
    fn upsert_items(&self, items: &[Item]) -> Result<Vec<Item>> {
        let mut state = self.write("upsert_items")?;
        // Staged so a rejected item leaves the whole batch unapplied
        let mut staged = state.items.clone();
        let mut next_sequence = state.next_sequence;
        let mut stored = Vec::with_capacity(items.len());

        for item in items {
            assert_distant_id_free(&staged, item)?;
            let mut item = item.clone();
            if let Some(existing) = staged.get(&item.id) {
                item.sequence = existing.sequence;
                item.created_at = existing.created_at;
            } else {
                next_sequence += 1;
                item.sequence = next_sequence;
            }
            staged.insert(item.id.clone(), item.clone());
            stored.push(item);
        }

        state.items = staged;
        state.next_sequence = next_sequence;
        Ok(stored)
    }

    fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        let state = self.read("get_items")?;
        Ok(ids.iter().filter_map(|id| state.items.get(id).cloned()).collect())
    }

    fn get_item_by_distant_id(
        &self,
        workspace_id: &WorkspaceId,
        item_type: ItemType,
        distant_id: &str,
    ) -> Result<Option<Item>> {
        let state = self.read("get_item_by_distant_id")?;
        Ok(state
            .items
            .values()
            .find(|i| {
                &i.workspace_id == workspace_id
                    && i.item_type == item_type
                    && i.distant_id == distant_id
                    && !i.is_merged()
            })
            .cloned())
    }

    fn fetch_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        let state = self.read("fetch_items")?;
        let mut items: Vec<Item> = state
            .items
            .values()
            .filter(|i| query.matches(i))
            .cloned()
            .collect();
        sort_items(&mut items, query.order);

        Ok(items
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn count_items(&self, query: &ItemQuery) -> Result<u64> {
        let state = self.read("count_items")?;
        let count = state.items.values().filter(|i| query.matches(i)).count();
        Ok(count as u64)
    }

    fn update_item_flags(&self, ids: &[ItemId], update: ItemFlagsUpdate) -> Result<usize> {
        let mut state = self.write("update_item_flags")?;
        let now = crate::current_timestamp();
        let mut updated = 0;
        for id in ids {
            if let Some(item) = state.items.get_mut(id) {
                update.apply(item);
                item.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn delete_items(&self, ids: &[ItemId]) -> Result<usize> {
        let mut state = self.write("delete_items")?;
        let doomed: HashSet<&ItemId> = ids.iter().collect();
        let before = state.items.len();
        state.items.retain(|id, _| !doomed.contains(id));
        state
            .edges
            .retain(|(a, b, _), _| !doomed.contains(a) && !doomed.contains(b));
        state.remove_memberships(&doomed);
        Ok(before - state.items.len())
    }

    fn list_workspaces(&self) -> Result<Vec<WorkspaceId>> {
        let state = self.read("list_workspaces")?;
        let workspaces: BTreeSet<WorkspaceId> =
            state.items.values().map(|i| i.workspace_id.clone()).collect();
        Ok(workspaces.into_iter().collect())
    }

    fn fetch_edges_for_item(&self, id: &ItemId) -> Result<Vec<SimilarityEdge>> {
        let state = self.read("fetch_edges_for_item")?;
        Ok(state
            .edges
            .values()
            .filter(|e| &e.item_a_id == id || &e.item_b_id == id)
            .cloned()
            .collect())
    }

    fn upsert_edges(&self, edges: &[SimilarityEdge]) -> Result<usize> {
        let mut state = self.write("upsert_edges")?;
        for edge in edges {
            let edge = edge.clone().canonical();
            state.edges.insert(edge.slot(), edge);
        }
        Ok(edges.len())
    }

    fn delete_edges_for_items(&self, ids: &[ItemId]) -> Result<usize> {
        let mut state = self.write("delete_edges_for_items")?;
        let doomed: HashSet<&ItemId> = ids.iter().collect();
        let before = state.edges.len();
        state
            .edges
            .retain(|(a, b, _), _| !doomed.contains(a) && !doomed.contains(b));
        Ok(before - state.edges.len())
    }

    fn items_without_edges(
        &self,
        workspace_id: &WorkspaceId,
        item_type: ItemType,
    ) -> Result<Vec<ItemId>> {
        let state = self.read("items_without_edges")?;
        let linked: HashSet<&ItemId> = state
            .edges
            .keys()
            .flat_map(|(a, b, _)| [a, b])
            .collect();
        let query = ItemQuery::new(workspace_id.clone()).with_item_type(item_type);
        let mut orphans: Vec<&Item> = state
            .items
            .values()
            .filter(|i| query.matches(i) && !linked.contains(&i.id))
            .collect();
        orphans.sort_by_key(|i| i.sequence);
        Ok(orphans.into_iter().map(|i| i.id.clone()).collect())
    }

    fn count_edges(&self, workspace_id: &WorkspaceId) -> Result<u64> {
        let state = self.read("count_edges")?;
        let count = state
            .edges
            .values()
            .filter(|e| {
                state
                    .items
                    .get(&e.item_a_id)
                    .is_some_and(|i| &i.workspace_id == workspace_id)
            })
            .count();
        Ok(count as u64)
    }

    fn upsert_dup_stack(&self, stack: &DupStack) -> Result<()> {
        stack.validate()?;
        let mut state = self.write("upsert_dup_stack")?;
        state.stacks.insert(stack.id.clone(), stack.clone());
        Ok(())
    }

    fn delete_dup_stacks(&self, ids: &[DupStackId]) -> Result<usize> {
        let mut state = self.write("delete_dup_stacks")?;
        Ok(ids
            .iter()
            .filter(|id| state.stacks.remove(*id).is_some())
            .count())
    }

    fn stacks_for_items(&self, ids: &[ItemId]) -> Result<Vec<DupStack>> {
        let state = self.read("stacks_for_items")?;
        Ok(state
            .stacks
            .values()
            .filter(|s| ids.iter().any(|id| s.contains(id)))
            .cloned()
            .collect())
    }

    fn list_dup_stacks(
        &self,
        workspace_id: &WorkspaceId,
        item_type: Option<ItemType>,
    ) -> Result<Vec<DupStack>> {
        let state = self.read("list_dup_stacks")?;
        let mut stacks: Vec<DupStack> = state
            .stacks
            .values()
            .filter(|s| &s.workspace_id == workspace_id)
            .filter(|s| item_type.is_none_or(|t| s.item_type == t))
            .cloned()
            .collect();
        stacks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(stacks)
    }

    fn get_progress(&self, workspace_id: &WorkspaceId) -> Result<WorkspaceProgress> {
        let state = self.read("get_progress")?;
        Ok(state
            .progress
            .get(workspace_id)
            .cloned()
            .unwrap_or_else(|| WorkspaceProgress::new(workspace_id.clone())))
    }

    fn save_progress(&self, progress: &WorkspaceProgress) -> Result<()> {
        let mut state = self.write("save_progress")?;
        state
            .progress
            .entry(progress.workspace_id.clone())
            .and_modify(|stored| stored.absorb(progress))
            .or_insert_with(|| progress.clone());
        Ok(())
    }

    fn reset_progress(&self, workspace_id: &WorkspaceId) -> Result<()> {
        let mut state = self.write("reset_progress")?;
        state.progress.remove(workspace_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DupType, ItemValue, SimilarityScore};

    fn item(id: &str, distant: &str) -> Item {
        Item::new(
            WorkspaceId::new("ws"),
            ItemType::Contacts,
            distant,
            ItemValue::new(),
        )
        .with_id(id)
    }

    fn edge(a: &str, b: &str, field: &str) -> SimilarityEdge {
        SimilarityEdge {
            item_a_id: ItemId::new(a),
            item_b_id: ItemId::new(b),
            field_id: field.to_string(),
            value_a: "x".to_string(),
            value_b: "x".to_string(),
            score: SimilarityScore::Exact,
        }
    }

    #[test]
    fn test_upsert_assigns_and_keeps_sequence() {
        let store = InMemoryDedupStore::new();
        let stored = store.upsert_items(&[item("a", "1"), item("b", "2")]).unwrap();
        assert_eq!(stored[0].sequence, 1);
        assert_eq!(stored[1].sequence, 2);

        let again = store.upsert_items(&[item("a", "1").with_filled_score(4)]).unwrap();
        assert_eq!(again[0].sequence, 1);
        assert_eq!(store.get_items(&[ItemId::new("a")]).unwrap()[0].filled_score, 4);
    }

    #[test]
    fn test_distant_id_unique_among_unmerged() {
        let store = InMemoryDedupStore::new();
        store.upsert_items(&[item("a", "1")]).unwrap();
        assert!(store.upsert_items(&[item("b", "1")]).is_err());

        let mut merged = item("c", "1");
        merged.merged_in_distant_id = Some("9".to_string());
        assert!(store.upsert_items(&[merged]).is_ok());
    }

    #[test]
    fn test_edges_are_slotted_per_pair_and_field() {
        let store = InMemoryDedupStore::new();
        store
            .upsert_edges(&[edge("a", "b", "email"), edge("b", "a", "email"), edge("a", "b", "phone")])
            .unwrap();
        assert_eq!(store.edge_count(), 2);
        assert_eq!(store.fetch_edges_for_item(&ItemId::new("b")).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_items_cascades() {
        let store = InMemoryDedupStore::new();
        store.upsert_items(&[item("a", "1"), item("b", "2"), item("c", "3")]).unwrap();
        store.upsert_edges(&[edge("a", "b", "email")]).unwrap();
        let stack = DupStack::from_tiers(
            WorkspaceId::new("ws"),
            ItemType::Contacts,
            &[ItemId::new("b")],
            &[ItemId::new("a")],
        )
        .unwrap();
        store.upsert_dup_stack(&stack).unwrap();

        assert_eq!(store.delete_items(&[ItemId::new("a")]).unwrap(), 1);
        assert_eq!(store.edge_count(), 0);
        let stacks = store.stacks_for_items(&[ItemId::new("b")]).unwrap();
        assert_eq!(stacks[0].members.len(), 1);
        assert_eq!(stacks[0].members[0].dup_type, DupType::Reference);

        let orphans = store
            .items_without_edges(&WorkspaceId::new("ws"), ItemType::Contacts)
            .unwrap();
        assert_eq!(orphans, vec![ItemId::new("b"), ItemId::new("c")]);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let store = InMemoryDedupStore::new();
        let ws = WorkspaceId::new("ws");
        let mut progress = WorkspaceProgress::new(ws.clone());
        progress.batches_total = 6;
        progress.batches_done = 4;
        store.save_progress(&progress).unwrap();

        progress.batches_done = 2;
        store.save_progress(&progress).unwrap();
        assert_eq!(store.get_progress(&ws).unwrap().batches_done, 4);

        store.reset_progress(&ws).unwrap();
        assert_eq!(store.get_progress(&ws).unwrap().batches_done, 0);
    }
}
