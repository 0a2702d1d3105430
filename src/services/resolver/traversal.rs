//! Breadth-first expansion of a dup stack from its reference item.

use super::cache::PassCache;
use crate::config::DupstackConfig;
use crate::models::{DupType, Item, ItemId};
use crate::services::decision::{DuplicateVerdict, classify};
use crate::storage::DedupStore;
use crate::Result;
use std::collections::{HashMap, VecDeque};

/// Members collected by one traversal, before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDraft {
    /// Seed of the traversal; first confident member.
    pub reference: Item,
    /// Confident members, reference first.
    pub confident: Vec<ItemId>,
    /// Potential members in discovery order.
    pub potential: Vec<ItemId>,
    /// Whether the size cap stopped the expansion early.
    pub truncated: bool,
    tiers: HashMap<ItemId, DupType>,
}

impl StackDraft {
    /// Starts a draft holding only the reference.
    #[must_use]
    pub fn new(reference: Item) -> Self {
        let id = reference.id.clone();
        Self {
            reference,
            confident: vec![id.clone()],
            potential: Vec::new(),
            truncated: false,
            tiers: HashMap::from([(id, DupType::Confident)]),
        }
    }

    /// Returns true if `id` is already a member.
    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.tiers.contains_key(id)
    }

    /// Number of members including the reference.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.tiers.len()
    }

    /// Returns true if only the reference was collected.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.member_count() <= 1
    }

    /// Tier through which `id` joined the draft.
    #[must_use]
    pub fn tier(&self, id: &ItemId) -> Option<DupType> {
        self.tiers.get(id).copied()
    }

    /// Every member id, reference first.
    #[must_use]
    pub fn member_ids(&self) -> Vec<ItemId> {
        self.confident.iter().chain(&self.potential).cloned().collect()
    }

    fn push(&mut self, id: ItemId, tier: DupType) {
        match tier {
            DupType::Confident => self.confident.push(id.clone()),
            _ => self.potential.push(id.clone()),
        }
        self.tiers.insert(id, tier);
    }
}

/// Result of expanding from a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Traversal {
    /// Expansion finished with this draft.
    Done(StackDraft),
    /// A more complete, unclaimed item was reached; it must seed the stack.
    RestartWith(Item),
}

/// Expands a stack breadth-first from `reference`.
///
/// Neighbors of each member are visited most complete first and classified
/// against the member that reached them. A confident verdict under a
/// potential member is downgraded, so confidence never crosses an uncertain
/// link. With `allow_restart`, reaching a duplicate that outranks the
/// reference and belongs to no stack yet aborts with
/// [`Traversal::RestartWith`]. With `skip_stacked`, neighbors that already
/// belong to a persisted stack are left where they are.
///
/// # Errors
///
/// Returns [`crate::Error::InvariantViolation`] if an edge points at a
/// missing item and an error if a store read fails.
pub fn traverse<S: DedupStore + ?Sized>(
    store: &S,
    config: &DupstackConfig,
    cache: &mut PassCache,
    reference: &Item,
    allow_restart: bool,
    skip_stacked: bool,
) -> Result<Traversal> {
    let max_members = config.resolver.max_stack_size.max(1);
    let mut draft = StackDraft::new(reference.clone());
    let mut queue = VecDeque::from([reference.clone()]);

    'expand: while let Some(parent) = queue.pop_front() {
        let parent_tier = draft.tier(&parent.id).unwrap_or(DupType::Potential);
        let edges = cache.edges(store, &parent.id)?;

        let mut neighbor_ids: Vec<ItemId> = edges
            .iter()
            .filter_map(|e| e.other_endpoint(&parent.id))
            .filter(|id| !draft.contains(id))
            .cloned()
            .collect();
        neighbor_ids.sort();
        neighbor_ids.dedup();

        let mut neighbors = cache.items(store, &neighbor_ids)?;
        neighbors.retain(|n| n.similarity_checked && !n.is_merged());
        neighbors.sort_by(Item::completeness_cmp);

        for neighbor in neighbors {
            if draft.contains(&neighbor.id)
                || (skip_stacked && cache.in_existing_stack(store, &neighbor.id)?)
            {
                continue;
            }

            let pair_edges: Vec<_> = edges
                .iter()
                .filter(|e| e.connects(&parent.id, &neighbor.id))
                .cloned()
                .collect();
            let verdict = classify(config, &parent, &neighbor, &pair_edges)?;
            if !verdict.is_duplicate() {
                continue;
            }

            if allow_restart
                && neighbor.outranks(reference)
                && !cache.in_existing_stack(store, &neighbor.id)?
            {
                return Ok(Traversal::RestartWith(neighbor));
            }

            if draft.member_count() >= max_members {
                draft.truncated = true;
                break 'expand;
            }

            let tier = match (parent_tier, verdict) {
                (DupType::Confident, DuplicateVerdict::Confident) => DupType::Confident,
                _ => DupType::Potential,
            };
            draft.push(neighbor.id.clone(), tier);
            queue.push_back(neighbor);
        }
    }

    Ok(Traversal::Done(draft))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemType, ItemValue, WorkspaceId};
    use crate::services::similarity::evaluate_similarity;
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
        item.similarity_checked = true;
        item
    }

    fn linked_store(items: &[Item]) -> InMemoryDedupStore {
        let config = DupstackConfig::default();
        let store = InMemoryDedupStore::new();
        store.upsert_items(items).unwrap();
        for (i, a) in items.iter().enumerate() {
            for b in &items[i + 1..] {
                let edges = evaluate_similarity(&config.fields, a, b).unwrap();
                store.upsert_edges(&edges).unwrap();
            }
        }
        store
    }

    const ADA: [(&str, &str); 3] = [
        ("firstname", "Ada"),
        ("lastname", "Lovelace"),
        ("email", "ada@analytical.org"),
    ];

    #[test]
    fn test_restart_on_more_complete_neighbor() {
        let x = contact("x", 5, &ADA);
        let y = contact("y", 9, &ADA);
        let store = linked_store(&[x.clone(), y]);
        let config = DupstackConfig::default();

        let outcome = traverse(&store, &config, &mut PassCache::new(), &x, true, false).unwrap();
        assert!(matches!(outcome, Traversal::RestartWith(ref item) if item.id.as_str() == "y"));

        let outcome = traverse(&store, &config, &mut PassCache::new(), &x, false, false).unwrap();
        let Traversal::Done(draft) = outcome else {
            panic!("expected a finished traversal");
        };
        assert_eq!(draft.member_ids(), vec![ItemId::new("x"), ItemId::new("y")]);
    }

    #[test]
    fn test_confidence_does_not_cross_potential_link() {
        // a-b is potential (similar name, same phone); b-c is confident (same
        // name and mailbox); a-c is not a duplicate on its own
        let a = contact(
            "a",
            9,
            &[("firstname", "Ada"), ("lastname", "Lovelace"), ("phone", "0781208307")],
        );
        let b = contact(
            "b",
            5,
            &[("firstname", "Ada"), ("phone", "0781208307"), ("email", "bob@example.org")],
        );
        let c = contact(
            "c",
            3,
            &[("firstname", "Ada"), ("phone", "0600000000"), ("email", "bob@example.org")],
        );
        let store = linked_store(&[a.clone(), b, c]);
        let config = DupstackConfig::default();

        let Traversal::Done(draft) =
            traverse(&store, &config, &mut PassCache::new(), &a, true, false).unwrap()
        else {
            panic!("expected a finished traversal");
        };

        assert_eq!(draft.confident, vec![ItemId::new("a")]);
        assert_eq!(draft.potential, vec![ItemId::new("b"), ItemId::new("c")]);
        assert_eq!(draft.tier(&ItemId::new("c")), Some(DupType::Potential));
    }

    #[test]
    fn test_size_cap_truncates() {
        let items: Vec<Item> = (0..5)
            .map(|i| contact(&format!("i{i}"), 9 - i, &ADA))
            .collect();
        let store = linked_store(&items);
        let mut config = DupstackConfig::default();
        config.resolver.max_stack_size = 3;

        let Traversal::Done(draft) =
            traverse(&store, &config, &mut PassCache::new(), &items[0], true, false).unwrap()
        else {
            panic!("expected a finished traversal");
        };
        assert_eq!(draft.member_count(), 3);
        assert!(draft.truncated);
    }

    #[test]
    fn test_unchecked_neighbors_are_skipped() {
        let a = contact("a", 5, &ADA);
        let mut b = contact("b", 9, &ADA);
        b.similarity_checked = false;
        let store = linked_store(&[a.clone(), b]);

        let Traversal::Done(draft) = traverse(
            &store,
            &DupstackConfig::default(),
            &mut PassCache::new(),
            &a,
            true,
            false,
        )
        .unwrap() else {
            panic!("expected a finished traversal");
        };
        assert!(draft.is_trivial());
    }

    #[test]
    fn test_stacked_neighbors_left_in_place() {
        let items: Vec<Item> = ["a", "b", "c"].iter().map(|id| contact(id, 5, &ADA)).collect();
        let store = linked_store(&items);
        let stack = crate::models::DupStack::from_tiers(
            WorkspaceId::new("ws"),
            ItemType::Contacts,
            &[ItemId::new("b")],
            &[],
        )
        .unwrap();
        store.upsert_dup_stack(&stack).unwrap();
        let config = DupstackConfig::default();

        let Traversal::Done(draft) =
            traverse(&store, &config, &mut PassCache::new(), &items[0], true, true).unwrap()
        else {
            panic!("expected a finished traversal");
        };
        assert_eq!(draft.member_ids(), vec![ItemId::new("a"), ItemId::new("c")]);
    }
}
