//! Property-based tests for similarity scoring and stack resolution.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Field evaluation is symmetric
//! - Duplicate classification is symmetric
//! - Re-running the installer adds no edges
//! - Resolution assigns every item to at most one stack, with one reference

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use dupstack::models::{IncomingRecord, ItemQuery, ItemValue};
use dupstack::services::{DupStackResolver, ItemSyncService, SimilarityInstaller};
use dupstack::storage::{DedupStore, InMemoryDedupStore};
use dupstack::{
    DupType, DupstackConfig, FieldValue, Item, ItemType, WorkspaceId, classify,
    evaluate_similarity,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Generators
// ============================================================================

const FIRST_NAMES: &[&str] = &["Ada", "ada", "Grace", "Alan", "Alan ", "Katherine"];
const LAST_NAMES: &[&str] = &["Lovelace", "LOVELACE", "Hopper", "Turing", "Johnson"];
const EMAILS: &[&str] = &[
    "ada@analytical.org",
    "ADA@analytical.org",
    "grace@navy.mil",
    "alan@bletchley.uk",
    "kj@nasa.gov",
];
const PHONES: &[&str] = &["+44 20 7946 0018", "+1 555 0100", "555-0100"];
const COMPANIES: &[&str] = &["Analytical Engines", "Analytical Engine Ltd", "US Navy"];

fn optional(pool: &'static [&'static str]) -> impl Strategy<Value = Option<&'static str>> {
    proptest::option::weighted(0.7, prop::sample::select(pool))
}

/// A contact value drawn from small pools so that collisions are frequent.
fn contact_value() -> impl Strategy<Value = ItemValue> {
    (
        optional(FIRST_NAMES),
        optional(LAST_NAMES),
        optional(EMAILS),
        optional(PHONES),
        optional(COMPANIES),
    )
        .prop_map(|(first, last, email, phone, company)| {
            [
                ("firstname", first),
                ("lastname", last),
                ("email", email),
                ("phone", phone),
                ("company", company),
            ]
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k.to_string(), FieldValue::from(v))))
            .collect()
        })
}

fn contact(id: &str, value: ItemValue) -> Item {
    Item::new(WorkspaceId::new("ws"), ItemType::Contacts, id, value).with_id(id)
}

fn synced_store(values: &[ItemValue]) -> Arc<InMemoryDedupStore> {
    let store = Arc::new(InMemoryDedupStore::new());
    let records: Vec<IncomingRecord> = values
        .iter()
        .enumerate()
        .map(|(i, v)| IncomingRecord::new(format!("c{i}"), v.clone()))
        .collect();
    ItemSyncService::new(Arc::clone(&store), &DupstackConfig::default().fields)
        .upsert_records(&WorkspaceId::new("ws"), ItemType::Contacts, &records)
        .unwrap();
    store
}

// ============================================================================
// Evaluator and decision
// ============================================================================

proptest! {
    /// Property: swapping the items yields the same fields at the same scores.
    #[test]
    fn prop_evaluation_is_symmetric(a in contact_value(), b in contact_value()) {
        let config = DupstackConfig::default();
        let x = contact("x", a);
        let y = contact("y", b);

        let mut forward: Vec<_> = evaluate_similarity(&config.fields, &x, &y)
            .unwrap()
            .into_iter()
            .map(|e| (e.field_id, e.score))
            .collect();
        let mut backward: Vec<_> = evaluate_similarity(&config.fields, &y, &x)
            .unwrap()
            .into_iter()
            .map(|e| (e.field_id, e.score))
            .collect();
        forward.sort();
        backward.sort();
        prop_assert_eq!(forward, backward);
    }

    /// Property: every edge connects the two compared items.
    #[test]
    fn prop_edges_connect_the_pair(a in contact_value(), b in contact_value()) {
        let config = DupstackConfig::default();
        let x = contact("x", a);
        let y = contact("y", b);

        for edge in evaluate_similarity(&config.fields, &x, &y).unwrap() {
            prop_assert!(edge.connects(&x.id, &y.id));
            prop_assert!(!edge.value_a.is_empty());
            prop_assert!(!edge.value_b.is_empty());
        }
    }

    /// Property: `classify(a, b) == classify(b, a)`.
    #[test]
    fn prop_classification_is_symmetric(a in contact_value(), b in contact_value()) {
        let config = DupstackConfig::default();
        let x = contact("x", a);
        let y = contact("y", b);
        let edges = evaluate_similarity(&config.fields, &x, &y).unwrap();

        prop_assert_eq!(
            classify(&config, &x, &y, &edges).unwrap(),
            classify(&config, &y, &x, &edges).unwrap()
        );
    }

    /// Property: a contact with at least one comparable field is never
    /// judged a non-duplicate of an identical copy of itself.
    #[test]
    fn prop_identical_copy_is_a_duplicate(a in contact_value()) {
        let config = DupstackConfig::default();
        let x = contact("x", a.clone());
        let y = contact("y", a);
        let edges = evaluate_similarity(&config.fields, &x, &y).unwrap();
        prop_assume!(!edges.is_empty());

        prop_assert!(classify(&config, &x, &y, &edges).unwrap().is_duplicate());
    }
}

// ============================================================================
// Installer and resolver
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: a second install run over a fully installed workspace is a no-op.
    #[test]
    fn prop_install_is_idempotent(
        values in prop::collection::vec(contact_value(), 0..12),
        batch_size in 1usize..5,
    ) {
        let store = synced_store(&values);
        let config = DupstackConfig::default().with_batch_size(batch_size);
        let ws = WorkspaceId::new("ws");
        let installer = SimilarityInstaller::new(Arc::clone(&store), &config);

        installer.install_similarities(&ws, ItemType::Contacts).unwrap();
        let edges = store.all_edges();
        let second = installer.install_similarities(&ws, ItemType::Contacts).unwrap();

        prop_assert_eq!(second.pairs_compared, 0);
        prop_assert_eq!(store.all_edges().len(), edges.len());
        let pending = store
            .count_items(&ItemQuery::new(ws).with_similarity_checked(false))
            .unwrap();
        prop_assert_eq!(pending, 0);
    }

    /// Property: batch size changes the work split, never the edges found.
    #[test]
    fn prop_batch_size_does_not_change_edges(
        values in prop::collection::vec(contact_value(), 0..10),
        batch_size in 1usize..4,
    ) {
        let ws = WorkspaceId::new("ws");
        let slot_set = |batch_size: usize| {
            let store = synced_store(&values);
            let config = DupstackConfig::default().with_batch_size(batch_size);
            SimilarityInstaller::new(Arc::clone(&store), &config)
                .install_similarities(&ws, ItemType::Contacts)
                .unwrap();
            let ids: HashSet<_> = store
                .all_edges()
                .into_iter()
                .map(|e| {
                    let a = store.get_items(&[e.item_a_id.clone()]).unwrap().remove(0).distant_id;
                    let b = store.get_items(&[e.item_b_id.clone()]).unwrap().remove(0).distant_id;
                    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                    (lo, hi, e.field_id)
                })
                .collect();
            ids
        };

        prop_assert_eq!(slot_set(batch_size), slot_set(1000));
    }

    /// Property: after draining the resolver every item is decided, no item
    /// sits in two stacks and every stack starts with its single reference.
    #[test]
    fn prop_resolution_partitions_items(values in prop::collection::vec(contact_value(), 1..12)) {
        let store = synced_store(&values);
        let config = DupstackConfig::default();
        let ws = WorkspaceId::new("ws");
        SimilarityInstaller::new(Arc::clone(&store), &config)
            .install_similarities(&ws, ItemType::Contacts)
            .unwrap();

        let resolver = DupStackResolver::new(Arc::clone(&store), &config);
        let mut passes = 0;
        while resolver.resolve_next_dup_stack(&ws).unwrap() {
            passes += 1;
            prop_assert!(passes <= 4 * values.len() + 16, "resolution did not settle");
        }

        let undecided = store
            .count_items(&ItemQuery::new(ws.clone()).with_dup_checked(false))
            .unwrap();
        prop_assert_eq!(undecided, 0);

        let mut seen = HashSet::new();
        for stack in store.list_dup_stacks(&ws, None).unwrap() {
            prop_assert!(stack.validate().is_ok());
            prop_assert!(stack.members.len() >= 2);
            prop_assert_eq!(stack.members[0].dup_type, DupType::Reference);
            for member in &stack.members {
                prop_assert!(seen.insert(member.item_id.clone()), "item in two stacks");
            }
        }

        let progress = store.get_progress(&ws).unwrap();
        prop_assert_eq!(progress.dup_done, progress.dup_total);
    }
}
