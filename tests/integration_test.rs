//! End-to-end tests: import, install, resolve and re-sync against both stores.
//!
//! Every scenario runs on `SqliteDedupStore` in a temporary directory; the
//! store comparison test also runs it on `InMemoryDedupStore` and checks that
//! both backends reach the same stacks.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use dupstack::io::{Format, create_import_source, open_import_source, read_records};
use dupstack::models::{IncomingRecord, ItemQuery};
use dupstack::services::{DedupPipeline, ItemSyncService};
use dupstack::storage::{DedupStore, InMemoryDedupStore, SqliteDedupStore};
use dupstack::{DupType, DupstackConfig, ItemType, WorkspaceId};
use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

const CONTACTS_CSV: &str = "\
id,firstname,lastname,email,phone,hs_additional_emails
c1,Ada,Lovelace,ada@analytical.org,,
c2,Ada,Lovelace,ADA@analytical.org,+44 20 7946 0018,countess@analytical.org
c3,Grace,Hopper,grace@navy.mil,,
c4,Mathias,,,0781208307,
c5,Mathias,Bragagia,mathias@example.com,0781208307,
";

const COMPANIES_NDJSON: &str = r#"{"id": "k1", "name": "Acme Corp", "domain": "acme.com"}
{"id": "k2", "name": "Acme Corp", "website": "https://www.acme.com/"}
{"id": "k3", "name": "Globex", "domain": "globex.com"}
"#;

fn workspace() -> WorkspaceId {
    WorkspaceId::new("acme")
}

fn sqlite_store(dir: &TempDir) -> Arc<SqliteDedupStore> {
    Arc::new(SqliteDedupStore::new(dir.path().join("dupstack.db")).expect("open store"))
}

fn parse(text: &str, format: Format) -> Vec<IncomingRecord> {
    let mut source = create_import_source(Cursor::new(text.to_string()), format).unwrap();
    read_records(source.as_mut()).unwrap()
}

fn sync<S: DedupStore + ?Sized>(store: &Arc<S>, item_type: ItemType, records: &[IncomingRecord]) {
    ItemSyncService::new(Arc::clone(store), &DupstackConfig::default().fields)
        .upsert_records(&workspace(), item_type, records)
        .unwrap();
}

fn run<S: DedupStore + ?Sized>(store: &Arc<S>) {
    let report = DedupPipeline::new(Arc::clone(store), &DupstackConfig::default())
        .run_workspace(&workspace())
        .unwrap();
    assert!(!report.pass_budget_exhausted);
}

/// Stacks as sets of external ids, reference first in each entry.
fn stacks<S: DedupStore + ?Sized>(
    store: &S,
    item_type: ItemType,
) -> BTreeSet<(String, BTreeSet<(String, DupType)>)> {
    store
        .list_dup_stacks(&workspace(), Some(item_type))
        .unwrap()
        .into_iter()
        .map(|stack| {
            let distant = |id| {
                store
                    .get_items(&[id])
                    .unwrap()
                    .pop()
                    .expect("stack member exists")
                    .distant_id
            };
            let reference = distant(stack.reference().cloned().expect("reference"));
            let members = stack
                .members
                .iter()
                .map(|m| (distant(m.item_id.clone()), m.dup_type))
                .collect();
            (reference, members)
        })
        .collect()
}

fn members(list: &[(&str, DupType)]) -> BTreeSet<(String, DupType)> {
    list.iter().map(|(id, t)| ((*id).to_string(), *t)).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_csv_import_builds_confident_and_potential_stacks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("contacts.csv");
    std::fs::write(&path, CONTACTS_CSV).unwrap();

    let store = sqlite_store(&dir);
    let mut source = open_import_source(&path, None).unwrap();
    sync(&store, ItemType::Contacts, &read_records(source.as_mut()).unwrap());
    run(&store);

    let expected: BTreeSet<_> = [
        (
            "c2".to_string(),
            members(&[("c2", DupType::Reference), ("c1", DupType::Confident)]),
        ),
        (
            "c5".to_string(),
            members(&[("c5", DupType::Reference), ("c4", DupType::Potential)]),
        ),
    ]
    .into_iter()
    .collect();
    assert_eq!(stacks(store.as_ref(), ItemType::Contacts), expected);

    let undecided = store
        .count_items(&ItemQuery::new(workspace()).with_dup_checked(false))
        .unwrap();
    assert_eq!(undecided, 0);
    let progress = store.get_progress(&workspace()).unwrap();
    assert_eq!(progress.dup_done, 5);
    assert_eq!(progress.dup_total, 5);
    assert_eq!(progress.batches_done, progress.batches_total);
}

#[test]
fn test_stacks_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = sqlite_store(&dir);
        sync(&store, ItemType::Contacts, &parse(CONTACTS_CSV, Format::Csv));
        run(&store);
    }

    let reopened = sqlite_store(&dir);
    assert_eq!(stacks(reopened.as_ref(), ItemType::Contacts).len(), 2);

    // Nothing left to do after a restart
    let report = DedupPipeline::new(Arc::clone(&reopened), &DupstackConfig::default())
        .run_workspace(&workspace())
        .unwrap();
    assert_eq!(report.passes, 0);
    assert!(report.installs.iter().all(|(_, r)| r.pairs_compared == 0));
}

#[test]
fn test_memory_and_sqlite_stores_agree() {
    let dir = TempDir::new().unwrap();
    let sqlite = sqlite_store(&dir);
    let memory = Arc::new(InMemoryDedupStore::new());

    for store in [
        Arc::clone(&sqlite) as Arc<dyn DedupStore>,
        Arc::clone(&memory) as Arc<dyn DedupStore>,
    ] {
        sync(&store, ItemType::Contacts, &parse(CONTACTS_CSV, Format::Csv));
        sync(&store, ItemType::Companies, &parse(COMPANIES_NDJSON, Format::Json));
        run(&store);
    }

    for item_type in ItemType::all() {
        assert_eq!(
            stacks(sqlite.as_ref(), *item_type),
            stacks(memory.as_ref(), *item_type),
            "{item_type} stacks differ"
        );
    }
    assert_eq!(
        sqlite.count_edges(&workspace()).unwrap(),
        memory.count_edges(&workspace()).unwrap()
    );
}

#[test]
fn test_company_domain_and_website_match() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    sync(&store, ItemType::Companies, &parse(COMPANIES_NDJSON, Format::Json));
    run(&store);

    let found = stacks(store.as_ref(), ItemType::Companies);
    assert_eq!(found.len(), 1);
    let (_, stack_members) = found.into_iter().next().unwrap();
    let ids: BTreeSet<_> = stack_members.into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, ["k1", "k2"].iter().map(ToString::to_string).collect());
    assert!(stacks(store.as_ref(), ItemType::Contacts).is_empty());
}

#[test]
fn test_relevant_resync_dissolves_and_rebuilds() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    sync(&store, ItemType::Contacts, &parse(CONTACTS_CSV, Format::Csv));
    run(&store);

    // c1 turns into somebody else
    let changed = parse(
        "id,firstname,lastname,email\nc1,Alan,Turing,alan@bletchley.uk\n",
        Format::Csv,
    );
    let report = ItemSyncService::new(Arc::clone(&store), &DupstackConfig::default().fields)
        .upsert_records(&workspace(), ItemType::Contacts, &changed)
        .unwrap();
    assert_eq!(report.invalidated, 1);
    assert_eq!(report.stacks_dissolved, 1);
    assert_eq!(stacks(store.as_ref(), ItemType::Contacts).len(), 1);

    let c2 = store
        .get_item_by_distant_id(&workspace(), ItemType::Contacts, "c2")
        .unwrap()
        .unwrap();
    assert!(!c2.dup_checked, "former stack member must be requeued");
    assert!(c2.similarity_checked);

    run(&store);
    let found = stacks(store.as_ref(), ItemType::Contacts);
    assert_eq!(found.len(), 1);
    assert_eq!(found.into_iter().next().unwrap().0, "c5");
}

#[test]
fn test_merged_record_leaves_its_stack() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    sync(&store, ItemType::Contacts, &parse(CONTACTS_CSV, Format::Csv));
    run(&store);

    let merged = parse(
        r#"{"distant_id": "c4", "value": {"firstname": "Mathias"}, "merged_in_distant_id": "c5"}"#,
        Format::Json,
    );
    sync(&store, ItemType::Contacts, &merged);

    assert!(
        store
            .get_item_by_distant_id(&workspace(), ItemType::Contacts, "c4")
            .unwrap()
            .is_none()
    );
    run(&store);

    let found = stacks(store.as_ref(), ItemType::Contacts);
    assert_eq!(found.len(), 1);
    assert_eq!(found.into_iter().next().unwrap().0, "c2");
}

#[test]
fn test_removed_records_cascade() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    sync(&store, ItemType::Contacts, &parse(CONTACTS_CSV, Format::Csv));
    run(&store);
    let edges_before = store.count_edges(&workspace()).unwrap();

    let report = ItemSyncService::new(Arc::clone(&store), &DupstackConfig::default().fields)
        .remove_records(&workspace(), ItemType::Contacts, &["c1".to_string()])
        .unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.stacks_dissolved, 1);
    assert!(store.count_edges(&workspace()).unwrap() < edges_before);

    run(&store);
    let found = stacks(store.as_ref(), ItemType::Contacts);
    assert_eq!(found.len(), 1, "c2 has no duplicate left");
}
