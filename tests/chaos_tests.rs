//! Chaos testing for concurrent pipeline runs.
//!
//! Tests concurrent operations to find race conditions and deadlocks:
//! - Many workspaces fanned out over the bounded worker pool
//! - The same workspace run from several threads at once
//! - Syncs racing pipeline runs on other workspaces

// Chaos tests use expect/unwrap/panic for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use dupstack::models::{IncomingRecord, ItemValue};
use dupstack::services::{DedupPipeline, ItemSyncService};
use dupstack::storage::{DedupStore, SqliteDedupStore};
use dupstack::{DupstackConfig, ItemType, WorkspaceId};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn contact(distant_id: &str, first: &str, last: &str, email: &str) -> IncomingRecord {
    let value: ItemValue = [("firstname", first), ("lastname", last), ("email", email)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect();
    IncomingRecord::new(distant_id, value)
}

/// Two duplicate contacts and one distinct contact.
fn seed<S: DedupStore + ?Sized>(store: &Arc<S>, workspace: &WorkspaceId) {
    ItemSyncService::new(Arc::clone(store), &DupstackConfig::default().fields)
        .upsert_records(
            workspace,
            ItemType::Contacts,
            &[
                contact("a", "Ada", "Lovelace", "ada@analytical.org"),
                contact("b", "Ada", "Lovelace", "ada@analytical.org"),
                contact("c", "Grace", "Hopper", "grace@navy.mil"),
            ],
        )
        .unwrap();
}

fn sqlite_store(dir: &TempDir) -> Arc<SqliteDedupStore> {
    Arc::new(SqliteDedupStore::new(dir.path().join("dupstack.db")).unwrap())
}

/// Test: more workspaces than workers all complete, each with its own stack.
#[test]
fn test_fan_out_over_bounded_workers() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    let workspaces: Vec<WorkspaceId> = (0..24).map(|i| WorkspaceId::new(format!("ws-{i}"))).collect();
    for ws in &workspaces {
        seed(&store, ws);
    }

    let mut config = DupstackConfig::default();
    config.pipeline.max_concurrent_workspaces = 4;
    let results = DedupPipeline::new(Arc::clone(&store), &config)
        .run_workspaces(&workspaces)
        .unwrap();

    assert_eq!(results.len(), workspaces.len());
    for ((ws, result), expected) in results.into_iter().zip(&workspaces) {
        assert_eq!(&ws, expected, "results come back in input order");
        let report = result.unwrap();
        assert_eq!(report.stacks_written, 1);
        assert_eq!(store.list_dup_stacks(&ws, None).unwrap().len(), 1);
    }
}

/// Test: racing runs of one workspace write its stack exactly once.
#[test]
fn test_same_workspace_runs_are_serialized() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    let ws = WorkspaceId::new("shared");
    seed(&store, &ws);

    let pipeline = Arc::new(DedupPipeline::new(
        Arc::clone(&store),
        &DupstackConfig::default(),
    ));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let ws = ws.clone();
            thread::spawn(move || pipeline.run_workspace(&ws).unwrap())
        })
        .collect();

    let written: u64 = handles
        .into_iter()
        .map(|h| h.join().unwrap().stacks_written)
        .sum();
    assert_eq!(written, 1);
    assert_eq!(store.list_dup_stacks(&ws, None).unwrap().len(), 1);
    assert!(store.count_edges(&ws).unwrap() > 0);
}

/// Test: syncing one workspace while others run does not corrupt either.
#[test]
fn test_sync_races_other_workspace_runs() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    let running: Vec<WorkspaceId> = (0..6).map(|i| WorkspaceId::new(format!("run-{i}"))).collect();
    for ws in &running {
        seed(&store, ws);
    }

    let pipeline = DedupPipeline::new(Arc::clone(&store), &DupstackConfig::default());
    let syncing = WorkspaceId::new("syncing");
    let results = thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for round in 0..10 {
                let id = format!("s{round}");
                ItemSyncService::new(Arc::clone(&store), &DupstackConfig::default().fields)
                    .upsert_records(
                        &syncing,
                        ItemType::Contacts,
                        &[contact(&id, "Alan", "Turing", "alan@bletchley.uk")],
                    )
                    .unwrap();
            }
        });
        let results = pipeline.run_workspaces(&running).unwrap();
        writer.join().unwrap();
        results
    });

    for (ws, result) in results {
        assert_eq!(result.unwrap().stacks_written, 1, "{ws}");
    }

    let report = pipeline.run_workspace(&syncing).unwrap();
    assert_eq!(report.stacks_written, 1);
    let stack = store.list_dup_stacks(&syncing, None).unwrap().remove(0);
    assert_eq!(stack.members.len(), 10);
}
