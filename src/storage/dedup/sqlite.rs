//! `SQLite` dedup store.
//!
//! Persists items, similarity edges, dup stacks and workspace progress in a
//! single database file. Edges and stack memberships reference items with
//! `ON DELETE CASCADE`, so deleting an item cleans up after it.

// SQLite returns i64; sequences, timestamps and counters are non-negative.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::models::{
    DupStack, DupStackId, DupStackMember, DupType, Item, ItemFlagsUpdate, ItemId, ItemQuery,
    ItemType, SimilarityEdge, SimilarityScore, WorkspaceId, WorkspaceProgress,
};
use crate::storage::sqlite::{
    MAX_IN_LIST, acquire_lock, build_item_filter_clause, item_order_clause, numbered_placeholders,
    open_connection, open_in_memory, record_operation_metrics, sqlite_error,
};
use crate::storage::traits::DedupStore;
use crate::{Error, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

const ITEM_COLUMNS: &str = "id, workspace_id, item_type, distant_id, value, filled_score, \
     similarity_checked, dup_checked, merged_in_distant_id, sequence, created_at, updated_at";

const EDGE_COLUMNS: &str = "item_a_id, item_b_id, field_id, value_a, value_b, score";

/// `SQLite`-based dedup store.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` for thread-safe access. Multi-row writes run
/// in a transaction, so a failed call leaves nothing behind.
///
/// # Schema
///
/// - `items`: synced records; `(workspace_id, item_type, distant_id)` is
///   unique among unmerged rows
/// - `similarity_edges`: one row per unordered pair and field, stored with
///   `item_a_id < item_b_id`
/// - `dup_stacks` / `dup_stack_members`: clusters and their ordered members
/// - `workspace_progress`: monotonic counters
#[derive(Debug)]
pub struct SqliteDedupStore {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteDedupStore {
    /// Opens or creates a store at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(&db_path)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };

        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(open_in_memory()?),
            db_path: None,
        };

        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Initializes the database schema.
    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                item_type TEXT NOT NULL,
                distant_id TEXT NOT NULL,
                value TEXT NOT NULL,
                filled_score INTEGER NOT NULL DEFAULT 0,
                similarity_checked INTEGER NOT NULL DEFAULT 0,
                dup_checked INTEGER NOT NULL DEFAULT 0,
                merged_in_distant_id TEXT,
                sequence INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS similarity_edges (
                item_a_id TEXT NOT NULL,
                item_b_id TEXT NOT NULL,
                field_id TEXT NOT NULL,
                value_a TEXT NOT NULL,
                value_b TEXT NOT NULL,
                score TEXT NOT NULL,
                PRIMARY KEY (item_a_id, item_b_id, field_id),
                FOREIGN KEY (item_a_id) REFERENCES items(id) ON DELETE CASCADE,
                FOREIGN KEY (item_b_id) REFERENCES items(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS dup_stacks (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                item_type TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dup_stack_members (
                stack_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                dup_type TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (stack_id, item_id),
                FOREIGN KEY (stack_id) REFERENCES dup_stacks(id) ON DELETE CASCADE,
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS workspace_progress (
                workspace_id TEXT PRIMARY KEY,
                batches_total INTEGER NOT NULL DEFAULT 0,
                batches_done INTEGER NOT NULL DEFAULT 0,
                dup_total INTEGER NOT NULL DEFAULT 0,
                dup_done INTEGER NOT NULL DEFAULT 0
            );",
        )
        .map_err(sqlite_error("create_dedup_tables"))?;

        Self::create_indexes(&conn)
    }

    /// Creates indexes for the resolver and installer access paths.
    fn create_indexes(conn: &Connection) -> Result<()> {
        // The distant id index backs a data invariant, so its failure is fatal
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_items_distant_id
                ON items(workspace_id, item_type, distant_id)
                WHERE merged_in_distant_id IS NULL",
            [],
        )
        .map_err(sqlite_error("create_distant_id_index"))?;

        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_pending
                ON items(workspace_id, item_type, similarity_checked, dup_checked)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_completeness
                ON items(workspace_id, filled_score DESC, sequence)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_edges_item_b ON similarity_edges(item_b_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_members_item ON dup_stack_members(item_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_stacks_workspace ON dup_stacks(workspace_id, created_at)",
            [],
        );

        Ok(())
    }

    /// Parses an item from a row selected with [`ITEM_COLUMNS`].
    fn parse_item_row(row: &Row<'_>) -> rusqlite::Result<Item> {
        let item_type: String = row.get(2)?;
        let value: String = row.get(4)?;

        Ok(Item {
            id: ItemId::new(row.get::<_, String>(0)?),
            workspace_id: WorkspaceId::new(row.get::<_, String>(1)?),
            item_type: ItemType::parse(&item_type)
                .ok_or_else(|| conversion_error(2, format!("unknown item type '{item_type}'")))?,
            distant_id: row.get(3)?,
            value: serde_json::from_str(&value).map_err(|e| conversion_error(4, e.to_string()))?,
            filled_score: row.get(5)?,
            similarity_checked: row.get(6)?,
            dup_checked: row.get(7)?,
            merged_in_distant_id: row.get(8)?,
            sequence: row.get::<_, i64>(9)? as u64,
            created_at: row.get::<_, i64>(10)? as u64,
            updated_at: row.get::<_, i64>(11)? as u64,
        })
    }

    /// Parses an edge from a row selected with [`EDGE_COLUMNS`].
    fn parse_edge_row(row: &Row<'_>) -> rusqlite::Result<SimilarityEdge> {
        let score: String = row.get(5)?;

        Ok(SimilarityEdge {
            item_a_id: ItemId::new(row.get::<_, String>(0)?),
            item_b_id: ItemId::new(row.get::<_, String>(1)?),
            field_id: row.get(2)?,
            value_a: row.get(3)?,
            value_b: row.get(4)?,
            score: SimilarityScore::parse(&score)
                .ok_or_else(|| conversion_error(5, format!("unknown score '{score}'")))?,
        })
    }

    fn query_items(
        conn: &Connection,
        operation: &'static str,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<Item>> {
        let mut stmt = conn.prepare(sql).map_err(sqlite_error(operation))?;
        stmt.query_map(params, Self::parse_item_row)
            .map_err(sqlite_error(operation))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sqlite_error(operation))
    }

    fn load_stack(conn: &Connection, id: &str) -> Result<Option<DupStack>> {
        let header = conn
            .query_row(
                "SELECT workspace_id, item_type, created_at FROM dup_stacks WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(sqlite_error("load_dup_stack"))?;

        let Some((workspace_id, item_type, created_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT item_id, dup_type FROM dup_stack_members
                 WHERE stack_id = ?1 ORDER BY position",
            )
            .map_err(sqlite_error("load_dup_stack_members"))?;
        let members = stmt
            .query_map(params![id], |row| {
                let dup_type: String = row.get(1)?;
                Ok(DupStackMember {
                    item_id: ItemId::new(row.get::<_, String>(0)?),
                    dup_type: DupType::parse(&dup_type).ok_or_else(|| {
                        conversion_error(1, format!("unknown dup type '{dup_type}'"))
                    })?,
                })
            })
            .map_err(sqlite_error("load_dup_stack_members"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sqlite_error("load_dup_stack_members"))?;

        let item_type = ItemType::parse(&item_type).ok_or_else(|| {
            Error::InvariantViolation(format!("stack {id} has unknown item type '{item_type}'"))
        })?;

        Ok(Some(DupStack {
            id: DupStackId::new(id),
            workspace_id: WorkspaceId::new(workspace_id),
            item_type,
            members,
            created_at: created_at as u64,
        }))
    }

    fn load_stacks<'a>(
        conn: &Connection,
        ids: impl IntoIterator<Item = &'a String>,
    ) -> Result<Vec<DupStack>> {
        let mut stacks = Vec::new();
        for id in ids {
            if let Some(stack) = Self::load_stack(conn, id)? {
                stacks.push(stack);
            }
        }
        Ok(stacks)
    }

    fn write_items(&self, items: &[Item]) -> Result<Vec<Item>> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(sqlite_error("upsert_items_begin"))?;
        let mut stored = Vec::with_capacity(items.len());

        for item in items {
            let mut item = item.clone();

            if !item.is_merged() {
                let taken: Option<String> = tx
                    .query_row(
                        "SELECT id FROM items
                         WHERE workspace_id = ?1 AND item_type = ?2 AND distant_id = ?3
                           AND merged_in_distant_id IS NULL AND id != ?4",
                        params![
                            item.workspace_id.as_str(),
                            item.item_type.as_str(),
                            item.distant_id,
                            item.id.as_str()
                        ],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(sqlite_error("upsert_items_check_distant_id"))?;
                if taken.is_some() {
                    return Err(Error::InvalidInput(format!(
                        "distant id {} already used in workspace {}",
                        item.distant_id, item.workspace_id
                    )));
                }
            }

            let existing: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT sequence, created_at FROM items WHERE id = ?1",
                    params![item.id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(sqlite_error("upsert_items_lookup"))?;

            if let Some((sequence, created_at)) = existing {
                item.sequence = sequence as u64;
                item.created_at = created_at as u64;
            } else {
                let next: i64 = tx
                    .query_row("SELECT COALESCE(MAX(sequence), 0) + 1 FROM items", [], |row| {
                        row.get(0)
                    })
                    .map_err(sqlite_error("upsert_items_sequence"))?;
                item.sequence = next as u64;
            }

            let value = serde_json::to_string(&item.value)
                .map_err(|e| Error::store("serialize_item_value", e))?;

            tx.execute(
                "INSERT INTO items (id, workspace_id, item_type, distant_id, value, filled_score,
                    similarity_checked, dup_checked, merged_in_distant_id, sequence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    workspace_id = excluded.workspace_id,
                    item_type = excluded.item_type,
                    distant_id = excluded.distant_id,
                    value = excluded.value,
                    filled_score = excluded.filled_score,
                    similarity_checked = excluded.similarity_checked,
                    dup_checked = excluded.dup_checked,
                    merged_in_distant_id = excluded.merged_in_distant_id,
                    updated_at = excluded.updated_at",
                params![
                    item.id.as_str(),
                    item.workspace_id.as_str(),
                    item.item_type.as_str(),
                    item.distant_id,
                    value,
                    item.filled_score,
                    item.similarity_checked,
                    item.dup_checked,
                    item.merged_in_distant_id,
                    item.sequence as i64,
                    item.created_at as i64,
                    item.updated_at as i64,
                ],
            )
            .map_err(sqlite_error("upsert_items"))?;

            stored.push(item);
        }

        tx.commit().map_err(sqlite_error("upsert_items_commit"))?;
        metrics::counter!("items_upserted_total").increment(stored.len() as u64);
        Ok(stored)
    }

    fn write_edges(&self, edges: &[SimilarityEdge]) -> Result<usize> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(sqlite_error("upsert_edges_begin"))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO similarity_edges (item_a_id, item_b_id, field_id, value_a, value_b, score)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(item_a_id, item_b_id, field_id) DO UPDATE SET
                        value_a = excluded.value_a,
                        value_b = excluded.value_b,
                        score = excluded.score",
                )
                .map_err(sqlite_error("upsert_edges_prepare"))?;

            for edge in edges {
                let edge = edge.clone().canonical();
                stmt.execute(params![
                    edge.item_a_id.as_str(),
                    edge.item_b_id.as_str(),
                    edge.field_id,
                    edge.value_a,
                    edge.value_b,
                    edge.score.as_str(),
                ])
                .map_err(sqlite_error("upsert_edges"))?;
            }
        }

        tx.commit().map_err(sqlite_error("upsert_edges_commit"))?;
        Ok(edges.len())
    }

    fn write_dup_stack(&self, stack: &DupStack) -> Result<()> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(sqlite_error("upsert_dup_stack_begin"))?;

        tx.execute(
            "INSERT INTO dup_stacks (id, workspace_id, item_type, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                workspace_id = excluded.workspace_id,
                item_type = excluded.item_type",
            params![
                stack.id.as_str(),
                stack.workspace_id.as_str(),
                stack.item_type.as_str(),
                stack.created_at as i64,
            ],
        )
        .map_err(sqlite_error("upsert_dup_stack"))?;

        tx.execute(
            "DELETE FROM dup_stack_members WHERE stack_id = ?1",
            params![stack.id.as_str()],
        )
        .map_err(sqlite_error("upsert_dup_stack_clear_members"))?;

        for (position, member) in stack.members.iter().enumerate() {
            tx.execute(
                "INSERT INTO dup_stack_members (stack_id, item_id, dup_type, position)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    stack.id.as_str(),
                    member.item_id.as_str(),
                    member.dup_type.as_str(),
                    position as i64,
                ],
            )
            .map_err(sqlite_error("upsert_dup_stack_member"))?;
        }

        tx.commit().map_err(sqlite_error("upsert_dup_stack_commit"))
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(Error::InvalidInput(message)),
    )
}

fn id_params<'a>(ids: &'a [&'a str]) -> Vec<&'a dyn ToSql> {
    ids.iter().map(|id| id as &dyn ToSql).collect()
}

impl DedupStore for SqliteDedupStore {
    #[instrument(skip(self, items), fields(count = items.len()))]
    fn upsert_items(&self, items: &[Item]) -> Result<Vec<Item>> {
        let start = Instant::now();
        let result = self.write_items(items);
        record_operation_metrics("sqlite", "upsert_items", start, &result);
        result
    }

    fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        let conn = acquire_lock(&self.conn);
        let mut found = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_IN_LIST) {
            let raw: Vec<&str> = chunk.iter().map(ItemId::as_str).collect();
            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE id IN ({})",
                numbered_placeholders(1, raw.len())
            );
            for item in Self::query_items(&conn, "get_items", &sql, &id_params(&raw))? {
                found.insert(item.id.clone(), item);
            }
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    fn get_item_by_distant_id(
        &self,
        workspace_id: &WorkspaceId,
        item_type: ItemType,
        distant_id: &str,
    ) -> Result<Option<Item>> {
        let conn = acquire_lock(&self.conn);
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE workspace_id = ?1 AND item_type = ?2 AND distant_id = ?3
               AND merged_in_distant_id IS NULL"
        );
        conn.query_row(
            &sql,
            params![workspace_id.as_str(), item_type.as_str(), distant_id],
            Self::parse_item_row,
        )
        .optional()
        .map_err(sqlite_error("get_item_by_distant_id"))
    }

    fn fetch_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        let start = Instant::now();
        let conn = acquire_lock(&self.conn);

        let (where_clause, params) = build_item_filter_clause(query);
        let limit = query.limit.map_or(-1, |l| l as i64);
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items {where_clause} {} LIMIT {limit} OFFSET {}",
            item_order_clause(query.order),
            query.offset
        );
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let result = Self::query_items(&conn, "fetch_items", &sql, &param_refs);
        record_operation_metrics("sqlite", "fetch_items", start, &result);
        result
    }

    fn count_items(&self, query: &ItemQuery) -> Result<u64> {
        let conn = acquire_lock(&self.conn);

        let (where_clause, params) = build_item_filter_clause(query);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM items {where_clause}"),
                param_refs.as_slice(),
                |row| row.get(0),
            )
            .map_err(sqlite_error("count_items"))?;

        Ok(count as u64)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    fn update_item_flags(&self, ids: &[ItemId], update: ItemFlagsUpdate) -> Result<usize> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(sqlite_error("update_item_flags_begin"))?;
        let now = crate::current_timestamp() as i64;
        let mut updated = 0;

        for chunk in ids.chunks(MAX_IN_LIST) {
            let raw: Vec<&str> = chunk.iter().map(ItemId::as_str).collect();
            let sql = format!(
                "UPDATE items SET
                    similarity_checked = COALESCE(?1, similarity_checked),
                    dup_checked = COALESCE(?2, dup_checked),
                    updated_at = ?3
                 WHERE id IN ({})",
                numbered_placeholders(4, raw.len())
            );
            let mut params: Vec<&dyn ToSql> =
                vec![&update.similarity_checked, &update.dup_checked, &now];
            params.extend(id_params(&raw));
            updated += tx
                .execute(&sql, params.as_slice())
                .map_err(sqlite_error("update_item_flags"))?;
        }

        tx.commit()
            .map_err(sqlite_error("update_item_flags_commit"))?;
        Ok(updated)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    fn delete_items(&self, ids: &[ItemId]) -> Result<usize> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(sqlite_error("delete_items_begin"))?;
        let mut deleted = 0;

        // Foreign key cascades handle edges and memberships
        for chunk in ids.chunks(MAX_IN_LIST) {
            let raw: Vec<&str> = chunk.iter().map(ItemId::as_str).collect();
            let sql = format!(
                "DELETE FROM items WHERE id IN ({})",
                numbered_placeholders(1, raw.len())
            );
            deleted += tx
                .execute(&sql, id_params(&raw).as_slice())
                .map_err(sqlite_error("delete_items"))?;
        }

        tx.execute(
            "DELETE FROM dup_stacks WHERE NOT EXISTS (
                SELECT 1 FROM dup_stack_members m WHERE m.stack_id = dup_stacks.id
            )",
            [],
        )
        .map_err(sqlite_error("delete_empty_dup_stacks"))?;

        tx.commit().map_err(sqlite_error("delete_items_commit"))?;
        metrics::counter!("items_deleted_total").increment(deleted as u64);
        Ok(deleted)
    }

    fn list_workspaces(&self) -> Result<Vec<WorkspaceId>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare("SELECT DISTINCT workspace_id FROM items ORDER BY workspace_id")
            .map_err(sqlite_error("list_workspaces"))?;
        stmt.query_map([], |row| Ok(WorkspaceId::new(row.get::<_, String>(0)?)))
            .map_err(sqlite_error("list_workspaces"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sqlite_error("list_workspaces"))
    }

    fn fetch_edges_for_item(&self, id: &ItemId) -> Result<Vec<SimilarityEdge>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EDGE_COLUMNS} FROM similarity_edges
                 WHERE item_a_id = ?1 OR item_b_id = ?1
                 ORDER BY item_a_id, item_b_id, field_id"
            ))
            .map_err(sqlite_error("fetch_edges_for_item"))?;
        stmt.query_map(params![id.as_str()], Self::parse_edge_row)
            .map_err(sqlite_error("fetch_edges_for_item"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sqlite_error("fetch_edges_for_item"))
    }

    #[instrument(skip(self, edges), fields(count = edges.len()))]
    fn upsert_edges(&self, edges: &[SimilarityEdge]) -> Result<usize> {
        let start = Instant::now();
        let result = self.write_edges(edges);
        record_operation_metrics("sqlite", "upsert_edges", start, &result);
        result
    }

    fn delete_edges_for_items(&self, ids: &[ItemId]) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        let mut deleted = 0;

        for chunk in ids.chunks(MAX_IN_LIST) {
            let raw: Vec<&str> = chunk.iter().map(ItemId::as_str).collect();
            let placeholders = numbered_placeholders(1, raw.len());
            let sql = format!(
                "DELETE FROM similarity_edges
                 WHERE item_a_id IN ({placeholders}) OR item_b_id IN ({placeholders})"
            );
            deleted += conn
                .execute(&sql, id_params(&raw).as_slice())
                .map_err(sqlite_error("delete_edges_for_items"))?;
        }

        Ok(deleted)
    }

    fn items_without_edges(
        &self,
        workspace_id: &WorkspaceId,
        item_type: ItemType,
    ) -> Result<Vec<ItemId>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id FROM items
                 WHERE workspace_id = ?1 AND item_type = ?2 AND merged_in_distant_id IS NULL
                   AND NOT EXISTS (SELECT 1 FROM similarity_edges WHERE item_a_id = items.id)
                   AND NOT EXISTS (SELECT 1 FROM similarity_edges WHERE item_b_id = items.id)
                 ORDER BY sequence",
            )
            .map_err(sqlite_error("items_without_edges"))?;
        stmt.query_map(params![workspace_id.as_str(), item_type.as_str()], |row| {
            Ok(ItemId::new(row.get::<_, String>(0)?))
        })
        .map_err(sqlite_error("items_without_edges"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sqlite_error("items_without_edges"))
    }

    fn count_edges(&self, workspace_id: &WorkspaceId) -> Result<u64> {
        let conn = acquire_lock(&self.conn);
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM similarity_edges e
                 JOIN items i ON i.id = e.item_a_id
                 WHERE i.workspace_id = ?1",
                params![workspace_id.as_str()],
                |row| row.get(0),
            )
            .map_err(sqlite_error("count_edges"))?;
        Ok(count as u64)
    }

    #[instrument(skip(self, stack), fields(stack_id = %stack.id, members = stack.members.len()))]
    fn upsert_dup_stack(&self, stack: &DupStack) -> Result<()> {
        stack.validate()?;
        let start = Instant::now();
        let result = self.write_dup_stack(stack);
        record_operation_metrics("sqlite", "upsert_dup_stack", start, &result);
        result
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    fn delete_dup_stacks(&self, ids: &[DupStackId]) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        let mut deleted = 0;

        for chunk in ids.chunks(MAX_IN_LIST) {
            let raw: Vec<&str> = chunk.iter().map(DupStackId::as_str).collect();
            let sql = format!(
                "DELETE FROM dup_stacks WHERE id IN ({})",
                numbered_placeholders(1, raw.len())
            );
            deleted += conn
                .execute(&sql, id_params(&raw).as_slice())
                .map_err(sqlite_error("delete_dup_stacks"))?;
        }

        Ok(deleted)
    }

    fn stacks_for_items(&self, ids: &[ItemId]) -> Result<Vec<DupStack>> {
        let conn = acquire_lock(&self.conn);
        let mut stack_ids = BTreeSet::new();

        for chunk in ids.chunks(MAX_IN_LIST) {
            let raw: Vec<&str> = chunk.iter().map(ItemId::as_str).collect();
            let sql = format!(
                "SELECT DISTINCT stack_id FROM dup_stack_members WHERE item_id IN ({})",
                numbered_placeholders(1, raw.len())
            );
            let mut stmt = conn.prepare(&sql).map_err(sqlite_error("stacks_for_items"))?;
            let found = stmt
                .query_map(id_params(&raw).as_slice(), |row| row.get::<_, String>(0))
                .map_err(sqlite_error("stacks_for_items"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sqlite_error("stacks_for_items"))?;
            stack_ids.extend(found);
        }

        Self::load_stacks(&conn, &stack_ids)
    }

    fn list_dup_stacks(
        &self,
        workspace_id: &WorkspaceId,
        item_type: Option<ItemType>,
    ) -> Result<Vec<DupStack>> {
        let conn = acquire_lock(&self.conn);
        let ids = {
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM dup_stacks
                     WHERE workspace_id = ?1 AND (?2 IS NULL OR item_type = ?2)
                     ORDER BY created_at, id",
                )
                .map_err(sqlite_error("list_dup_stacks"))?;
            stmt.query_map(
                params![workspace_id.as_str(), item_type.map(|t| t.as_str())],
                |row| row.get::<_, String>(0),
            )
            .map_err(sqlite_error("list_dup_stacks"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sqlite_error("list_dup_stacks"))?
        };

        Self::load_stacks(&conn, &ids)
    }

    fn get_progress(&self, workspace_id: &WorkspaceId) -> Result<WorkspaceProgress> {
        let conn = acquire_lock(&self.conn);
        let progress = conn
            .query_row(
                "SELECT batches_total, batches_done, dup_total, dup_done
                 FROM workspace_progress WHERE workspace_id = ?1",
                params![workspace_id.as_str()],
                |row| {
                    Ok(WorkspaceProgress {
                        workspace_id: workspace_id.clone(),
                        batches_total: row.get::<_, i64>(0)? as u64,
                        batches_done: row.get::<_, i64>(1)? as u64,
                        dup_total: row.get::<_, i64>(2)? as u64,
                        dup_done: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()
            .map_err(sqlite_error("get_progress"))?;

        Ok(progress.unwrap_or_else(|| WorkspaceProgress::new(workspace_id.clone())))
    }

    fn save_progress(&self, progress: &WorkspaceProgress) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO workspace_progress (workspace_id, batches_total, batches_done, dup_total, dup_done)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(workspace_id) DO UPDATE SET
                batches_total = MAX(batches_total, excluded.batches_total),
                batches_done = MAX(batches_done, excluded.batches_done),
                dup_total = MAX(dup_total, excluded.dup_total),
                dup_done = MAX(dup_done, excluded.dup_done)",
            params![
                progress.workspace_id.as_str(),
                progress.batches_total as i64,
                progress.batches_done as i64,
                progress.dup_total as i64,
                progress.dup_done as i64,
            ],
        )
        .map_err(sqlite_error("save_progress"))?;
        Ok(())
    }

    fn reset_progress(&self, workspace_id: &WorkspaceId) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "DELETE FROM workspace_progress WHERE workspace_id = ?1",
            params![workspace_id.as_str()],
        )
        .map_err(sqlite_error("reset_progress"))?;
        Ok(())
    }
}
