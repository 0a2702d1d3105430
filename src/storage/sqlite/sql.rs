//! SQL helper functions for `SQLite` backends.
//!
//! Numbered placeholder lists and the item filter clause shared by the
//! item queries.

use crate::models::{ItemOrder, ItemQuery};
use rusqlite::ToSql;

/// Maximum number of ids bound into one `IN (...)` list.
///
/// Stays well below `SQLITE_MAX_VARIABLE_NUMBER` even when a statement
/// binds the list twice.
pub const MAX_IN_LIST: usize = 400;

/// Builds a comma-separated list of numbered placeholders.
///
/// # Examples
///
/// ```
/// use dupstack::storage::sqlite::numbered_placeholders;
///
/// assert_eq!(numbered_placeholders(3, 2), "?3, ?4");
/// assert_eq!(numbered_placeholders(1, 0), "");
/// ```
#[must_use]
pub fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds the `WHERE` clause and parameters for an item query.
///
/// Parameters are numbered from `?1`; the clause is never empty since the
/// workspace is always constrained.
#[must_use]
pub fn build_item_filter_clause(query: &ItemQuery) -> (String, Vec<Box<dyn ToSql>>) {
    let mut conditions = vec!["workspace_id = ?1".to_string()];
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(query.workspace_id.as_str().to_string())];

    if let Some(item_type) = query.item_type {
        params.push(Box::new(item_type.as_str()));
        conditions.push(format!("item_type = ?{}", params.len()));
    }

    if let Some(checked) = query.similarity_checked {
        params.push(Box::new(checked));
        conditions.push(format!("similarity_checked = ?{}", params.len()));
    }

    if let Some(checked) = query.dup_checked {
        params.push(Box::new(checked));
        conditions.push(format!("dup_checked = ?{}", params.len()));
    }

    if !query.include_merged {
        conditions.push("merged_in_distant_id IS NULL".to_string());
    }

    (format!("WHERE {}", conditions.join(" AND ")), params)
}

/// Returns the `ORDER BY` clause for an item order.
#[must_use]
pub const fn item_order_clause(order: ItemOrder) -> &'static str {
    match order {
        ItemOrder::Sequence => "ORDER BY sequence ASC, id ASC",
        ItemOrder::FilledScoreDesc => "ORDER BY filled_score DESC, sequence ASC, id ASC",
    }
}
