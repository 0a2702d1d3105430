//! Store trait for dedup state.
//!
//! The store holds items, similarity edges, dup stacks and progress
//! counters. Services never cache store state across calls; every decision
//! is recomputed from what the store returns.
//!
//! # Available Implementations
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | `SqliteDedupStore` | Default; embedded, durable |
//! | `InMemoryDedupStore` | Testing |
//!
//! # Guarantees
//!
//! | Operation | Guarantee |
//! |-----------|-----------|
//! | `upsert_items` | Keeps `sequence` and `created_at` of existing items; assigns the next sequence to new ones |
//! | `upsert_edges` | At most one edge per unordered pair and field; re-upserting is a no-op |
//! | `upsert_dup_stack` | Stack and members written atomically |
//! | `delete_items` | Cascades to the items' edges and stack memberships |
//! | `save_progress` | Counters never decrease |

use crate::Result;
use crate::models::{
    DupStack, DupStackId, Item, ItemFlagsUpdate, ItemId, ItemQuery, ItemType, SimilarityEdge,
    WorkspaceId, WorkspaceProgress,
};

/// Trait for dedup state backends.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn DedupStore>`
/// - Use interior mutability (e.g., `Mutex<Connection>`) for mutable state
/// - Store edges in canonical orientation (`item_a_id < item_b_id`)
/// - Every write must be idempotent; callers retry failed steps wholesale
pub trait DedupStore: Send + Sync {
    // ========================================================================
    // Items
    // ========================================================================

    /// Inserts or updates items by ID and returns them as stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or a `distant_id` is already used
    /// by another unmerged item of the same workspace and type.
    fn upsert_items(&self, items: &[Item]) -> Result<Vec<Item>>;

    /// Returns the items with the given IDs; unknown IDs are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>>;

    /// Returns the unmerged item with the given external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_item_by_distant_id(
        &self,
        workspace_id: &WorkspaceId,
        item_type: ItemType,
        distant_id: &str,
    ) -> Result<Option<Item>>;

    /// Returns the items matching a query, in the query's order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn fetch_items(&self, query: &ItemQuery) -> Result<Vec<Item>>;

    /// Counts the items matching a query, ignoring paging.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn count_items(&self, query: &ItemQuery) -> Result<u64>;

    /// Updates the progress flags of the given items and returns how many
    /// items exist among `ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn update_item_flags(&self, ids: &[ItemId], update: ItemFlagsUpdate) -> Result<usize>;

    /// Deletes items with their edges and stack memberships.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete_items(&self, ids: &[ItemId]) -> Result<usize>;

    /// Lists the workspaces holding at least one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn list_workspaces(&self) -> Result<Vec<WorkspaceId>>;

    // ========================================================================
    // Similarity edges
    // ========================================================================

    /// Returns every edge with `id` as an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn fetch_edges_for_item(&self, id: &ItemId) -> Result<Vec<SimilarityEdge>>;

    /// Returns every edge touching any of `ids`, without duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn fetch_edges_for_items(&self, ids: &[ItemId]) -> Result<Vec<SimilarityEdge>> {
        let mut seen = std::collections::HashSet::new();
        let mut edges = Vec::new();
        for id in ids {
            for edge in self.fetch_edges_for_item(id)? {
                if seen.insert(edge.slot()) {
                    edges.push(edge);
                }
            }
        }
        Ok(edges)
    }

    /// Inserts edges, replacing any edge in the same pair-and-field slot.
    ///
    /// Returns the number of edges written.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_edges(&self, edges: &[SimilarityEdge]) -> Result<usize>;

    /// Deletes every edge touching any of `ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete_edges_for_items(&self, ids: &[ItemId]) -> Result<usize>;

    /// Returns unmerged items of a type that have no edge at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn items_without_edges(
        &self,
        workspace_id: &WorkspaceId,
        item_type: ItemType,
    ) -> Result<Vec<ItemId>>;

    /// Counts the edges whose endpoints belong to a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn count_edges(&self, workspace_id: &WorkspaceId) -> Result<u64>;

    // ========================================================================
    // Dup stacks
    // ========================================================================

    /// Writes a stack and its members, replacing a stack with the same ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] for a malformed stack and
    /// an error if the write fails.
    fn upsert_dup_stack(&self, stack: &DupStack) -> Result<()>;

    /// Deletes stacks with their members.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete_dup_stacks(&self, ids: &[DupStackId]) -> Result<usize>;

    /// Returns every stack with a member among `ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn stacks_for_items(&self, ids: &[ItemId]) -> Result<Vec<DupStack>>;

    /// Lists the stacks of a workspace, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn list_dup_stacks(
        &self,
        workspace_id: &WorkspaceId,
        item_type: Option<ItemType>,
    ) -> Result<Vec<DupStack>>;

    // ========================================================================
    // Progress
    // ========================================================================

    /// Returns the progress counters of a workspace (zero if never saved).
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_progress(&self, workspace_id: &WorkspaceId) -> Result<WorkspaceProgress>;

    /// Saves progress counters, keeping the larger of stored and new values.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn save_progress(&self, progress: &WorkspaceProgress) -> Result<()>;

    /// Zeroes the progress counters of a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn reset_progress(&self, workspace_id: &WorkspaceId) -> Result<()>;
}
