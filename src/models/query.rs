//! Item query and flag update types.

use super::{Item, ItemId, ItemType, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Sort order for item queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrder {
    /// Insertion order.
    #[default]
    Sequence,
    /// Most complete first (`filled_score` desc, then sequence, then id).
    FilledScoreDesc,
}

/// Filter for fetching items from a store.
///
/// Every `None` criterion matches all items. Merged items are excluded
/// unless `include_merged` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuery {
    /// Workspace to search.
    pub workspace_id: WorkspaceId,
    /// Restrict to one item type.
    pub item_type: Option<ItemType>,
    /// Restrict on the `similarity_checked` flag.
    pub similarity_checked: Option<bool>,
    /// Restrict on the `dup_checked` flag.
    pub dup_checked: Option<bool>,
    /// Include items merged away in the CRM.
    pub include_merged: bool,
    /// Result order.
    pub order: ItemOrder,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub offset: usize,
}

impl ItemQuery {
    /// Creates a query matching every unmerged item of a workspace.
    #[must_use]
    pub const fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            item_type: None,
            similarity_checked: None,
            dup_checked: None,
            include_merged: false,
            order: ItemOrder::Sequence,
            limit: None,
            offset: 0,
        }
    }

    /// Restricts to one item type.
    #[must_use]
    pub const fn with_item_type(mut self, item_type: ItemType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    /// Restricts on the `similarity_checked` flag.
    #[must_use]
    pub const fn with_similarity_checked(mut self, checked: bool) -> Self {
        self.similarity_checked = Some(checked);
        self
    }

    /// Restricts on the `dup_checked` flag.
    #[must_use]
    pub const fn with_dup_checked(mut self, checked: bool) -> Self {
        self.dup_checked = Some(checked);
        self
    }

    /// Includes merged items.
    #[must_use]
    pub const fn including_merged(mut self) -> Self {
        self.include_merged = true;
        self
    }

    /// Sets the result order.
    #[must_use]
    pub const fn ordered_by(mut self, order: ItemOrder) -> Self {
        self.order = order;
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of results to skip.
    #[must_use]
    pub const fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Returns true if `item` satisfies every criterion except paging.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        item.workspace_id == self.workspace_id
            && self.item_type.is_none_or(|t| item.item_type == t)
            && self
                .similarity_checked
                .is_none_or(|c| item.similarity_checked == c)
            && self.dup_checked.is_none_or(|c| item.dup_checked == c)
            && (self.include_merged || !item.is_merged())
    }
}

/// Partial update of the two progress flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemFlagsUpdate {
    /// New `similarity_checked` value, if changing.
    pub similarity_checked: Option<bool>,
    /// New `dup_checked` value, if changing.
    pub dup_checked: Option<bool>,
}

impl ItemFlagsUpdate {
    /// Sets `similarity_checked`.
    #[must_use]
    pub const fn similarity_checked(checked: bool) -> Self {
        Self {
            similarity_checked: Some(checked),
            dup_checked: None,
        }
    }

    /// Sets `dup_checked`.
    #[must_use]
    pub const fn dup_checked(checked: bool) -> Self {
        Self {
            similarity_checked: None,
            dup_checked: Some(checked),
        }
    }

    /// Clears both flags so the item re-enters the pipeline.
    #[must_use]
    pub const fn reset() -> Self {
        Self {
            similarity_checked: Some(false),
            dup_checked: Some(false),
        }
    }

    /// Applies the update to an item.
    pub const fn apply(&self, item: &mut Item) {
        if let Some(checked) = self.similarity_checked {
            item.similarity_checked = checked;
        }
        if let Some(checked) = self.dup_checked {
            item.dup_checked = checked;
        }
    }

    /// Returns true if the update changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.similarity_checked.is_none() && self.dup_checked.is_none()
    }
}

/// Sorts items in place according to `order`.
pub fn sort_items(items: &mut [Item], order: ItemOrder) {
    match order {
        ItemOrder::Sequence => {
            items.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)));
        },
        ItemOrder::FilledScoreDesc => items.sort_by(Item::completeness_cmp),
    }
}

/// Collects the IDs of a slice of items.
#[must_use]
pub fn item_ids(items: &[Item]) -> Vec<ItemId> {
    items.iter().map(|i| i.id.clone()).collect()
}
