//! Data models for dupstack.
//!
//! Items synced from the CRM, the similarity edges computed between them,
//! the dup stacks built from those edges, and per-workspace progress.

mod dup_stack;
mod item;
mod progress;
mod query;
mod record;
mod similarity;

pub use dup_stack::{DupStack, DupStackId, DupStackMember, DupType};
pub use item::{FieldValue, Item, ItemId, ItemType, ItemValue, WorkspaceId};
pub use progress::WorkspaceProgress;
pub use query::{ItemFlagsUpdate, ItemOrder, ItemQuery, item_ids, sort_items};
pub use record::IncomingRecord;
pub use similarity::{SimilarityEdge, SimilarityScore};
