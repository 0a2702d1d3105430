//! # Dupstack
//!
//! Entity-resolution engine for records synced from an external CRM.
//!
//! Dupstack scores field-level similarity between contacts or companies,
//! combines those scores into a duplicate verdict, and clusters transitively
//! linked duplicates into reviewable dup stacks.
//!
//! ## Pipeline
//!
//! ```text
//! CRM records ──► ItemSyncService ──► SimilarityInstaller ──► DupStackResolver
//!                 (filled score,      (batched pairwise       (graph traversal,
//!                  flag resets)        similarity edges)       one stack per pass)
//! ```
//!
//! The installer persists similarity edges and flips `similarity_checked`;
//! the resolver consumes those edges, persists [`DupStack`]s and flips
//! `dup_checked`. Both steps are idempotent and safe to re-run after a crash.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dupstack::services::{DupStackResolver, SimilarityInstaller};
//! use dupstack::storage::InMemoryDedupStore;
//! use dupstack::{DupstackConfig, ItemType, WorkspaceId};
//! use std::sync::Arc;
//!
//! let config = DupstackConfig::default();
//! let store = Arc::new(InMemoryDedupStore::new());
//! let workspace = WorkspaceId::new("acme");
//!
//! SimilarityInstaller::new(Arc::clone(&store), &config)
//!     .install_similarities(&workspace, ItemType::Contacts)?;
//! let resolver = DupStackResolver::new(store, &config);
//! while resolver.resolve_next_dup_stack(&workspace)? {}
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cli;
pub mod config;
pub mod io;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::{DupstackConfig, FieldConfig, FieldConfigSet, IfDifferent, IfMatch, MatchingMethod};
pub use models::{
    DupStack, DupStackId, DupStackMember, DupType, FieldValue, Item, ItemId, ItemQuery, ItemType,
    SimilarityEdge, SimilarityScore, WorkspaceId, WorkspaceProgress,
};
pub use services::{
    DedupPipeline, DupStackResolver, DuplicateVerdict, ItemSyncService, SimilarityInstaller,
    classify, evaluate_similarity,
};
pub use storage::{DedupStore, InMemoryDedupStore, SqliteDedupStore};

/// Error type for dupstack operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed field configuration, items of mismatched types, unparseable import records |
/// | `OperationFailed` | `SQLite` or filesystem failures, poisoned locks |
/// | `InvariantViolation` | Comparing an item with itself, edges pointing at vanished items |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A field rule names an unknown matching method or tier
    /// - A field rule has no sources or a zero minimum length
    /// - Two items of different item types are compared
    /// - An import record has no external id
    ///
    /// Aborts only the comparison or record at hand; batch work continues.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A store or I/O operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail
    /// - The data directory or a log file cannot be created
    /// - A backend lock is poisoned
    ///
    /// Every write in the engine is idempotent, so the failing step can be retried.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An engine invariant was broken.
    ///
    /// Raised when:
    /// - `classify` or `evaluate_similarity` receives the same item twice
    /// - A similarity edge references an item that no longer exists
    /// - The reference item disappears during a resolution pass
    ///
    /// Fatal for the current step and surfaced to the caller.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Returns true if retrying the failed step may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::OperationFailed { .. })
    }

    pub(crate) fn store(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for dupstack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
