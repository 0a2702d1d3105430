//! Dedup store backends.
//!
//! | Backend | Persistence | Use Case |
//! |---------|-------------|----------|
//! | [`SqliteDedupStore`] | Database file | CLI and long-running workers |
//! | [`InMemoryDedupStore`] | None | Tests and dry runs |

mod memory;
mod sqlite;

pub use memory::InMemoryDedupStore;
pub use sqlite::SqliteDedupStore;
