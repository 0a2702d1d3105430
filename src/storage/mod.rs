//! Storage layer abstraction.
//!
//! Services talk to a [`DedupStore`]; the backends in [`dedup`] implement it
//! and [`sqlite`] holds the connection helpers they share.

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]
// Allow cast precision loss for counters exported as metrics.
#![allow(clippy::cast_precision_loss)]

pub mod dedup;
pub mod sqlite;
pub mod traits;

pub use dedup::{InMemoryDedupStore, SqliteDedupStore};
pub use traits::DedupStore;
