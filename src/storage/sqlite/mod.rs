//! Shared `SQLite` infrastructure for store backends.
//!
//! ## Module Structure
//!
//! - `connection`: Connection handling ([`Mutex<Connection>`](rusqlite::Connection), lock acquisition, configuration)
//! - `sql`: Placeholder lists and the item filter clause
//! - `metrics`: Shared metrics recording helpers

mod connection;
mod metrics;
mod sql;

pub use connection::{
    acquire_lock, configure_connection, open_connection, open_in_memory, sqlite_error,
};
pub use metrics::record_operation_metrics;
pub use sql::{MAX_IN_LIST, build_item_filter_clause, item_order_clause, numbered_placeholders};
