//! Shared metrics recording for store backends.

use std::time::Instant;

/// Records the count and latency of one store operation.
///
/// Emits `storage_operations_total` and
/// `storage_operation_duration_ms`, both labelled by backend,
/// operation and status.
///
/// # Examples
///
/// ```ignore
/// use std::time::Instant;
/// use dupstack::storage::sqlite::record_operation_metrics;
///
/// let start = Instant::now();
/// let result = store.upsert_edges(&edges);
/// record_operation_metrics("sqlite", "upsert_edges", start, &result);
/// ```
pub fn record_operation_metrics<T, E>(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    result: &Result<T, E>,
) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::counter!(
        "storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
