//! Shared metrics recording for storage backends.

use crate::Result;
use std::time::Instant;

/// Records operation metrics for storage operations.
///
/// This function records two metrics for each operation:
/// 1. `storage_operations_total` - Counter for operation count by status
/// 2. `storage_operation_duration_ms` - Histogram for operation latency
///
/// # Examples
///
/// ```ignore
/// use std::time::Instant;
/// use bookcase::storage::record_operation_metrics;
///
/// let start = Instant::now();
/// // ... perform operation ...
/// record_operation_metrics("sqlite", "read_book", start, "success");
/// ```
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
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

/// Runs an operation and records its outcome.
pub fn measured<T>(
    backend: &'static str,
    operation: &'static str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let start = Instant::now();
    let result = f();
    let status = match &result {
        Ok(_) => "success",
        Err(e) if e.is_timeout() => "timeout",
        Err(_) => "error",
    };
    record_operation_metrics(backend, operation, start, status);
    result
}
