//! Metrics emitted by the `SQLite` tier.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `storage_operations_total` | counter | `backend`, `operation`, `status` |
//! | `storage_operation_duration_ms` | histogram | `backend`, `operation`, `status` |
//! | `sqlite_connection_lost_total` | counter | |
//! | `sqlite_reconnect_total` | counter | |
//! | `sqlite_pool_timeout_total` | counter | |
//!
//! `status` is `success`, `unavailable` (the database could not be reached)
//! or `error`.

use crate::Result;
use std::time::Instant;

/// Times one table operation and records it when finished.
///
/// ```ignore
/// let timer = OperationTimer::start("sqlite_queue", "delete_entries");
/// let result = pool.run("delete_entries", |conn| ...);
/// timer.finish(&result);
/// ```
#[derive(Debug)]
#[must_use = "an unfinished timer records nothing"]
pub struct OperationTimer {
    backend: &'static str,
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Starts timing `operation` on `backend`.
    pub fn start(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            start: Instant::now(),
        }
    }

    /// Records count and latency, labelled by the outcome of `result`.
    pub fn finish<T>(self, result: &Result<T>) {
        let status = status_of(result);
        metrics::counter!(
            "storage_operations_total",
            "backend" => self.backend,
            "operation" => self.operation,
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            "storage_operation_duration_ms",
            "backend" => self.backend,
            "operation" => self.operation,
            "status" => status
        )
        .record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

const fn status_of<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) if e.is_retryable() => "unavailable",
        Err(_) => "error",
    }
}

/// The pool switched to fail-fast mode.
pub fn connection_lost() {
    metrics::counter!("sqlite_connection_lost_total").increment(1);
}

/// The reconnect thread re-established the database.
pub fn reconnected() {
    metrics::counter!("sqlite_reconnect_total").increment(1);
}

/// A checkout gave up waiting for a free connection.
pub fn pool_timeout() {
    metrics::counter!("sqlite_pool_timeout_total").increment(1);
}
