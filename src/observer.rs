//! Injectable hooks for tracing catalog SQL and pipeline events.

use std::time::Duration;

use crate::error::Diagnostic;

/// Receives events from introspection and binding.
///
/// Every method has an empty default so implementations only override what
/// they care about. Observers are shared across tasks.
pub trait Observer: Send + Sync {
    /// A catalog statement finished, successfully or not.
    fn catalog_query(&self, _sql: &str, _elapsed: Duration, _rows: Option<usize>) {}

    /// A non-fatal finding was recorded.
    fn diagnostic(&self, _diagnostic: &Diagnostic) {}

    /// One table's rows arrived from the reader.
    fn table_fetched(&self, _table: &str) {}

    /// A query was bound; `ok` is false when it landed in the failure list.
    fn query_bound(&self, _name: &str, _ok: bool) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn catalog_query(&self, sql: &str, elapsed: Duration, rows: Option<usize>) {
        let sql = sql.split_whitespace().collect::<Vec<_>>().join(" ");
        match rows {
            Some(rows) => tracing::debug!(rows, elapsed_ms = elapsed.as_millis() as u64, %sql, "catalog query"),
            None => tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, %sql, "catalog query failed"),
        }
    }

    fn diagnostic(&self, diagnostic: &Diagnostic) {
        tracing::warn!("{}", diagnostic);
    }

    fn table_fetched(&self, table: &str) {
        tracing::trace!(table, "fetched catalog rows");
    }

    fn query_bound(&self, name: &str, ok: bool) {
        if ok {
            tracing::debug!(query = name, "bound query");
        } else {
            tracing::warn!(query = name, "query failed to bind");
        }
    }
}
