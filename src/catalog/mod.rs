//! Catalog reader capability and the raw rows it returns.
//!
//! Each engine reports structure with its own field names and spellings
//! (`COLUMN_NAME` vs `column_name`, `"YES"` vs `true`, `'r'` vs `BASE TABLE`).
//! The row types here accept all of them through serde aliases so that every
//! reader, and every catalog dump, lands in the same shape before
//! normalization.

mod connection;
mod memory;
mod postgres;
mod rows;

pub use connection::*;
pub use memory::StaticCatalog;
pub use postgres::PostgresCatalog;
pub use rows::*;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Engine;

/// Source of raw catalog rows for one database.
///
/// Implementations must be safe to call concurrently for distinct tables
/// when [`CatalogReader::concurrent`] returns true; otherwise the
/// introspector serializes every call.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    fn engine(&self) -> Engine;

    /// Schema used when the configuration leaves the name empty.
    async fn default_schema(&self) -> Result<String> {
        anyhow::bail!("{} reader has no default schema", self.engine().label())
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableRaw>>;

    async fn list_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnRaw>>;

    async fn list_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexRaw>>;

    async fn list_constraints(&self, schema: &str, table: &str) -> Result<Vec<ConstraintRaw>>;

    /// Enum-like types; engines without them return nothing.
    async fn list_enums(&self, _schema: &str) -> Result<Vec<EnumRaw>> {
        Ok(Vec::new())
    }

    /// Whether per-table calls may be in flight at the same time.
    fn concurrent(&self) -> bool {
        true
    }
}
