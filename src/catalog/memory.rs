use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

use super::{CatalogReader, ColumnRaw, ConstraintRaw, EnumRaw, IndexRaw, RawCatalog, RawTable, TableRaw};
use crate::config::Engine;
use crate::model::ident_eq;

/// Catalog reader over rows held in memory, typically loaded from a JSON
/// dump of another engine's catalog.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    engine: Engine,
    catalog: RawCatalog,
    concurrent: bool,
}

impl StaticCatalog {
    pub fn new(engine: Engine, catalog: RawCatalog) -> Self {
        Self {
            engine,
            catalog,
            concurrent: true,
        }
    }

    /// An empty catalog for `schema`, filled with [`StaticCatalog::with_table`].
    pub fn empty(schema: impl Into<String>) -> Self {
        Self::new(
            Engine::Postgres,
            RawCatalog {
                schema: schema.into(),
                ..Default::default()
            },
        )
    }

    pub fn from_json(engine: Engine, json: &str) -> Result<Self> {
        let catalog: RawCatalog =
            serde_json::from_str(json).context("Failed to parse catalog dump")?;
        Ok(Self::new(engine, catalog))
    }

    pub fn load(engine: Engine, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog dump: {}", path.display()))?;
        Self::from_json(engine, &content)
    }

    pub fn with_table(mut self, table: RawTable) -> Self {
        self.catalog.tables.push(table);
        self
    }

    pub fn with_enum(mut self, enum_type: EnumRaw) -> Self {
        self.catalog.enums.push(enum_type);
        self
    }

    /// Report that per-table calls must not overlap.
    pub fn serialized(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub fn catalog(&self) -> &RawCatalog {
        &self.catalog
    }

    fn schema_matches(&self, schema: &str) -> bool {
        self.catalog.schema.is_empty() || ident_eq(&self.catalog.schema, schema)
    }

    fn table(&self, schema: &str, table: &str) -> Option<&RawTable> {
        if !self.schema_matches(schema) {
            return None;
        }
        self.catalog
            .tables
            .iter()
            .find(|t| ident_eq(&t.table.name, table))
    }
}

#[async_trait]
impl CatalogReader for StaticCatalog {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn default_schema(&self) -> Result<String> {
        Ok(self.catalog.schema.clone())
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableRaw>> {
        if !self.schema_matches(schema) {
            return Ok(Vec::new());
        }
        Ok(self.catalog.tables.iter().map(|t| t.table.clone()).collect())
    }

    async fn list_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnRaw>> {
        Ok(self
            .table(schema, table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn list_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexRaw>> {
        Ok(self
            .table(schema, table)
            .map(|t| t.indexes.clone())
            .unwrap_or_default())
    }

    async fn list_constraints(&self, schema: &str, table: &str) -> Result<Vec<ConstraintRaw>> {
        Ok(self
            .table(schema, table)
            .map(|t| t.constraints.clone())
            .unwrap_or_default())
    }

    async fn list_enums(&self, schema: &str) -> Result<Vec<EnumRaw>> {
        if !self.schema_matches(schema) {
            return Ok(Vec::new());
        }
        Ok(self.catalog.enums.clone())
    }

    fn concurrent(&self) -> bool {
        self.concurrent
    }
}
