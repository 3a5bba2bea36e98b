use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::sync::Arc;
use std::time::Instant;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use super::{CatalogReader, ColumnRaw, ConstraintKind, ConstraintRaw, EnumRaw, IndexRaw, TableRaw};
use crate::config::Engine;
use crate::model::TableKind;
use crate::observer::{NoopObserver, Observer};

const CURRENT_SCHEMA_SQL: &str = "SELECT current_schema() AS name";

const TABLES_SQL: &str = r#"
    SELECT
        c.relname AS name,
        c.relkind::text AS kind
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
    ORDER BY c.relname
"#;

const COLUMNS_SQL: &str = r#"
    SELECT
        c.column_name::text AS name,
        CASE WHEN c.data_type = 'USER-DEFINED' THEN c.udt_name::text
             ELSE c.data_type::text
        END AS data_type,
        c.is_nullable = 'YES' AS is_nullable,
        c.ordinal_position::int AS ordinal_position,
        c.column_default::text AS default_value,
        c.is_identity = 'YES' AS is_identity
    FROM information_schema.columns c
    WHERE c.table_schema = $1 AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

const INDEXES_SQL: &str = r#"
    SELECT
        i.relname AS index_name,
        array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)) AS columns,
        ix.indisunique AS is_unique,
        ix.indisprimary AS is_primary
    FROM pg_catalog.pg_index ix
    JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
    JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
    WHERE n.nspname = $1 AND t.relname = $2
    GROUP BY i.relname, ix.indisunique, ix.indisprimary
    ORDER BY i.relname
"#;

const CONSTRAINTS_SQL: &str = r#"
    SELECT
        con.conname::text AS name,
        con.contype::text AS kind,
        a.attname::text AS column_name,
        rt.relname::text AS ref_table,
        ra.attname::text AS ref_column,
        k.ord::int AS position
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class t ON t.oid = con.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    LEFT JOIN pg_catalog.pg_class rt ON rt.oid = con.confrelid
    LEFT JOIN pg_catalog.pg_attribute ra
        ON ra.attrelid = con.confrelid AND ra.attnum = con.confkey[k.ord]
    WHERE n.nspname = $1 AND t.relname = $2
      AND con.contype IN ('p', 'u', 'f')
    ORDER BY con.conname, k.ord
"#;

const ENUMS_SQL: &str = r#"
    SELECT
        t.typname::text AS name,
        array_agg(e.enumlabel::text ORDER BY e.enumsortorder) AS enum_values
    FROM pg_catalog.pg_type t
    JOIN pg_catalog.pg_enum e ON e.enumtypid = t.oid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
    WHERE n.nspname = $1
    GROUP BY t.typname
    ORDER BY t.typname
"#;

/// Catalog reader backed by a Postgres connection pool.
///
/// Each call checks out its own pooled connection, so per-table calls can
/// run concurrently.
pub struct PostgresCatalog {
    pool: Pool,
    observer: Arc<dyn Observer>,
}

impl PostgresCatalog {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get a pooled PostgreSQL connection")?;
        let start = Instant::now();
        let result = client.query(sql, params).await;
        let rows = result.as_ref().ok().map(|rows| rows.len());
        self.observer.catalog_query(sql, start.elapsed(), rows);
        Ok(result?)
    }
}

#[async_trait]
impl CatalogReader for PostgresCatalog {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn default_schema(&self) -> Result<String> {
        let rows = self.query(CURRENT_SCHEMA_SQL, &[]).await?;
        let schema: Option<String> = rows.first().and_then(|row| row.get("name"));
        schema.context("PostgreSQL reported no current schema")
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableRaw>> {
        let rows = self.query(TABLES_SQL, &[&schema]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let kind: String = row.get("kind");
                TableRaw::new(row.get::<_, String>("name"), TableKind::from_catalog(&kind))
            })
            .collect())
    }

    async fn list_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnRaw>> {
        let rows = self.query(COLUMNS_SQL, &[&schema, &table]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let mut column = ColumnRaw::new(
                    row.get::<_, String>("name"),
                    row.get::<_, String>("data_type"),
                    row.get("ordinal_position"),
                );
                column.table = Some(table.to_string());
                column.nullable = Some(row.get("is_nullable"));
                column.default = row.get("default_value");
                column.auto_increment = row.get::<_, Option<bool>>("is_identity").unwrap_or(false);
                column
            })
            .collect())
    }

    async fn list_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexRaw>> {
        let rows = self.query(INDEXES_SQL, &[&schema, &table]).await?;
        Ok(rows
            .iter()
            .map(|row| IndexRaw {
                name: row.get("index_name"),
                columns: row.get("columns"),
                column: None,
                position: None,
                unique: row.get("is_unique"),
                primary: row.get("is_primary"),
            })
            .collect())
    }

    async fn list_constraints(&self, schema: &str, table: &str) -> Result<Vec<ConstraintRaw>> {
        let rows = self.query(CONSTRAINTS_SQL, &[&schema, &table]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let kind: String = row.get("kind");
                ConstraintRaw {
                    name: row.get("name"),
                    kind: ConstraintKind::from_catalog(&kind),
                    column: row.get("column_name"),
                    ref_table: row.get("ref_table"),
                    ref_column: row.get("ref_column"),
                    position: row.get("position"),
                }
            })
            .collect())
    }

    async fn list_enums(&self, schema: &str) -> Result<Vec<EnumRaw>> {
        let rows = self.query(ENUMS_SQL, &[&schema]).await?;
        Ok(rows
            .iter()
            .map(|row| EnumRaw {
                name: row.get("name"),
                values: row.get("enum_values"),
                value: None,
                position: None,
            })
            .collect())
    }
}
