//! Async entry points: catalog introspection and batch query binding.
//!
//! Both take a [`CancellationToken`]. When it fires, in-flight work is
//! dropped and [`Error::Cancelled`] is returned; no partially built graph is
//! ever handed out.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::{CatalogReader, RawCatalog, RawTable, TableRaw};
use crate::config::{Engine, QueryConfig, SchemaConfig};
use crate::error::{Diagnostic, Error, IntrospectionError, QueryBindError};
use crate::model::{BoundQuery, SchemaGraph};
use crate::observer::Observer;
use crate::query::{Binder, TypeOverride};
use crate::schema::{build_graph, TableFilter};

/// Result of a successful introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Introspection {
    pub graph: SchemaGraph,
    pub diagnostics: Vec<Diagnostic>,
}

/// Read the catalog for `config.name` and build the filtered schema graph.
pub async fn introspect(
    reader: &dyn CatalogReader,
    config: &SchemaConfig,
    cancel: &CancellationToken,
    observer: &dyn Observer,
) -> Result<Introspection, Error> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("introspection cancelled");
            Err(Error::Cancelled)
        }
        result = run_introspection(reader, config, observer) => result,
    }
}

async fn run_introspection(
    reader: &dyn CatalogReader,
    config: &SchemaConfig,
    observer: &dyn Observer,
) -> Result<Introspection, Error> {
    // Bad patterns should fail before any catalog traffic.
    TableFilter::from_config(config)?;

    let catalog = fetch_catalog(reader, config, observer).await?;
    debug!(
        schema = %catalog.schema,
        tables = catalog.tables.len(),
        enums = catalog.enums.len(),
        "catalog rows collected"
    );

    let (graph, diagnostics) = build_graph(&catalog, config)?;
    for diagnostic in &diagnostics {
        observer.diagnostic(diagnostic);
    }
    info!(
        schema = %graph.schema,
        tables = graph.tables.len(),
        foreign_keys = graph.foreign_keys().count(),
        diagnostics = diagnostics.len(),
        "schema graph built"
    );

    Ok(Introspection { graph, diagnostics })
}

fn catalog_error(
    operation: &'static str,
    table: Option<&str>,
) -> impl FnOnce(anyhow::Error) -> IntrospectionError {
    let table = table.map(str::to_string);
    move |source| IntrospectionError::Catalog {
        operation,
        table,
        source,
    }
}

async fn fetch_catalog(
    reader: &dyn CatalogReader,
    config: &SchemaConfig,
    observer: &dyn Observer,
) -> Result<RawCatalog, IntrospectionError> {
    let schema = if config.name.is_empty() {
        reader
            .default_schema()
            .await
            .map_err(catalog_error("default_schema", None))?
    } else {
        config.name.clone()
    };

    let tables = reader
        .list_tables(&schema)
        .await
        .map_err(catalog_error("list_tables", None))?;

    let limit = if reader.concurrent() {
        config.max_concurrency.max(1)
    } else {
        1
    };
    info!(
        schema = %schema,
        engine = reader.engine().label(),
        tables = tables.len(),
        concurrency = limit,
        "reading catalog"
    );

    let schema_ref = schema.as_str();
    let raw_tables: Vec<RawTable> = stream::iter(tables)
        .map(|table| fetch_table(reader, schema_ref, table, observer))
        .buffered(limit)
        .try_collect()
        .await?;

    let enums = reader
        .list_enums(&schema)
        .await
        .map_err(catalog_error("list_enums", None))?;

    Ok(RawCatalog {
        schema,
        tables: raw_tables,
        enums,
    })
}

async fn fetch_table(
    reader: &dyn CatalogReader,
    schema: &str,
    table: TableRaw,
    observer: &dyn Observer,
) -> Result<RawTable, IntrospectionError> {
    let name = table.name.as_str();
    let columns = reader
        .list_columns(schema, name)
        .await
        .map_err(catalog_error("list_columns", Some(name)))?;
    let indexes = reader
        .list_indexes(schema, name)
        .await
        .map_err(catalog_error("list_indexes", Some(name)))?;
    let constraints = reader
        .list_constraints(schema, name)
        .await
        .map_err(catalog_error("list_constraints", Some(name)))?;
    observer.table_fetched(name);

    Ok(RawTable {
        table,
        columns,
        indexes,
        constraints,
    })
}

/// Settings shared by every query in a batch.
#[derive(Clone, Default)]
pub struct BindOptions {
    pub engine: Engine,
    /// Default for queries that leave `allow_nulls` unset.
    pub allow_nulls: bool,
    pub type_override: Option<Arc<dyn TypeOverride>>,
}

fn serialize_display<S: Serializer>(error: &QueryBindError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

/// A query that could not be bound, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindFailure {
    pub name: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: QueryBindError,
}

/// Bound queries and failures, each in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindReport {
    pub queries: Vec<BoundQuery>,
    pub failures: Vec<BindFailure>,
}

/// Bind every `(config, text)` pair against `graph` on the blocking pool.
///
/// A failing query never affects the others; it lands in
/// [`BindReport::failures`].
pub async fn bind_queries(
    graph: Arc<SchemaGraph>,
    queries: Vec<(QueryConfig, String)>,
    options: BindOptions,
    cancel: &CancellationToken,
    observer: &dyn Observer,
) -> Result<BindReport, Error> {
    let total = queries.len();
    let mut set = JoinSet::new();
    for (index, (query, sql)) in queries.into_iter().enumerate() {
        let graph = Arc::clone(&graph);
        let options = options.clone();
        set.spawn_blocking(move || {
            let mut binder = Binder::new(&graph, options.engine).allow_nulls(options.allow_nulls);
            if let Some(hook) = options.type_override {
                binder = binder.with_override(hook);
            }
            let result = binder.bind(&query, &sql);
            (index, query.name, result)
        });
    }

    let mut slots: Vec<Option<(String, Result<BoundQuery, QueryBindError>)>> =
        (0..total).map(|_| None).collect();
    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                set.abort_all();
                info!("binding cancelled");
                return Err(Error::Cancelled);
            }
            joined = set.join_next() => joined,
        };
        let Some(joined) = joined else { break };
        match joined {
            Ok((index, name, result)) => slots[index] = Some((name, result)),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => return Err(Error::Cancelled),
        }
    }

    let mut report = BindReport::default();
    for (name, result) in slots.into_iter().flatten() {
        observer.query_bound(&name, result.is_ok());
        match result {
            Ok(bound) => report.queries.push(bound),
            Err(error) => report.failures.push(BindFailure { name, error }),
        }
    }
    info!(
        bound = report.queries.len(),
        failed = report.failures.len(),
        "queries bound"
    );
    Ok(report)
}
