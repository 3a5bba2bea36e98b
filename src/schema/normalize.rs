use std::collections::BTreeMap;

use crate::catalog::{ConstraintKind, EnumRaw, RawCatalog, RawTable};
use crate::config::SchemaConfig;
use crate::error::{Diagnostic, DiagnosticKind, IntrospectionError};
use crate::model::{ident_eq, ident_key, Column, EnumType, Index, SchemaGraph, Table};

/// Build the canonical graph from raw catalog rows.
///
/// Tables are keyed case-insensitively, columns are ordered by ordinal and
/// indexes are merged from index rows, primary/unique constraint rows and
/// per-column primary-key flags. Foreign keys are attached separately.
pub fn normalize(
    catalog: &RawCatalog,
    config: &SchemaConfig,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<SchemaGraph, IntrospectionError> {
    if catalog.tables.is_empty() {
        return Err(IntrospectionError::EmptySchema {
            schema: catalog.schema.clone(),
        });
    }

    let mut graph = SchemaGraph::new(catalog.schema.clone());
    let sources = unique_tables(catalog, diagnostics);

    for raw in &sources {
        graph.tables.insert(
            ident_key(&raw.table.name),
            Table {
                schema: catalog.schema.clone(),
                name: raw.table.name.clone(),
                kind: raw.table.kind,
                columns: Vec::new(),
                indexes: Vec::new(),
                foreign_keys: Vec::new(),
            },
        );
    }

    for raw in &sources {
        for col in &raw.columns {
            let owner = col.table.as_deref().unwrap_or(&raw.table.name);
            let table = graph.tables.get_mut(&ident_key(owner)).ok_or_else(|| {
                IntrospectionError::UnknownTable {
                    table: owner.to_string(),
                    context: format!("column {:?}", col.name),
                }
            })?;
            if table.column(&col.name).is_some() {
                return Err(IntrospectionError::DuplicateColumn {
                    table: table.name.clone(),
                    column: col.name.clone(),
                });
            }
            table.columns.push(Column {
                name: col.name.clone(),
                data_type: col.data_type.clone(),
                nullable: col.is_nullable(),
                ordinal: col.ordinal,
                has_default: col.default.is_some(),
                is_sequence: col.is_sequence(),
            });
        }
    }

    for table in graph.tables.values_mut() {
        order_columns(table)?;
    }

    for raw in &sources {
        if let Some(table) = graph.tables.get_mut(&ident_key(&raw.table.name)) {
            let indexes = collect_indexes(table, raw, catalog, config, diagnostics)?;
            table.indexes = indexes;
        }
    }

    graph.enums = collect_enums(&catalog.enums);
    Ok(graph)
}

/// Tables in catalog order with repeated names collapsed onto the first.
fn unique_tables<'a>(catalog: &'a RawCatalog, diagnostics: &mut Vec<Diagnostic>) -> Vec<&'a RawTable> {
    let mut seen: BTreeMap<String, &RawTable> = BTreeMap::new();
    let mut sources = Vec::new();
    for raw in &catalog.tables {
        let key = ident_key(&raw.table.name);
        match seen.get(&key) {
            Some(first) => {
                let message = if *first == raw {
                    "reported twice with identical rows; keeping one".to_string()
                } else {
                    "reported twice with different rows; keeping the first".to_string()
                };
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::DuplicateTable,
                    raw.table.name.clone(),
                    message,
                ));
            }
            None => {
                seen.insert(key, raw);
                sources.push(raw);
            }
        }
    }
    sources
}

fn order_columns(table: &mut Table) -> Result<(), IntrospectionError> {
    table.columns.sort_by_key(|c| c.ordinal);
    for pair in table.columns.windows(2) {
        if pair[0].ordinal == pair[1].ordinal {
            return Err(IntrospectionError::DuplicateOrdinal {
                table: table.name.clone(),
                ordinal: pair[0].ordinal,
                first: pair[0].name.clone(),
                second: pair[1].name.clone(),
            });
        }
    }
    Ok(())
}

struct PendingIndex {
    name: String,
    columns: Vec<(i32, String)>,
    unique: bool,
    primary: bool,
}

impl PendingIndex {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            unique: false,
            primary: false,
        }
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(_, c)| c.clone()).collect()
    }
}

fn pending<'a>(list: &'a mut Vec<PendingIndex>, name: &str) -> &'a mut PendingIndex {
    let pos = match list.iter().position(|p| ident_eq(&p.name, name)) {
        Some(pos) => pos,
        None => {
            list.push(PendingIndex::new(name));
            list.len() - 1
        }
    };
    &mut list[pos]
}

fn same_columns(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && b.iter().all(|c| a.iter().any(|x| ident_eq(x, c)))
}

fn collect_indexes(
    table: &Table,
    raw: &RawTable,
    catalog: &RawCatalog,
    config: &SchemaConfig,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Vec<Index>, IntrospectionError> {
    let mut list: Vec<PendingIndex> = Vec::new();

    for idx in &raw.indexes {
        let entry = pending(&mut list, &idx.name);
        let base = entry.columns.len() as i32;
        for (i, column) in idx.columns.iter().enumerate() {
            entry.columns.push((base + i as i32, column.clone()));
        }
        if let Some(column) = &idx.column {
            entry
                .columns
                .push((idx.position.unwrap_or(base), column.clone()));
        }
        entry.unique |= idx.unique || idx.primary;
        entry.primary |= idx.primary;
    }

    // Key constraints double as indexes on engines that report them separately.
    let mut keys: Vec<PendingIndex> = Vec::new();
    for c in &raw.constraints {
        if !matches!(c.kind, ConstraintKind::PrimaryKey | ConstraintKind::Unique) {
            continue;
        }
        let entry = pending(&mut keys, &c.name);
        entry.columns.push((c.position, c.column.clone()));
        entry.unique = true;
        entry.primary |= c.kind == ConstraintKind::PrimaryKey;
    }
    for mut key in keys {
        key.columns.sort_by_key(|(pos, _)| *pos);
        let names = key.column_names();
        let covering = list.iter_mut().find(|p| {
            ident_eq(&p.name, &key.name) || (p.unique && same_columns(&p.column_names(), &names))
        });
        match covering {
            Some(existing) => {
                existing.unique = true;
                existing.primary |= key.primary;
            }
            None => list.push(key),
        }
    }

    let mut indexes = Vec::with_capacity(list.len());
    for mut p in list {
        p.columns.sort_by_key(|(pos, _)| *pos);
        if p.columns.is_empty() {
            return Err(IntrospectionError::MalformedConstraint {
                table: table.name.clone(),
                constraint: p.name,
                reason: "index has no columns".to_string(),
            });
        }
        let mut columns = Vec::with_capacity(p.columns.len());
        for (_, name) in &p.columns {
            let column = table.column(name).ok_or_else(|| IntrospectionError::UnknownColumn {
                table: table.name.clone(),
                column: name.clone(),
                context: format!("index {:?}", p.name),
            })?;
            columns.push(column.name.clone());
        }
        indexes.push(Index {
            name: p.name,
            columns,
            unique: p.unique,
            primary: p.primary,
        });
    }

    if !indexes.iter().any(|i| i.primary) {
        synthesize_primary_key(table, catalog, &mut indexes, diagnostics);
    }

    let mut primaries = indexes.iter().filter(|i| i.primary);
    if let (Some(first), Some(second)) = (primaries.next(), primaries.next()) {
        return Err(IntrospectionError::MultiplePrimaryKeys {
            table: table.name.clone(),
            first: first.name.clone(),
            second: second.name.clone(),
        });
    }

    if !config.use_index_names {
        rename_indexes(&table.name, &mut indexes);
    }
    indexes.sort_by(|a, b| b.primary.cmp(&a.primary).then_with(|| a.name.cmp(&b.name)));
    Ok(indexes)
}

/// Engines like SQLite flag key membership per column instead of reporting
/// a primary index.
fn synthesize_primary_key(
    table: &Table,
    catalog: &RawCatalog,
    indexes: &mut Vec<Index>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let flagged: Vec<&str> = catalog
        .tables
        .iter()
        .flat_map(|t| {
            t.columns
                .iter()
                .filter(move |c| ident_eq(c.table.as_deref().unwrap_or(&t.table.name), &table.name))
        })
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect();
    if flagged.is_empty() {
        return;
    }

    let columns: Vec<String> = table
        .columns
        .iter()
        .filter(|c| flagged.iter().any(|f| ident_eq(f, &c.name)))
        .map(|c| c.name.clone())
        .collect();

    match indexes.iter_mut().find(|i| i.unique && i.covers(&columns)) {
        Some(existing) => existing.primary = true,
        None => indexes.push(Index {
            name: format!("{}_pkey", table.name),
            columns: columns.clone(),
            unique: true,
            primary: true,
        }),
    }
    diagnostics.push(Diagnostic::new(
        DiagnosticKind::SynthesizedPrimaryKey,
        table.name.clone(),
        format!("primary key ({}) assembled from column flags", columns.join(", ")),
    ));
}

/// Replace catalog index names with `<table>_<columns>_{pkey|key|idx}`.
fn rename_indexes(table: &str, indexes: &mut [Index]) {
    let mut used: Vec<String> = Vec::with_capacity(indexes.len());
    for index in indexes.iter_mut() {
        let suffix = if index.primary {
            "pkey"
        } else if index.unique {
            "key"
        } else {
            "idx"
        };
        let base = if index.primary {
            format!("{table}_{suffix}")
        } else {
            format!("{table}_{}_{suffix}", index.columns.join("_"))
        };
        let mut name = base.clone();
        let mut n = 1;
        while used.iter().any(|u| ident_eq(u, &name)) {
            name = format!("{base}_{n}");
            n += 1;
        }
        used.push(name.clone());
        index.name = name;
    }
}

fn collect_enums(rows: &[EnumRaw]) -> BTreeMap<String, EnumType> {
    let mut grouped: BTreeMap<String, (String, Vec<String>, Vec<(f64, String)>)> = BTreeMap::new();
    for row in rows {
        let entry = grouped
            .entry(ident_key(&row.name))
            .or_insert_with(|| (row.name.clone(), Vec::new(), Vec::new()));
        entry.1.extend(row.values.iter().cloned());
        if let Some(value) = &row.value {
            let position = row.position.unwrap_or(entry.2.len() as f64);
            entry.2.push((position, value.clone()));
        }
    }

    grouped
        .into_iter()
        .map(|(key, (name, mut values, mut labeled))| {
            labeled.sort_by(|a, b| a.0.total_cmp(&b.0));
            values.extend(labeled.into_iter().map(|(_, v)| v));
            (key, EnumType { name, values })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnRaw, ConstraintRaw, IndexRaw};
    use crate::model::TableKind;

    fn catalog(tables: Vec<RawTable>) -> RawCatalog {
        RawCatalog {
            schema: "public".into(),
            tables,
            enums: Vec::new(),
        }
    }

    fn run(catalog: &RawCatalog) -> Result<(SchemaGraph, Vec<Diagnostic>), IntrospectionError> {
        let mut diagnostics = Vec::new();
        let graph = normalize(catalog, &SchemaConfig::default(), &mut diagnostics)?;
        Ok((graph, diagnostics))
    }

    #[test]
    fn test_empty_schema_is_an_error() {
        let err = run(&catalog(vec![])).unwrap_err();
        assert!(matches!(err, IntrospectionError::EmptySchema { .. }));
    }

    #[test]
    fn test_columns_ordered_by_ordinal() {
        let mut t = RawTable::new("orders");
        t.columns.push(ColumnRaw::new("total", "numeric", 3));
        t.columns.push(ColumnRaw::new("id", "integer", 1));
        t.columns.push(ColumnRaw::new("customer_id", "integer", 2));
        let (graph, _) = run(&catalog(vec![t])).unwrap();
        let names: Vec<_> = graph.table("orders").unwrap().columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "customer_id", "total"]);
    }

    #[test]
    fn test_duplicate_ordinal_rejected() {
        let mut t = RawTable::new("orders");
        t.columns.push(ColumnRaw::new("a", "integer", 1));
        t.columns.push(ColumnRaw::new("b", "integer", 1));
        let err = run(&catalog(vec![t])).unwrap_err();
        assert!(matches!(err, IntrospectionError::DuplicateOrdinal { ordinal: 1, .. }));
    }

    #[test]
    fn test_column_for_unknown_table_rejected() {
        let mut t = RawTable::new("orders");
        let mut col = ColumnRaw::new("id", "integer", 1);
        col.table = Some("ghosts".into());
        t.columns.push(col);
        let err = run(&catalog(vec![t])).unwrap_err();
        match err {
            IntrospectionError::UnknownTable { table, .. } => assert_eq!(table, "ghosts"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_columns_attributed_by_reported_table() {
        let mut first = RawTable::new("customers");
        let mut col = ColumnRaw::new("id", "integer", 1);
        col.table = Some("CUSTOMERS".into());
        first.columns.push(col);
        let mut col = ColumnRaw::new("id", "integer", 1);
        col.table = Some("orders".into());
        first.columns.push(col);
        let second = RawTable::new("Orders");
        let (graph, _) = run(&catalog(vec![first, second])).unwrap();
        assert_eq!(graph.table("orders").unwrap().columns.len(), 1);
        assert_eq!(graph.table("orders").unwrap().name, "Orders");
    }

    #[test]
    fn test_duplicate_table_collapses_with_diagnostic() {
        let t = RawTable::new("orders").column("id", "integer", false);
        let (graph, diagnostics) = run(&catalog(vec![t.clone(), t])).unwrap();
        assert_eq!(graph.tables.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::DuplicateTable);
    }

    #[test]
    fn test_descriptive_index_names() {
        let t = RawTable::new("authors")
            .serial("id", "integer")
            .column("title", "text", false)
            .column("year", "integer", true)
            .primary_key(&["id"])
            .index("authors__b124214__u_idx", &["title"], true)
            .index("ix_1", &["year", "title"], false);
        let (graph, _) = run(&catalog(vec![t])).unwrap();
        let names: Vec<_> = graph.table("authors").unwrap().indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["authors_pkey", "authors_title_key", "authors_year_title_idx"]);
    }

    #[test]
    fn test_catalog_index_names_kept_when_configured() {
        let t = RawTable::new("authors")
            .column("title", "text", false)
            .index("authors__b124214__u_idx", &["title"], true);
        let config = SchemaConfig {
            use_index_names: true,
            ..Default::default()
        };
        let graph = normalize(&catalog(vec![t]), &config, &mut Vec::new()).unwrap();
        assert_eq!(graph.table("authors").unwrap().indexes[0].name, "authors__b124214__u_idx");
    }

    #[test]
    fn test_index_on_unknown_column_rejected() {
        let t = RawTable::new("orders")
            .column("id", "integer", false)
            .index("orders_missing_idx", &["missing"], false);
        assert!(matches!(
            run(&catalog(vec![t])).unwrap_err(),
            IntrospectionError::UnknownColumn { .. }
        ));
    }

    #[test]
    fn test_multiple_primary_keys_rejected() {
        let mut t = RawTable::new("orders")
            .column("id", "integer", false)
            .column("code", "text", false)
            .primary_key(&["id"]);
        t.indexes.push(IndexRaw::new("orders_code_pkey", &["code"], true, true));
        assert!(matches!(
            run(&catalog(vec![t])).unwrap_err(),
            IntrospectionError::MultiplePrimaryKeys { .. }
        ));
    }

    #[test]
    fn test_per_row_index_columns_merge() {
        let mut t = RawTable::new("line_items")
            .column("order_id", "integer", false)
            .column("line", "integer", false);
        for (pos, column) in [(2, "line"), (1, "order_id")] {
            t.indexes.push(IndexRaw {
                name: "PRIMARY".into(),
                columns: Vec::new(),
                column: Some(column.into()),
                position: Some(pos),
                unique: true,
                primary: true,
            });
        }
        let (graph, _) = run(&catalog(vec![t])).unwrap();
        let pk = graph.table("line_items").unwrap().primary_key().unwrap();
        assert_eq!(pk.columns, vec!["order_id", "line"]);
    }

    #[test]
    fn test_primary_key_synthesized_from_column_flags() {
        let mut t = RawTable::new("users");
        let mut id = ColumnRaw::new("id", "INTEGER", 0);
        id.primary_key = true;
        t.columns.push(id);
        t.columns.push(ColumnRaw::new("email", "TEXT", 1));
        let (graph, diagnostics) = run(&catalog(vec![t])).unwrap();
        let users = graph.table("users").unwrap();
        assert_eq!(users.identity_column().unwrap().name, "id");
        assert_eq!(diagnostics[0].kind, DiagnosticKind::SynthesizedPrimaryKey);
    }

    #[test]
    fn test_key_constraints_become_indexes() {
        let mut t = RawTable::new("customers")
            .column("id", "integer", false)
            .column("email", "text", false);
        t.constraints.push(ConstraintRaw {
            name: "PRIMARY".into(),
            kind: ConstraintKind::PrimaryKey,
            column: "id".into(),
            ref_table: None,
            ref_column: None,
            position: 1,
        });
        t.constraints.push(ConstraintRaw {
            name: "email_uq".into(),
            kind: ConstraintKind::Unique,
            column: "email".into(),
            ref_table: None,
            ref_column: None,
            position: 1,
        });
        let (graph, _) = run(&catalog(vec![t])).unwrap();
        let customers = graph.table("customers").unwrap();
        assert_eq!(customers.indexes.len(), 2);
        assert!(customers.is_unique_key(&["email".to_string()]));
        assert_eq!(customers.identity_column().unwrap().name, "id");
    }

    #[test]
    fn test_views_and_enums_kept() {
        let v = RawTable::new("order_totals").view().column("total", "numeric", true);
        let mut c = catalog(vec![v]);
        c.enums.push(EnumRaw::new("order_status", &["new", "paid"]));
        c.enums.push(EnumRaw {
            name: "order_status".into(),
            values: Vec::new(),
            value: Some("shipped".into()),
            position: Some(3.0),
        });
        let (graph, _) = run(&c).unwrap();
        assert_eq!(graph.table("order_totals").unwrap().kind, TableKind::View);
        assert_eq!(graph.enum_type("ORDER_STATUS").unwrap().values, vec!["new", "paid", "shipped"]);
    }

    #[test]
    fn test_catalog_rows_not_mutated() {
        let c = catalog(vec![RawTable::new("orders").column("id", "integer", false)]);
        let before = c.clone();
        run(&c).unwrap();
        assert_eq!(c, before);
    }
}
