use std::collections::BTreeSet;

use crate::catalog::{ConstraintKind, ConstraintRaw, RawCatalog};
use crate::config::{FkMode, SchemaConfig};
use crate::error::{Diagnostic, DiagnosticKind, IntrospectionError};
use crate::model::{ident_eq, ident_key, ForeignKey, Provenance, SchemaGraph, Table};

/// Attach foreign keys to every table of `graph`.
///
/// Catalog constraints are imported first. In smart mode, columns named
/// `<stem><suffix>` that no explicit key starts from are then matched
/// against tables named after the stem.
pub fn resolve(
    graph: &mut SchemaGraph,
    catalog: &RawCatalog,
    config: &SchemaConfig,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<(), IntrospectionError> {
    import_explicit(graph, catalog, config.fk_mode, diagnostics)?;
    if config.fk_mode.infers() {
        infer(graph, &config.fk_suffix, diagnostics);
    }
    Ok(())
}

fn import_explicit(
    graph: &mut SchemaGraph,
    catalog: &RawCatalog,
    mode: FkMode,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<(), IntrospectionError> {
    let mut seen = BTreeSet::new();
    for raw in &catalog.tables {
        let key = ident_key(&raw.table.name);
        if !seen.insert(key.clone()) {
            continue;
        }
        let Some(table) = graph.tables.get(&key) else {
            continue;
        };

        let mut imported = Vec::new();
        for (name, rows) in group_constraints(&table.name, &raw.constraints) {
            if let Some(fk) = build_explicit(graph, table, &name, &rows, mode, diagnostics)? {
                if !imported
                    .iter()
                    .any(|k: &ForeignKey| k.columns == fk.columns && ident_eq(&k.ref_table, &fk.ref_table))
                {
                    imported.push(fk);
                }
            }
        }

        if let Some(table) = graph.tables.get_mut(&key) {
            table.foreign_keys = imported;
        }
    }
    Ok(())
}

/// Foreign-key rows grouped by constraint name, each group ordered by position.
/// Unnamed rows become single-column constraints named after their column.
fn group_constraints<'a>(table: &str, rows: &'a [ConstraintRaw]) -> Vec<(String, Vec<&'a ConstraintRaw>)> {
    let mut groups: Vec<(String, Vec<&ConstraintRaw>)> = Vec::new();
    for row in rows.iter().filter(|r| r.kind == ConstraintKind::ForeignKey) {
        let name = if row.name.is_empty() {
            format!("{}_{}_fkey", table, row.column)
        } else {
            row.name.clone()
        };
        match groups.iter_mut().find(|(n, _)| ident_eq(n, &name)) {
            Some((_, group)) => group.push(row),
            None => groups.push((name, vec![row])),
        }
    }
    for (_, group) in groups.iter_mut() {
        group.sort_by_key(|r| r.position);
    }
    groups.sort_by(|a, b| ident_key(&a.0).cmp(&ident_key(&b.0)));
    groups
}

fn build_explicit(
    graph: &SchemaGraph,
    table: &Table,
    name: &str,
    rows: &[&ConstraintRaw],
    mode: FkMode,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Option<ForeignKey>, IntrospectionError> {
    let malformed = |reason: &str| IntrospectionError::MalformedConstraint {
        table: table.name.clone(),
        constraint: name.to_string(),
        reason: reason.to_string(),
    };

    let mut ref_table_name: Option<&str> = None;
    let mut columns = Vec::with_capacity(rows.len());
    let mut ref_columns = Vec::with_capacity(rows.len());
    for row in rows {
        let target = row
            .ref_table
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| malformed("no referenced table"))?;
        let ref_column = row
            .ref_column
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| malformed("no referenced column"))?;
        match ref_table_name {
            Some(existing) if !ident_eq(existing, target) => {
                return Err(malformed("references more than one table"));
            }
            _ => ref_table_name = Some(target),
        }
        let column = table.column(&row.column).ok_or_else(|| IntrospectionError::UnknownColumn {
            table: table.name.clone(),
            column: row.column.clone(),
            context: format!("foreign key {name:?}"),
        })?;
        columns.push(column.name.clone());
        ref_columns.push(ref_column.to_string());
    }
    let Some(ref_table_name) = ref_table_name else {
        return Ok(None);
    };

    let Some(target) = graph.table(ref_table_name) else {
        diagnostics.push(
            Diagnostic::new(
                DiagnosticKind::DroppedForeignKey,
                table.name.clone(),
                format!("{name}: referenced table {ref_table_name:?} is not part of the schema"),
            )
            .with_column(columns.join(", ")),
        );
        return Ok(None);
    };

    for ref_column in ref_columns.iter_mut() {
        let column = target.column(ref_column).ok_or_else(|| IntrospectionError::UnknownColumn {
            table: target.name.clone(),
            column: ref_column.clone(),
            context: format!("foreign key {name:?} on {:?}", table.name),
        })?;
        *ref_column = column.name.clone();
    }

    if mode == FkMode::ExplicitOnly && !target.is_unique_key(&ref_columns) {
        diagnostics.push(
            Diagnostic::new(
                DiagnosticKind::DroppedForeignKey,
                table.name.clone(),
                format!(
                    "{name}: {}({}) is not a primary or unique key",
                    target.name,
                    ref_columns.join(", ")
                ),
            )
            .with_column(columns.join(", ")),
        );
        return Ok(None);
    }

    Ok(Some(ForeignKey {
        name: name.to_string(),
        columns,
        ref_table: target.name.clone(),
        ref_columns,
        provenance: Provenance::Explicit,
    }))
}

/// How well a table name matches a column stem. Lower is better.
fn match_rank(table_key: &str, stem: &str) -> Option<u8> {
    if table_key == stem {
        Some(0)
    } else if plural_forms(stem).iter().any(|p| p == table_key) {
        Some(1)
    } else {
        None
    }
}

const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("tooth", "teeth"),
    ("foot", "feet"),
    ("datum", "data"),
    ("index", "indices"),
    ("criterion", "criteria"),
];

fn plural_forms(stem: &str) -> Vec<String> {
    let mut forms = vec![format!("{stem}s"), format!("{stem}es")];
    if let Some(head) = stem.strip_suffix('y') {
        if !head.ends_with(['a', 'e', 'i', 'o', 'u']) {
            forms.push(format!("{head}ies"));
        }
    }
    // Irregulars apply to the last word of a snake_case stem.
    let (prefix, last) = match stem.rfind('_') {
        Some(pos) => stem.split_at(pos + 1),
        None => ("", stem),
    };
    for (singular, plural) in IRREGULAR_PLURALS {
        if last == *singular {
            forms.push(format!("{prefix}{plural}"));
        }
    }
    forms
}

fn infer(graph: &mut SchemaGraph, suffix: &str, diagnostics: &mut Vec<Diagnostic>) {
    let suffix = ident_key(suffix);

    // (table key, identity column) for every table with a single-column key.
    let targets: Vec<(String, String, String)> = graph
        .tables
        .iter()
        .filter_map(|(key, t)| {
            t.identity_column()
                .map(|c| (key.clone(), t.name.clone(), c.name.clone()))
        })
        .collect();

    let mut additions: Vec<(String, ForeignKey)> = Vec::new();
    for (key, table) in &graph.tables {
        for column in &table.columns {
            let column_key = ident_key(&column.name);
            let Some(stem) = column_key.strip_suffix(suffix.as_str()) else {
                continue;
            };
            let stem = stem.trim_end_matches('_');
            if stem.is_empty() {
                continue;
            }
            if table
                .foreign_keys
                .iter()
                .any(|fk| fk.columns.iter().any(|c| ident_eq(c, &column.name)))
            {
                continue;
            }
            if table
                .identity_column()
                .is_some_and(|id| ident_eq(&id.name, &column.name))
            {
                continue;
            }

            let mut candidates: Vec<(u8, &str, &str)> = targets
                .iter()
                .filter(|(_, _, id)| ident_eq(id, "id") || ident_eq(id, &column.name))
                .filter_map(|(target_key, name, id)| {
                    match_rank(target_key, stem).map(|rank| (rank, name.as_str(), id.as_str()))
                })
                .collect();
            let Some(best) = candidates.iter().map(|(rank, _, _)| *rank).min() else {
                continue;
            };
            candidates.retain(|(rank, _, _)| *rank == best);

            if let [(_, ref_table, ref_column)] = candidates.as_slice() {
                additions.push((
                    key.clone(),
                    ForeignKey {
                        name: format!("{}_{}_fkey", table.name, column.name),
                        columns: vec![column.name.clone()],
                        ref_table: ref_table.to_string(),
                        ref_columns: vec![ref_column.to_string()],
                        provenance: Provenance::Inferred,
                    },
                ));
            } else {
                let names: Vec<&str> = candidates.iter().map(|(_, name, _)| *name).collect();
                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::AmbiguousInference,
                        table.name.clone(),
                        format!(
                            "matches {} equally plausible tables ({}); no key inferred",
                            names.len(),
                            names.join(", ")
                        ),
                    )
                    .with_column(column.name.clone()),
                );
            }
        }
    }

    for (key, fk) in additions {
        if let Some(table) = graph.tables.get_mut(&key) {
            table.foreign_keys.push(fk);
        }
    }
}
