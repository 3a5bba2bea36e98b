use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::config::SchemaConfig;
use crate::error::{ConfigError, Diagnostic, DiagnosticKind};
use crate::model::{ident_eq, SchemaGraph};

/// Include/exclude glob patterns over table, view and enum names.
///
/// A name matching any exclude pattern is always removed, even when an
/// include pattern matches it too. Without include patterns every name not
/// excluded is kept. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct TableFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

fn compile(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ConfigError::InvalidPattern {
        pattern: patterns.join(", "),
        source,
    })
}

impl TableFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, ConfigError> {
        let include = if include.is_empty() {
            None
        } else {
            Some(compile(include)?)
        };
        Ok(Self {
            include,
            exclude: compile(exclude)?,
        })
    }

    pub fn from_config(config: &SchemaConfig) -> Result<Self, ConfigError> {
        Self::new(&config.include, &config.exclude)
    }

    /// True when the filter keeps everything.
    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_empty()
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.is_match(name)
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.is_excluded(name) {
            return false;
        }
        self.include.as_ref().map_or(true, |set| set.is_match(name))
    }

    /// Remove non-matching tables, then every foreign key left pointing at a
    /// removed table. Enum types stay when they match on their own or a
    /// remaining column uses them, unless excluded.
    pub fn apply(&self, graph: &mut SchemaGraph, diagnostics: &mut Vec<Diagnostic>) {
        graph.tables.retain(|_, table| self.matches(&table.name));

        let remaining: Vec<String> = graph.tables.keys().cloned().collect();
        for table in graph.tables.values_mut() {
            let name = table.name.clone();
            table.foreign_keys.retain(|fk| {
                let keep = remaining.iter().any(|key| ident_eq(key, &fk.ref_table));
                if !keep {
                    diagnostics.push(
                        Diagnostic::new(
                            DiagnosticKind::DroppedForeignKey,
                            name.clone(),
                            format!("{}: referenced table {:?} was filtered out", fk.name, fk.ref_table),
                        )
                        .with_column(fk.columns.join(", ")),
                    );
                }
                keep
            });
        }

        let tables = &graph.tables;
        graph.enums.retain(|_, enum_type| {
            if self.is_excluded(&enum_type.name) {
                return false;
            }
            self.matches(&enum_type.name)
                || tables
                    .values()
                    .flat_map(|t| t.columns.iter())
                    .any(|c| ident_eq(&c.data_type, &enum_type.name))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, EnumType, ForeignKey, Provenance, Table, TableKind};

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    fn table(name: &str, fks: &[&str]) -> Table {
        Table {
            schema: "public".into(),
            name: name.into(),
            kind: TableKind::Table,
            columns: vec![Column {
                name: "id".into(),
                data_type: "integer".into(),
                nullable: false,
                ordinal: 1,
                has_default: true,
                is_sequence: true,
            }],
            indexes: Vec::new(),
            foreign_keys: fks
                .iter()
                .map(|target| ForeignKey {
                    name: format!("{name}_{target}_fkey"),
                    columns: vec![format!("{target}_id")],
                    ref_table: target.to_string(),
                    ref_columns: vec!["id".into()],
                    provenance: Provenance::Inferred,
                })
                .collect(),
        }
    }

    fn graph() -> SchemaGraph {
        let mut graph = SchemaGraph::new("public");
        for t in [
            table("orders", &["customers"]),
            table("orders_archive", &["orders"]),
            table("customers", &[]),
        ] {
            graph.tables.insert(t.name.clone(), t);
        }
        graph
    }

    #[test]
    fn test_include_with_exclude_override() {
        let filter = TableFilter::new(&patterns(&["orders*"]), &patterns(&["orders_archive"])).unwrap();
        let mut g = graph();
        let mut diagnostics = Vec::new();
        filter.apply(&mut g, &mut diagnostics);
        let names: Vec<_> = g.tables.keys().cloned().collect();
        assert_eq!(names, vec!["orders"]);
        assert!(g.table("orders").unwrap().foreign_keys.is_empty());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::DroppedForeignKey);
    }

    #[test]
    fn test_exclude_wins() {
        let filter = TableFilter::new(&patterns(&["*"]), &patterns(&["cust*"])).unwrap();
        assert!(!filter.matches("customers"));
        assert!(!filter.matches("CUSTOMERS"));
        assert!(filter.matches("orders"));
    }

    #[test]
    fn test_no_include_means_everything() {
        let filter = TableFilter::new(&[], &patterns(&["*_archive"])).unwrap();
        assert!(filter.matches("orders"));
        assert!(!filter.matches("orders_archive"));
        assert!(TableFilter::new(&[], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_filter_is_idempotent() {
        let filter = TableFilter::new(&patterns(&["orders*", "cust*"]), &patterns(&["orders_archive"])).unwrap();
        let mut once = graph();
        filter.apply(&mut once, &mut Vec::new());
        let mut twice = once.clone();
        let mut diagnostics = Vec::new();
        filter.apply(&mut twice, &mut diagnostics);
        assert_eq!(once, twice);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_no_dangling_foreign_keys() {
        let filter = TableFilter::new(&[], &patterns(&["customers"])).unwrap();
        let mut g = graph();
        filter.apply(&mut g, &mut Vec::new());
        for (_, fk) in g.foreign_keys() {
            assert!(g.contains_table(&fk.ref_table));
        }
        assert_eq!(g.table("orders_archive").unwrap().foreign_keys.len(), 1);
    }

    #[test]
    fn test_enum_kept_when_used() {
        let mut g = graph();
        if let Some(t) = g.tables.get_mut("orders") {
            t.columns[0].data_type = "order_status".into();
        }
        for name in ["order_status", "mood", "secret_level"] {
            g.enums.insert(
                name.into(),
                EnumType {
                    name: name.into(),
                    values: vec!["a".into()],
                },
            );
        }
        let filter = TableFilter::new(&patterns(&["orders"]), &patterns(&["secret*"])).unwrap();
        filter.apply(&mut g, &mut Vec::new());
        let names: Vec<_> = g.enums.keys().cloned().collect();
        assert_eq!(names, vec!["order_status"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = TableFilter::new(&patterns(&["orders["]), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { pattern, .. } if pattern == "orders["));
    }
}
