//! Raw catalog rows to a filtered [`SchemaGraph`].
//!
//! The stages run in a fixed order: normalization needs every table's rows,
//! foreign-key inference needs the complete table set to rank candidates,
//! and filtering runs last so that pruning also removes edges into tables
//! the user excluded.

pub mod filter;
pub mod foreign_keys;
pub mod normalize;

pub use filter::TableFilter;
pub use normalize::normalize;

use crate::catalog::RawCatalog;
use crate::config::SchemaConfig;
use crate::error::{Diagnostic, Error};
use crate::model::SchemaGraph;

/// Normalize, resolve foreign keys and filter in one pass.
pub fn build_graph(
    catalog: &RawCatalog,
    config: &SchemaConfig,
) -> Result<(SchemaGraph, Vec<Diagnostic>), Error> {
    let filter = TableFilter::from_config(config)?;
    let mut diagnostics = Vec::new();
    let mut graph = normalize(catalog, config, &mut diagnostics)?;
    foreign_keys::resolve(&mut graph, catalog, config, &mut diagnostics)?;
    filter.apply(&mut graph, &mut diagnostics);
    Ok((graph, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RawTable;
    use crate::model::Provenance;

    #[test]
    fn test_inferred_edge_pruned_by_filter() {
        let catalog = RawCatalog {
            schema: "public".into(),
            tables: vec![
                RawTable::new("customers").serial("id", "integer").primary_key(&["id"]),
                RawTable::new("orders")
                    .serial("id", "integer")
                    .column("customer_id", "integer", false)
                    .primary_key(&["id"]),
            ],
            enums: Vec::new(),
        };

        let (graph, _) = build_graph(&catalog, &SchemaConfig::default()).unwrap();
        let fk = &graph.table("orders").unwrap().foreign_keys[0];
        assert_eq!(fk.provenance, Provenance::Inferred);

        let config = SchemaConfig {
            exclude: vec!["customers".into()],
            ..Default::default()
        };
        let (graph, diagnostics) = build_graph(&catalog, &config).unwrap();
        assert!(graph.table("orders").unwrap().foreign_keys.is_empty());
        assert_eq!(diagnostics.len(), 1);
    }
}
