//! Canonical schema graph and bound query types.
//!
//! This is the contract handed to code emission. Every type is plain data:
//! foreign keys refer to tables and columns by name, so self-referencing and
//! mutually-referencing tables need no special handling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical key for case-insensitive identifier matching.
///
/// Original casing is preserved on the entities themselves; keys are only
/// used for lookups and map ordering.
pub fn ident_key(name: &str) -> String {
    name.to_lowercase()
}

/// Whether two identifiers name the same entity.
pub fn ident_eq(a: &str, b: &str) -> bool {
    ident_key(a) == ident_key(b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    #[default]
    Table,
    View,
    MaterializedView,
    ForeignTable,
}

impl TableKind {
    pub fn is_view(&self) -> bool {
        matches!(self, TableKind::View | TableKind::MaterializedView)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    /// Driver-native type spelling, e.g. `integer` or `character varying`.
    pub data_type: String,
    pub nullable: bool,
    pub ordinal: i32,
    pub has_default: bool,
    /// Serial / auto-increment / identity column.
    pub is_sequence: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

impl Index {
    /// True when the index covers exactly `columns`, in any order.
    pub fn covers(&self, columns: &[String]) -> bool {
        self.columns.len() == columns.len()
            && columns
                .iter()
                .all(|c| self.columns.iter().any(|ic| ident_eq(ic, c)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Declared by a catalog constraint.
    Explicit,
    /// Derived from column naming conventions.
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
    /// Ordered by ordinal position.
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| ident_eq(&c.name, name))
    }

    pub fn primary_key(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.primary)
    }

    /// The sole primary-key column, when the primary key has exactly one.
    pub fn identity_column(&self) -> Option<&Column> {
        match self.primary_key() {
            Some(pk) if pk.columns.len() == 1 => self.column(&pk.columns[0]),
            _ => None,
        }
    }

    /// Whether `columns` form the primary key or a unique index.
    pub fn is_unique_key(&self, columns: &[String]) -> bool {
        self.indexes
            .iter()
            .any(|i| (i.primary || i.unique) && i.covers(columns))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

/// The normalized schema: tables keyed by canonical name, plus enum types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SchemaGraph {
    pub schema: String,
    pub tables: BTreeMap<String, Table>,
    pub enums: BTreeMap<String, EnumType>,
}

impl SchemaGraph {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            ..Default::default()
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&ident_key(name))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(&ident_key(name))
    }

    pub fn enum_type(&self, name: &str) -> Option<&EnumType> {
        self.enums.get(&ident_key(name))
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&Table, &ForeignKey)> {
        self.tables
            .values()
            .flat_map(|t| t.foreign_keys.iter().map(move |fk| (t, fk)))
    }
}

/// How a bound query is executed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// No result rows are read.
    Exec,
    /// At most one row.
    One,
    /// Any number of rows.
    #[default]
    Many,
}

impl ExecMode {
    pub fn returns_rows(&self) -> bool {
        !matches!(self, ExecMode::Exec)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecMode::Exec => "exec",
            ExecMode::One => "one",
            ExecMode::Many => "many",
        }
    }
}

/// The type assigned to a parameter or result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "name", rename_all = "snake_case")]
pub enum ResolvedType {
    /// Type of a catalog column.
    Native(String),
    /// Type written by the query author (decoration, placeholder, field list).
    Declared(String),
    /// Computed expression whose type cannot be looked up.
    Opaque,
}

impl ResolvedType {
    pub fn name(&self) -> Option<&str> {
        match self {
            ResolvedType::Native(t) | ResolvedType::Declared(t) => Some(t),
            ResolvedType::Opaque => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, ResolvedType::Opaque)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    /// 1-based position in bind order.
    pub position: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ResolvedType,
    /// Substituted textually instead of bound at runtime.
    pub interpolate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ResolvedType,
    pub nullable: bool,
}

/// A query text with resolved parameter and result-column types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundQuery {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub func_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub func_comment: Option<String>,
    /// Text as supplied.
    pub sql: String,
    /// Text to hand downstream: trimmed, stripped, native bind markers.
    pub text: String,
    pub mode: ExecMode,
    pub flat: bool,
    pub params: Vec<Parameter>,
    pub columns: Vec<ResultColumn>,
}

impl BoundQuery {
    pub fn returns_rows(&self) -> bool {
        self.mode.returns_rows()
    }

    pub fn single_row(&self) -> bool {
        self.mode == ExecMode::One
    }

    pub fn has_interpolation(&self) -> bool {
        self.params.iter().any(|p| p.interpolate)
    }
}
