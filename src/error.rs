//! Error types for introspection, binding and configuration.
//!
//! Structural failures ([`IntrospectionError`]) abort the whole run. Binding
//! failures ([`QueryBindError`]) are scoped to a single query and collected
//! next to the successfully bound ones. Non-fatal findings are reported as
//! [`Diagnostic`]s instead of errors.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Top-level error returned by the async entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Introspection(#[from] IntrospectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The caller-supplied cancellation token fired before the work finished.
    #[error("operation cancelled")]
    Cancelled,
}

/// Malformed or self-contradictory catalog data.
#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("schema {schema:?} contains no tables or views")]
    EmptySchema { schema: String },

    #[error("{context} references unknown table {table:?}")]
    UnknownTable { table: String, context: String },

    #[error("{context} references unknown column {table}.{column}")]
    UnknownColumn {
        table: String,
        column: String,
        context: String,
    },

    #[error("table {table:?} reports ordinal position {ordinal} for both {first:?} and {second:?}")]
    DuplicateOrdinal {
        table: String,
        ordinal: i32,
        first: String,
        second: String,
    },

    #[error("table {table:?} reports column {column:?} twice")]
    DuplicateColumn { table: String, column: String },

    #[error("table {table:?} reports more than one primary key ({first:?}, {second:?})")]
    MultiplePrimaryKeys {
        table: String,
        first: String,
        second: String,
    },

    #[error("constraint {constraint:?} on table {table:?} is malformed: {reason}")]
    MalformedConstraint {
        table: String,
        constraint: String,
        reason: String,
    },

    /// The catalog reader itself failed.
    #[error("catalog {operation} failed{}: {source}", table_suffix(.table))]
    Catalog {
        operation: &'static str,
        table: Option<String>,
        #[source]
        source: anyhow::Error,
    },
}

fn table_suffix(table: &Option<String>) -> String {
    table
        .as_ref()
        .map(|t| format!(" for table {t:?}"))
        .unwrap_or_default()
}

/// A single query text that could not be bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryBindError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error("unterminated placeholder starting at byte {offset}")]
    UnterminatedPlaceholder { offset: usize },

    #[error("placeholder at byte {offset} has no name")]
    EmptyPlaceholder { offset: usize },

    #[error("placeholder {text:?} at byte {offset} cannot be assigned a position")]
    InvalidPlaceholder { text: String, offset: usize },

    #[error("parameter position {position} is never used (highest is {highest})")]
    MissingPosition { position: usize, highest: usize },

    #[error("parameter {name:?} is declared as both {first:?} and {second:?}")]
    ConflictingParameterType {
        name: String,
        first: String,
        second: String,
    },

    #[error("malformed type decoration {fragment:?}")]
    MalformedCast { fragment: String },

    #[error("SQL parse error: {0}")]
    Parse(String),

    #[error("cannot expand {qualifier}*: relation is not part of the schema; declare the fields explicitly")]
    UnresolvedWildcard { qualifier: String },

    #[error("invalid field list: {0}")]
    InvalidFields(String),

    #[error("statement does not return rows, but mode {mode} expects results")]
    NoResultSet { mode: String },
}

/// Configuration that cannot be used as given.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("query {name:?} has neither inline sql nor a path")]
    MissingQueryText { name: String },

    #[error("foreign key suffix must not be empty")]
    EmptyForeignKeySuffix,

    #[error("placeholder delimiter must not be empty")]
    EmptyDelimiter,
}

/// Categories of non-fatal findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A column matched several equally good inference targets and was skipped.
    AmbiguousInference,
    /// A foreign key was removed because its target is not in the graph.
    DroppedForeignKey,
    /// The catalog reported the same table twice.
    DuplicateTable,
    /// A primary key was assembled from per-column flags.
    SynthesizedPrimaryKey,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::AmbiguousInference => write!(f, "ambiguous inference"),
            DiagnosticKind::DroppedForeignKey => write!(f, "dropped foreign key"),
            DiagnosticKind::DuplicateTable => write!(f, "duplicate table"),
            DiagnosticKind::SynthesizedPrimaryKey => write!(f, "synthesized primary key"),
        }
    }
}

/// A non-fatal finding attached to a run's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            column: None,
            message: message.into(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(
                f,
                "{}: {}.{}: {}",
                self.kind, self.table, column, self.message
            ),
            None => write!(f, "{}: {}: {}", self.kind, self.table, self.message),
        }
    }
}
