use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Engine;
use crate::error::Diagnostic;
use crate::introspect::{BindFailure, BindReport, Introspection};
use crate::model::{BoundQuery, SchemaGraph};

/// Everything one run produced, ready for code emission.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub engine: Engine,
    pub schema: SchemaGraph,
    pub queries: Vec<BoundQuery>,
    pub failures: Vec<BindFailure>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Snapshot {
    pub fn new(engine: Engine, introspection: Introspection, report: BindReport) -> Self {
        Self {
            generated_at: Utc::now(),
            engine,
            schema: introspection.graph,
            queries: report.queries,
            failures: report.failures,
            diagnostics: introspection.diagnostics,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
