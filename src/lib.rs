//! Normalize a live database schema into a [`SchemaGraph`](model::SchemaGraph)
//! and bind ad-hoc SQL queries against it, producing a typed model for code
//! generation.

pub mod catalog;
pub mod config;
pub mod error;
pub mod export;
pub mod introspect;
pub mod model;
pub mod observer;
pub mod query;
pub mod schema;

pub use config::{Config, Engine, FkMode, PlaceholderStyle, QueryConfig, SchemaConfig};
pub use error::{Diagnostic, DiagnosticKind, Error, IntrospectionError, QueryBindError};
pub use export::Snapshot;
pub use introspect::{bind_queries, introspect, BindFailure, BindOptions, BindReport, Introspection};
pub use model::{BoundQuery, ResolvedType, SchemaGraph};
pub use observer::{NoopObserver, Observer, TracingObserver};
