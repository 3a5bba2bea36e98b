//! Query binding against a [`SchemaGraph`](crate::model::SchemaGraph).

pub mod ast;
pub mod binder;
pub mod fields;
pub mod lexer;
pub mod parser;
pub mod placeholder;
pub mod strip;

pub use binder::{Binder, TypeOverride};
pub use parser::parse_single;
