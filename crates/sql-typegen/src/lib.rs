//! sql-typegen: build-time analysis of SQL query files against a
//! migration-derived schema.
//!
//! The pipeline has three stages: a DDL interpreter accumulates a simulated
//! catalog from migration files, a type-inferring analyzer derives input
//! parameters and result columns for each query file, and a reconciler
//! checks the inferred shapes against application models. Code emission and
//! file handling live in the CLI crate; this crate works on strings and
//! returns values.

mod analyze;

pub mod catalog;
pub mod error;
pub mod migrate;
pub mod model;
pub mod query;
pub mod reconcile;
pub mod types;

pub use catalog::{Catalog, Column, DataType, Table, TableName};
pub use error::{Error, Result};
pub use migrate::migrate;
pub use model::{Model, Schema, SchemaType};
pub use query::{parse_query, Query, QueryInput, QueryOutput, QueryParam};
pub use reconcile::{match_input, match_output, resolve_ref, SchemaPath};
pub use types::{rust_type_for, RustType};
