//! Dialect-agnostic building blocks of the restsql engine: the SQL fragment
//! builder, values, filter trees, query descriptors, schema descriptors and the
//! error taxonomy.

pub mod action;
pub mod context;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod filter;
pub mod query;
pub mod schema;
pub mod sql;
pub mod tracing;
pub mod value;

pub use action::{Action, ActionSet};
pub use context::ExecContext;
pub use dialect::Dialect;
pub use entity::{Entity, Page, Related};
pub use error::{Error, ErrorKind, Result};
pub use filter::{Combinator, Filter, FilterError, FilterValue, Op};
pub use query::{RestQuery, Sort};
pub use schema::{
    CoerceError, EntitySchema, EntitySchemaBuilder, FieldDef, FieldKind, RelationDef,
    RelationKind, Resource, SchemaError,
};
pub use sql::{SQL, SQLChunk, Token};
pub use value::Value;
