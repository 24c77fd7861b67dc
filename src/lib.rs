//! # restsql
//!
//! A REST-to-relational execution engine: turns a CRUD query descriptor (resource,
//! action, key, pagination, selection, sort and a boolean filter tree) into
//! parameterized statements and runs them inside a correctly scoped transaction.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use restsql::prelude::*;
//! use restsql::rusqlite::SqliteStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::builder()
//!     .define(
//!         "todos",
//!         EntitySchema::builder("todos")
//!             .field(FieldDef::new("id", FieldKind::Integer).primary().generated())
//!             .field(FieldDef::new("title", FieldKind::Text))
//!             .field(FieldDef::new("done", FieldKind::Bool)),
//!         ActionSet::ALL,
//!     )?
//!     .build()?;
//!
//! let engine = Engine::new(registry, SqliteStore::open("todos.db"));
//! engine.create_tables()?;
//!
//! engine.execute(
//!     RestQuery::new("todos", Action::Create)
//!         .body("application/json", br#"{"title": "buy milk"}"#.to_vec()),
//! )?;
//!
//! let open = engine.execute(
//!     RestQuery::new("todos", Action::Fetch)
//!         .filter(Filter::eq("done", false))
//!         .sort([Sort::asc("title")]),
//! )?;
//! assert_eq!(open.page().map(|p| p.count), Some(1));
//! # Ok(())
//! # }
//! ```
//!
//! ## Propagation
//!
//! | Mode          | Ambient transaction | Without one         | Failure of the call         |
//! |---------------|---------------------|---------------------|-----------------------------|
//! | `Current`     | joined              | opened and finished | returned                    |
//! | `Mandatory`   | joined              | error               | returned                    |
//! | `RequiredNew` | ignored             | opened and finished | returned                    |
//! | `Savepoint`   | joined + savepoint  | opened + savepoint  | rolled back, `Absorbed`     |

pub mod codec;
pub mod compile;
pub mod config;
pub mod engine;
pub mod executor;
pub mod registry;
pub mod store;
pub mod transaction;

// =============================================================================
// Root-level exports
// =============================================================================

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, Output, Response};
pub use registry::{Registry, RegistryBuilder, RegistryError};
pub use store::{Connection, Store};
pub use transaction::{Outcome, Propagation, Transactional, Tx};

/// Core building blocks shared by every store.
pub use restsql_core as core;

pub use restsql_core::{Error, ErrorKind, Result};

// =============================================================================
// SQLite store
// =============================================================================

/// Bundled SQLite store.
#[cfg(feature = "rusqlite")]
pub mod rusqlite {
    pub use crate::store::rusqlite::{SqliteConnection, SqliteStore, unaccent};
}

// =============================================================================
// Prelude
// =============================================================================

pub mod prelude {
    pub use crate::engine::{Engine, Output};
    pub use crate::registry::Registry;
    pub use crate::transaction::{Outcome, Propagation};
    pub use restsql_core::{
        Action, ActionSet, Combinator, Entity, EntitySchema, Error, ErrorKind, ExecContext,
        FieldDef, FieldKind, Filter, FilterValue, Op, Page, RelationDef, Related, RestQuery, Sort,
        Value,
    };
}
