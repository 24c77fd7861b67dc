//! Relational store seam: opening connections and running rendered fragments.

#[cfg(feature = "rusqlite")]
pub mod rusqlite;

use restsql_core::{Dialect, ExecContext, Result, SQL, Value};

/// A source of connections.
///
/// Every transaction runs on its own connection, so independent transactions
/// (`RequiredNew`) never share state with the ambient one.
pub trait Store: Send + Sync {
    type Conn: Connection;

    fn dialect(&self) -> Dialect;

    /// Opens a connection whose statements abort once `ctx` is done.
    fn connect(&self, ctx: &ExecContext) -> Result<Self::Conn>;
}

/// A single connection to the store.
pub trait Connection {
    fn dialect(&self) -> Dialect;

    /// Runs a transaction-control statement (`BEGIN`, `SAVEPOINT`, ...).
    ///
    /// Never interrupted by the bound context, so rollbacks always get through.
    fn execute_control(&self, sql: &str) -> Result<()>;

    /// Runs a statement that returns no rows; yields the affected row count.
    fn execute(&self, sql: &SQL<'_>) -> Result<usize>;

    /// Runs a statement and returns every row, one value per column.
    fn query(&self, sql: &SQL<'_>) -> Result<Vec<Vec<Value>>>;

    /// Replaces the context that interrupts in-flight statements, returning the
    /// previous one.
    fn bind_context(&self, ctx: Option<ExecContext>) -> Option<ExecContext>;
}
