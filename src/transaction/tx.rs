use std::time::{SystemTime, UNIX_EPOCH};

use restsql_core::{Dialect, Result, SQL, Value, restsql_trace_tx};

use crate::store::Connection;

/// An open transaction on its own connection.
///
/// Consumed by [`Tx::commit`] or [`Tx::rollback`]; a transaction dropped without
/// either is rolled back by the store when its connection closes.
#[derive(Debug)]
pub struct Tx<C: Connection> {
    conn: C,
}

impl<C: Connection> Tx<C> {
    /// Issues `BEGIN` on a fresh connection.
    pub(crate) fn begin(conn: C) -> Result<Self> {
        conn.execute_control("BEGIN")?;
        restsql_trace_tx!("begin", conn.dialect());
        Ok(Self { conn })
    }

    /// Gets a reference to the underlying connection
    #[inline]
    pub fn conn(&self) -> &C {
        &self.conn
    }

    #[inline]
    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    /// Executes a statement inside the transaction.
    pub fn execute(&self, sql: &SQL<'_>) -> Result<usize> {
        self.conn.execute(sql)
    }

    /// Runs a query inside the transaction and returns every row.
    pub fn query(&self, sql: &SQL<'_>) -> Result<Vec<Vec<Value>>> {
        self.conn.query(sql)
    }

    pub fn commit(self) -> Result<()> {
        self.conn.execute_control("COMMIT")?;
        restsql_trace_tx!("commit", self.conn.dialect());
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.conn.execute_control("ROLLBACK")?;
        restsql_trace_tx!("rollback", self.conn.dialect());
        Ok(())
    }

    pub(crate) fn savepoint(&self, name: &str) -> Result<()> {
        self.conn.execute_control(&format!("SAVEPOINT {name}"))?;
        restsql_trace_tx!("savepoint", self.conn.dialect(), savepoint = name);
        Ok(())
    }

    pub(crate) fn release(&self, name: &str) -> Result<()> {
        self.conn.execute_control(&format!("RELEASE SAVEPOINT {name}"))?;
        restsql_trace_tx!("release", self.conn.dialect(), savepoint = name);
        Ok(())
    }

    /// Rolls back to the savepoint, then releases it so it no longer nests.
    pub(crate) fn rollback_to(&self, name: &str) -> Result<()> {
        self.conn
            .execute_control(&format!("ROLLBACK TO SAVEPOINT {name}"))?;
        restsql_trace_tx!("rollback_to", self.conn.dialect(), savepoint = name);
        self.release(name)
    }
}

/// Unique savepoint name: `sp` + hex nanos + hex random.
pub(crate) fn savepoint_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    format!("sp{:x}{:x}", nanos, rand::random::<u64>())
}
