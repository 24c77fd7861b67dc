//! Store and transaction events.
//!
//! The macros expand to `tracing` events when the *invoking* crate enables its
//! `tracing` feature and to nothing otherwise. Events go to the `restsql::store`
//! and `restsql::transaction` targets so they can be filtered apart from the
//! engine's request events.

/// Debug event for one statement sent to the store.
///
/// ```ignore
/// restsql_trace_query!(Dialect::SQLite, &sql_str, params.len());
/// ```
#[macro_export]
macro_rules! restsql_trace_query {
    ($dialect:expr, $sql:expr, $param_count:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            target: "restsql::store",
            dialect = %$dialect,
            sql = %$sql,
            params = $param_count,
            "restsql.query"
        );
    };
}

/// Info event for a transaction boundary. Savepoint events carry the
/// savepoint name.
///
/// ```ignore
/// restsql_trace_tx!("commit", conn.dialect());
/// restsql_trace_tx!("release", conn.dialect(), savepoint = name);
/// ```
#[macro_export]
macro_rules! restsql_trace_tx {
    ($event:literal, $dialect:expr) => {
        #[cfg(feature = "tracing")]
        tracing::info!(
            target: "restsql::transaction",
            event = $event,
            dialect = %$dialect,
            "restsql.transaction"
        );
    };
    ($event:literal, $dialect:expr, savepoint = $name:expr) => {
        #[cfg(feature = "tracing")]
        tracing::info!(
            target: "restsql::transaction",
            event = $event,
            dialect = %$dialect,
            savepoint = %$name,
            "restsql.transaction"
        );
    };
}
