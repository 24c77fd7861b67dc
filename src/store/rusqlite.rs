use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use restsql_core::{Dialect, Error, ExecContext, Result, SQL, Value, restsql_trace_query};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::params_from_iter;

use super::{Connection, Store};
use crate::compile::similar_to_regex;

/// VM instructions between two cancellation checks.
const PROGRESS_OPS: i32 = 1_000;

/// File-backed SQLite store, one fresh connection per transaction.
///
/// Namespaces map to attached databases, see [`SqliteStore::attach`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
    wal: bool,
    attached: Vec<(String, PathBuf)>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
            wal: true,
            attached: Vec::new(),
        }
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Write-ahead logging lets readers proceed alongside one writer.
    pub fn wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    /// Attaches `path` as namespace `name` on every connection.
    pub fn attach(mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.attached.push((name.into(), path.as_ref().to_path_buf()));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for SqliteStore {
    type Conn = SqliteConnection;

    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn connect(&self, ctx: &ExecContext) -> Result<SqliteConnection> {
        ctx.check()?;

        let conn = rusqlite::Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        if self.wal {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        }
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update(None, "case_sensitive_like", true)?;
        for (name, path) in &self.attached {
            let path = path.to_string_lossy();
            conn.execute("ATTACH DATABASE ?1 AS ?2", [&*path, name.as_str()])?;
        }
        register_functions(&conn)?;

        let context = Arc::new(Mutex::new(Some(ctx.clone())));
        let watched = Arc::clone(&context);
        conn.progress_handler(
            PROGRESS_OPS,
            Some(move || {
                watched
                    .lock()
                    .map(|ctx| ctx.as_ref().is_some_and(ExecContext::is_done))
                    .unwrap_or(false)
            }),
        );

        Ok(SqliteConnection { conn, context })
    }
}

/// A rusqlite connection plus the context its progress handler watches.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    context: Arc<Mutex<Option<ExecContext>>>,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl SqliteConnection {
    /// Gets a reference to the underlying connection
    #[inline]
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn execute_control(&self, sql: &str) -> Result<()> {
        let suspended = self.bind_context(None);
        let result = self.conn.execute_batch(sql);
        self.bind_context(suspended);
        result.map_err(Into::into)
    }

    fn execute(&self, sql: &SQL<'_>) -> Result<usize> {
        let (sql_str, params) = sql.build(Dialect::SQLite);
        restsql_trace_query!(Dialect::SQLite, &sql_str, params.len());

        Ok(self.conn.execute(&sql_str, params_from_iter(params))?)
    }

    fn query(&self, sql: &SQL<'_>) -> Result<Vec<Vec<Value>>> {
        let (sql_str, params) = sql.build(Dialect::SQLite);
        restsql_trace_query!(Dialect::SQLite, &sql_str, params.len());

        let mut stmt = self.conn.prepare(&sql_str)?;
        let columns = stmt.column_count();
        let rows = stmt.query_map(params_from_iter(params), |row| {
            (0..columns)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn bind_context(&self, ctx: Option<ExecContext>) -> Option<ExecContext> {
        match self.context.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, ctx),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), ctx),
        }
    }
}

// ==================== scalar functions ====================

fn register_functions(conn: &rusqlite::Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("similar_to", 2, flags, |ctx| {
        if matches!(ctx.get_raw(0), ValueRef::Null) || matches!(ctx.get_raw(1), ValueRef::Null) {
            return Ok(None);
        }
        let pattern: Arc<Regex> = ctx.get_or_create_aux(1, |pattern| -> Result<Regex> {
            let pattern = pattern
                .as_str()
                .map_err(|e| Error::internal("similar_to pattern is not text").with_cause(e))?;
            similar_to_regex(pattern)
        })?;
        let text: String = ctx.get(0)?;
        Ok(Some(pattern.is_match(&text)))
    })?;

    conn.create_scalar_function("unaccent", 1, flags, |ctx| {
        let text: Option<String> = ctx.get(0)?;
        Ok(text.map(|t| unaccent(&t)))
    })?;

    Ok(())
}

/// Folds Latin accented letters to their unaccented base letters.
pub fn unaccent(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match fold_accent(c) {
            Some(folded) => out.push_str(folded),
            None => out.push(c),
        }
    }
    out
}

fn fold_accent(c: char) -> Option<&'static str> {
    Some(match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'Æ' => "AE",
        'æ' => "ae",
        'Ç' | 'Ć' | 'Ĉ' | 'Ċ' | 'Č' => "C",
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'Ď' | 'Đ' | 'Ð' => "D",
        'ď' | 'đ' | 'ð' => "d",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => "E",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => "G",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'Ĥ' | 'Ħ' => "H",
        'ĥ' | 'ħ' => "h",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => "I",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'Ĵ' => "J",
        'ĵ' => "j",
        'Ķ' => "K",
        'ķ' => "k",
        'Ĺ' | 'Ļ' | 'Ľ' | 'Ŀ' | 'Ł' => "L",
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => "l",
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => "N",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ŏ' | 'Ő' => "O",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => "o",
        'Œ' => "OE",
        'œ' => "oe",
        'Ŕ' | 'Ŗ' | 'Ř' => "R",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'Ś' | 'Ŝ' | 'Ş' | 'Š' => "S",
        'ś' | 'ŝ' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'Ţ' | 'Ť' | 'Ŧ' => "T",
        'ţ' | 'ť' | 'ŧ' => "t",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => "U",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'Ŵ' => "W",
        'ŵ' => "w",
        'Ý' | 'Ÿ' | 'Ŷ' => "Y",
        'ý' | 'ÿ' | 'ŷ' => "y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaccent_folds_latin() {
        assert_eq!(unaccent("Crème Brûlée"), "Creme Brulee");
        assert_eq!(unaccent("Straße"), "Strasse");
        assert_eq!(unaccent("plain"), "plain");
    }

    #[test]
    fn functions_are_registered() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("fn.db"));
        let conn = store.connect(&ExecContext::new()).unwrap();
        let rows = conn
            .query(&SQL::raw(
                "SELECT similar_to('abc', '%b%'), unaccent('Café'), similar_to(NULL, 'a'), 'a' LIKE 'A'",
            ))
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Value::Integer(1),
                Value::Text("Cafe".into()),
                Value::Null,
                Value::Integer(0),
            ]]
        );
    }
}
