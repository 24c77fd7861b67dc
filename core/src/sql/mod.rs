mod chunk;
mod tokens;

pub use chunk::*;
pub use tokens::*;

use core::fmt::{Display, Write};
use smallvec::SmallVec;
use std::borrow::Cow;

use crate::{Dialect, Value};

/// SQL fragment builder with flat chunk storage.
///
/// Uses `SmallVec<[SQLChunk; 8]>` for inline storage of typical SQL fragments
/// without heap allocation. Values only ever enter a fragment as [`SQLChunk::Param`],
/// so rendering can never splice caller data into the statement text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SQL<'a> {
    pub chunks: SmallVec<[SQLChunk<'a>; 8]>,
}

impl<'a> SQL<'a> {
    // ==================== constructors ====================

    /// Creates an empty SQL fragment
    #[inline]
    pub const fn empty() -> Self {
        Self {
            chunks: SmallVec::new_const(),
        }
    }

    /// Creates SQL with a single token
    #[inline]
    pub fn token(t: Token) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Token(t)],
        }
    }

    /// Creates SQL with a quoted identifier
    #[inline]
    pub fn ident(name: impl Into<Cow<'a, str>>) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Ident(name.into())],
        }
    }

    /// Creates SQL for a possibly namespaced table: `"ns"."table"` or `"table"`
    pub fn table(namespace: Option<&'a str>, table: &'a str) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => SQL::ident(ns).push(Token::DOT).push(SQLChunk::ident(table)),
            _ => SQL::ident(table),
        }
    }

    /// Creates SQL with raw text (unquoted)
    #[inline]
    pub fn raw(text: impl Into<Cow<'a, str>>) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Raw(text.into())],
        }
    }

    /// Creates SQL with a single integer literal.
    #[inline]
    pub fn number(value: i64) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Number(value)],
        }
    }

    /// Creates SQL with a single parameter value
    #[inline]
    pub fn param(value: impl Into<Value>) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Param(value.into())],
        }
    }

    /// Creates SQL for a function call: NAME(args)
    #[inline]
    pub fn func(name: &'static str, args: SQL<'a>) -> Self {
        let mut sql = SQL {
            chunks: smallvec::smallvec![SQLChunk::Func(Cow::Borrowed(name))],
        };
        sql.push_mut(Token::LPAREN);
        sql.append_mut(args);
        sql.push(Token::RPAREN)
    }

    // ==================== builder methods ====================

    /// Append another SQL fragment (flat extend)
    #[inline]
    pub fn append(mut self, other: impl Into<SQL<'a>>) -> Self {
        self.append_mut(other);
        self
    }

    #[inline]
    pub fn append_mut(&mut self, other: impl Into<SQL<'a>>) {
        let other = other.into();

        if self.chunks.is_empty() {
            self.chunks = other.chunks;
            return;
        }
        if other.chunks.is_empty() {
            return;
        }

        self.chunks.extend(other.chunks);
    }

    /// Push a single chunk
    #[inline]
    pub fn push(mut self, chunk: impl Into<SQLChunk<'a>>) -> Self {
        self.chunks.push(chunk.into());
        self
    }

    #[inline]
    pub fn push_mut(&mut self, chunk: impl Into<SQLChunk<'a>>) {
        self.chunks.push(chunk.into());
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    // ==================== combinators ====================

    /// Joins multiple SQL fragments with a separator
    pub fn join<T>(sqls: T, separator: Token) -> SQL<'a>
    where
        T: IntoIterator<Item = SQL<'a>>,
    {
        let mut iter = sqls.into_iter();
        let Some(mut result) = iter.next() else {
            return SQL::empty();
        };

        let (lower, _) = iter.size_hint();
        result.chunks.reserve(lower.saturating_mul(2));

        for other in iter {
            result.chunks.push(SQLChunk::Token(separator));
            result.chunks.extend(other.chunks);
        }
        result
    }

    /// Wrap in parentheses: (self)
    #[inline]
    pub fn parens(self) -> Self {
        SQL::token(Token::LPAREN).append(self).push(Token::RPAREN)
    }

    /// Creates an aliased version: self AS "name"
    pub fn alias(self, name: impl Into<Cow<'a, str>>) -> SQL<'a> {
        self.push(Token::AS).push(SQLChunk::Ident(name.into()))
    }

    /// Creates a comma-separated list of parameters.
    pub fn param_list<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let iter = values.into_iter();
        let (lower, _) = iter.size_hint();
        let mut chunks = SmallVec::with_capacity(lower.saturating_mul(2));
        for (i, v) in iter.enumerate() {
            if i > 0 {
                chunks.push(SQLChunk::Token(Token::COMMA));
            }
            chunks.push(SQLChunk::Param(v));
        }
        SQL { chunks }
    }

    /// Creates a comma-separated list of quoted identifiers.
    pub fn ident_list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'a, str>>,
    {
        let mut chunks = SmallVec::new();
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                chunks.push(SQLChunk::Token(Token::COMMA));
            }
            chunks.push(SQLChunk::Ident(name.into()));
        }
        SQL { chunks }
    }

    /// Creates a comma-separated list of column assignments: "col" = ?
    pub fn assignments<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<Cow<'a, str>>,
    {
        let iter = pairs.into_iter();
        let (lower, _) = iter.size_hint();
        // Each assignment: Ident + EQ + Param = 3 chunks, plus commas
        let mut chunks = SmallVec::with_capacity(lower.saturating_mul(4));
        for (i, (col, val)) in iter.enumerate() {
            if i > 0 {
                chunks.push(SQLChunk::Token(Token::COMMA));
            }
            chunks.push(SQLChunk::Ident(col.into()));
            chunks.push(SQLChunk::Token(Token::EQ));
            chunks.push(SQLChunk::Param(val));
        }
        SQL { chunks }
    }

    // ==================== output methods ====================

    /// Returns the SQL string with dialect-appropriate placeholders.
    pub fn sql(&self, dialect: Dialect) -> String {
        self.build(dialect).0
    }

    /// Generates the SQL string and collects parameter references in a single pass.
    pub fn build(&self, dialect: Dialect) -> (String, SmallVec<[&Value; 8]>) {
        let sql_cap = self.chunks.len().saturating_mul(8).max(128);
        let mut buf = String::with_capacity(sql_cap);
        let mut params: SmallVec<[&Value; 8]> = SmallVec::new();

        for (i, chunk) in self.chunks.iter().enumerate() {
            match chunk {
                SQLChunk::Param(value) => {
                    params.push(value);
                    dialect.write_placeholder(params.len(), &mut buf);
                }
                _ => chunk.write(&mut buf),
            }

            if self.needs_space(i) {
                let _ = buf.write_char(' ');
            }
        }

        (buf, params)
    }

    /// Simplified spacing logic
    fn needs_space(&self, index: usize) -> bool {
        let Some(next) = self.chunks.get(index + 1) else {
            return false;
        };

        let current = &self.chunks[index];
        chunk_needs_space(current, next)
    }

    /// Returns an iterator over references to parameter values
    pub fn params(&self) -> impl Iterator<Item = &Value> {
        self.chunks.iter().filter_map(|chunk| match chunk {
            SQLChunk::Param(value) => Some(value),
            _ => None,
        })
    }
}

/// Canonical spacing logic for SQL chunk rendering.
pub(crate) fn chunk_needs_space(current: &SQLChunk<'_>, next: &SQLChunk<'_>) -> bool {
    match (current, next) {
        // Function names sit flush against their argument list
        (SQLChunk::Func(_), SQLChunk::Token(Token::LPAREN)) => false,
        // No space before closing/separator punctuation
        (_, SQLChunk::Token(Token::RPAREN | Token::COMMA | Token::SEMI | Token::DOT)) => false,
        // No space after opening punctuation
        (SQLChunk::Token(Token::LPAREN | Token::DOT), _) => false,
        // Space after comma
        (SQLChunk::Token(Token::COMMA), _) => true,
        // Space after closing paren if next is word-like (e.g., ") FROM")
        (SQLChunk::Token(Token::RPAREN), next) => next.is_word_like(),
        // Space before opening paren if preceded by word-like (e.g., "IN (")
        (current, SQLChunk::Token(Token::LPAREN)) => current.is_word_like(),
        // Space around comparison operators
        (SQLChunk::Token(t), _) if t.is_operator() => true,
        (_, SQLChunk::Token(t)) if t.is_operator() => true,
        // Space between all word-like chunks
        _ => current.is_word_like() && next.is_word_like(),
    }
}

// ==================== trait implementations ====================

impl<'a> From<Token> for SQL<'a> {
    fn from(value: Token) -> Self {
        SQL::token(value)
    }
}

impl<'a> Display for SQL<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (sql, params) = self.build(Dialect::SQLite);
        write!(f, r#"sql: "{}", params: {:?}"#, sql, params)
    }
}

impl<'a, T> FromIterator<T> for SQL<'a>
where
    SQLChunk<'a>: From<T>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let chunks = SmallVec::from_iter(iter.into_iter().map(SQLChunk::from));
        Self { chunks }
    }
}

impl<'a> IntoIterator for SQL<'a> {
    type Item = SQLChunk<'a>;
    type IntoIter = smallvec::IntoIter<[SQLChunk<'a>; 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.into_iter()
    }
}
