use std::borrow::Cow;

use super::tokens::Token;
use crate::Value;

/// A SQL chunk represents a part of an SQL statement.
///
/// - `Token` - SQL keywords and operators (SELECT, FROM, =, etc.)
/// - `Ident` - Quoted identifiers ("table_name", "column_name")
/// - `Raw` - Unquoted raw SQL text
/// - `Func` - Function name, rendered flush against its argument list
/// - `Number` - Integer literal (LIMIT/OFFSET values)
/// - `Param` - Bound parameter, rendered as a dialect placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum SQLChunk<'a> {
    /// SQL keywords and operators: SELECT, FROM, WHERE, =, AND, etc.
    Token(Token),

    /// Quoted identifier for user-provided names
    /// Renders as: "name" with embedded quotes doubled
    Ident(Cow<'a, str>),

    /// Raw SQL text (unquoted)
    Raw(Cow<'a, str>),

    /// Function name: renders as `name` with no space before the following `(`
    Func(Cow<'a, str>),

    /// Integer literal
    Number(i64),

    /// Parameter value, never rendered inline
    Param(Value),
}

impl<'a> SQLChunk<'a> {
    #[inline]
    pub const fn token(t: Token) -> Self {
        Self::Token(t)
    }

    #[inline]
    pub const fn ident_static(name: &'static str) -> Self {
        Self::Ident(Cow::Borrowed(name))
    }

    #[inline]
    pub fn ident(name: impl Into<Cow<'a, str>>) -> Self {
        Self::Ident(name.into())
    }

    #[inline]
    pub fn raw(text: impl Into<Cow<'a, str>>) -> Self {
        Self::Raw(text.into())
    }

    #[inline]
    pub fn param(value: impl Into<Value>) -> Self {
        Self::Param(value.into())
    }

    /// Write chunk content to buffer. Parameters are handled by the caller since
    /// their rendering depends on position and dialect.
    pub(crate) fn write(&self, buf: &mut impl core::fmt::Write) {
        match self {
            SQLChunk::Token(token) => {
                let _ = buf.write_str(token.as_str());
            }
            SQLChunk::Ident(name) => write_ident(buf, name),
            SQLChunk::Raw(text) | SQLChunk::Func(text) => {
                let _ = buf.write_str(text);
            }
            SQLChunk::Number(n) => {
                let _ = write!(buf, "{}", n);
            }
            SQLChunk::Param(_) => {
                let _ = buf.write_char('?');
            }
        }
    }

    /// Check if this chunk is "word-like" (needs space separation from other word-like chunks)
    #[inline]
    pub(crate) const fn is_word_like(&self) -> bool {
        match self {
            SQLChunk::Token(t) => !matches!(
                t,
                Token::LPAREN
                    | Token::RPAREN
                    | Token::COMMA
                    | Token::SEMI
                    | Token::DOT
                    | Token::EQ
                    | Token::NE
                    | Token::LT
                    | Token::GT
                    | Token::LE
                    | Token::GE
            ),
            SQLChunk::Ident(_)
            | SQLChunk::Raw(_)
            | SQLChunk::Func(_)
            | SQLChunk::Number(_)
            | SQLChunk::Param(_) => true,
        }
    }
}

/// Writes `name` as a double-quoted identifier, doubling embedded quotes.
pub(crate) fn write_ident(buf: &mut impl core::fmt::Write, name: &str) {
    let _ = buf.write_char('"');
    for part in name.split_inclusive('"') {
        let _ = buf.write_str(part);
        if part.ends_with('"') {
            let _ = buf.write_char('"');
        }
    }
    let _ = buf.write_char('"');
}

impl<'a> From<Token> for SQLChunk<'a> {
    #[inline]
    fn from(value: Token) -> Self {
        Self::Token(value)
    }
}

impl<'a> From<Value> for SQLChunk<'a> {
    #[inline]
    fn from(value: Value) -> Self {
        Self::Param(value)
    }
}
