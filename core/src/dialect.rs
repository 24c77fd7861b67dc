//! SQL dialects the compiler can lower to.

use core::fmt::Write;

/// SQL dialect for database-specific rendering
///
/// Each dialect has different placeholder syntax and different spellings for the
/// pattern-matching operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// SQLite - uses `?` positional placeholders
    #[default]
    SQLite,

    /// PostgreSQL - uses `$1, $2, ...` numbered placeholders
    PostgreSQL,
}

impl Dialect {
    /// Returns `true` if this dialect uses numbered placeholders (`$1, $2, ...`)
    #[inline]
    #[must_use]
    pub const fn uses_numbered_placeholders(&self) -> bool {
        matches!(self, Dialect::PostgreSQL)
    }

    /// Writes the placeholder for the given 1-based parameter index.
    #[inline]
    pub fn write_placeholder(&self, index: usize, buf: &mut impl Write) {
        match self {
            Dialect::PostgreSQL => {
                let _ = write!(buf, "${}", index);
            }
            Dialect::SQLite => {
                let _ = buf.write_char('?');
            }
        }
    }

    /// Most bound parameters a single statement may carry.
    #[inline]
    pub const fn max_params(&self) -> usize {
        match self {
            Dialect::SQLite => 32_766,
            Dialect::PostgreSQL => 65_535,
        }
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dialect::SQLite => "sqlite",
            Dialect::PostgreSQL => "postgresql",
        }
    }
}

impl core::fmt::Display for Dialect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
