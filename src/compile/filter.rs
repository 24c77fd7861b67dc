//! Lowering of filter trees into `WHERE` predicates.

use regex::Regex;
use restsql_core::{
    Combinator, Dialect, EntitySchema, Error, FieldDef, Filter, FilterValue, Op, Result, SQL,
    Token, Value,
};

/// Lowers `filter` against `schema`.
///
/// Returns `None` when the tree imposes no restriction (only empty groups).
/// Every group renders parenthesized with its children joined by the group's
/// combinator, so nesting in the tree is exactly the nesting of the predicate.
/// Attributes render as quoted identifiers and values only ever as parameters.
pub fn lower<'a>(
    filter: &'a Filter,
    schema: &'a EntitySchema,
    resource: &str,
    dialect: Dialect,
) -> Result<Option<SQL<'a>>> {
    match filter {
        Filter::Group {
            combinator,
            children,
        } => {
            let mut parts = Vec::with_capacity(children.len());
            for child in children {
                if let Some(part) = lower(child, schema, resource, dialect)? {
                    parts.push(part);
                }
            }
            if parts.is_empty() {
                return Ok(None);
            }
            Ok(Some(SQL::join(parts, combinator_token(*combinator)).parens()))
        }
        Filter::Predicate {
            attribute,
            op,
            value,
        } => {
            let field = schema.field(attribute).ok_or_else(|| {
                Error::bad_request(format!(
                    "unknown attribute '{attribute}' for resource '{resource}'"
                ))
            })?;
            predicate(field, *op, value, dialect).map(Some)
        }
    }
}

#[inline]
const fn combinator_token(combinator: Combinator) -> Token {
    match combinator {
        Combinator::And => Token::AND,
        Combinator::Or => Token::OR,
    }
}

fn predicate<'a>(field: &'a FieldDef, op: Op, value: &FilterValue, dialect: Dialect) -> Result<SQL<'a>> {
    let column = || SQL::ident(field.name.as_str());

    let sql = match op {
        Op::IsNull => column().push(Token::IS).push(Token::NULL),
        Op::IsNotNull => column().push(Token::IS).push(Token::NOT).push(Token::NULL),

        Op::Eq | Op::Neq | Op::Gt | Op::Gte | Op::Lt | Op::Lte => {
            let value = coerce(field, op, scalar(field, op, value)?.clone())?;
            let cmp = match op {
                Op::Eq => Token::EQ,
                Op::Neq => Token::NE,
                Op::Gt => Token::GT,
                Op::Gte => Token::GE,
                Op::Lt => Token::LT,
                _ => Token::LE,
            };
            column().push(cmp).push(value)
        }

        Op::In | Op::NotIn => {
            let FilterValue::List(values) = value else {
                return Err(Error::bad_request(format!(
                    "operator '{op}' on '{}' requires a list value",
                    field.name
                )));
            };
            if values.is_empty() {
                // x IN () matches nothing, x NOT IN () matches everything
                let constant = if op == Op::In { Token::FALSE } else { Token::TRUE };
                return Ok(SQL::token(constant));
            }
            let values = values
                .iter()
                .map(|v| coerce(field, op, v.clone()))
                .collect::<Result<Vec<_>>>()?;
            let mut sql = column();
            if op == Op::NotIn {
                sql.push_mut(Token::NOT);
            }
            sql.push(Token::IN).append(SQL::param_list(values).parens())
        }

        Op::Like | Op::NotLike => {
            let pattern = pattern(field, op, value)?;
            negate_infix(column(), op == Op::NotLike, Token::LIKE).push(pattern)
        }

        Op::ILike | Op::NotILike => {
            let pattern = pattern(field, op, value)?;
            let negated = op == Op::NotILike;
            match dialect {
                Dialect::PostgreSQL => negate_infix(column(), negated, Token::ILIKE).push(pattern),
                Dialect::SQLite => negate_infix(SQL::func("lower", column()), negated, Token::LIKE)
                    .append(SQL::func("lower", SQL::param(pattern))),
            }
        }

        Op::UnaccentILike | Op::NotUnaccentILike => {
            let pattern = pattern(field, op, value)?;
            let negated = op == Op::NotUnaccentILike;
            let unaccented = SQL::func("unaccent", column());
            let unaccented_pattern = SQL::func("unaccent", SQL::param(pattern));
            match dialect {
                Dialect::PostgreSQL => {
                    negate_infix(unaccented, negated, Token::ILIKE).append(unaccented_pattern)
                }
                Dialect::SQLite => {
                    negate_infix(SQL::func("lower", unaccented), negated, Token::LIKE)
                        .append(SQL::func("lower", unaccented_pattern))
                }
            }
        }

        Op::Similar | Op::NotSimilar => {
            let pattern = pattern(field, op, value)?;
            if let Value::Text(text) = &pattern {
                similar_to_regex(text)?;
            }
            let negated = op == Op::NotSimilar;
            match dialect {
                Dialect::PostgreSQL => negate_infix(column(), negated, Token::SIMILAR)
                    .push(Token::TO)
                    .push(pattern),
                Dialect::SQLite => {
                    let call = SQL::func("similar_to", column().push(Token::COMMA).push(pattern));
                    if negated {
                        SQL::token(Token::NOT).append(call)
                    } else {
                        call
                    }
                }
            }
        }
    };
    Ok(sql)
}

/// `lhs [NOT] op`
fn negate_infix<'a>(lhs: SQL<'a>, negated: bool, op: Token) -> SQL<'a> {
    if negated {
        lhs.push(Token::NOT).push(op)
    } else {
        lhs.push(op)
    }
}

fn scalar<'v>(field: &FieldDef, op: Op, value: &'v FilterValue) -> Result<&'v Value> {
    match value {
        FilterValue::Scalar(value) => Ok(value),
        FilterValue::List(_) => Err(Error::bad_request(format!(
            "operator '{op}' on '{}' requires a scalar value",
            field.name
        ))),
    }
}

fn coerce(field: &FieldDef, op: Op, value: Value) -> Result<Value> {
    field.kind.coerce(value).map_err(|e| {
        Error::bad_request(format!(
            "invalid value for operator '{op}' on '{}': {e}",
            field.name
        ))
        .with_cause(e)
    })
}

fn pattern(field: &FieldDef, op: Op, value: &FilterValue) -> Result<Value> {
    match scalar(field, op, value)? {
        text @ Value::Text(_) => Ok(text.clone()),
        other => Err(Error::bad_request(format!(
            "operator '{op}' on '{}' requires a text pattern, got {}",
            field.name,
            other.type_name()
        ))),
    }
}

/// Translates a `SIMILAR TO` pattern into an anchored regular expression.
///
/// `%` and `_` are the SQL wildcards; `| * + ? {m,n} ( ) [...]` keep their regex
/// meaning; `\` escapes the next character; everything else is literal.
pub fn similar_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() + 12);
    out.push_str("(?s)^(?:");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(next.encode_utf8(&mut [0; 4])));
                }
            }
            '[' => {
                out.push('[');
                for c in chars.by_ref() {
                    if c == '\\' {
                        out.push_str("\\\\");
                        continue;
                    }
                    out.push(c);
                    if c == ']' {
                        break;
                    }
                }
            }
            '|' | '*' | '+' | '?' | '{' | '}' | '(' | ')' => out.push(c),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push_str(")$");
    Regex::new(&out).map_err(|e| {
        Error::bad_request(format!("invalid similar-to pattern '{pattern}'")).with_cause(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use restsql_core::{ErrorKind, FieldKind};

    fn schema() -> EntitySchema {
        EntitySchema::builder("todos")
            .field(FieldDef::new("id", FieldKind::Integer).primary())
            .field(FieldDef::new("title", FieldKind::Text))
            .field(FieldDef::new("done", FieldKind::Bool))
            .field(FieldDef::new("note", FieldKind::Text).nullable())
            .build()
            .unwrap()
    }

    fn render(filter: &Filter, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let schema = schema();
        let sql = lower(filter, &schema, "todos", dialect)?.unwrap_or_default();
        let (text, params) = sql.build(dialect);
        Ok((text, params.into_iter().cloned().collect()))
    }

    #[test]
    fn nested_group_binds_tighter() {
        let filter = Filter::and([
            Filter::eq("done", true),
            Filter::or([Filter::eq("title", "a"), Filter::eq("title", "b")]),
        ]);
        let (sql, params) = render(&filter, Dialect::SQLite).unwrap();
        assert_eq!(sql, r#"("done" = ? AND ("title" = ? OR "title" = ?))"#);
        assert_eq!(params, vec![Value::Bool(true), "a".into(), "b".into()]);
    }

    #[test]
    fn values_never_reach_the_text() {
        let hostile = r#"x' OR 1=1 --"#;
        let filter = Filter::or([
            Filter::eq("title", hostile),
            Filter::predicate("note", Op::Like, hostile),
        ]);
        let (sql, params) = render(&filter, Dialect::SQLite).unwrap();
        assert!(!sql.contains(hostile));
        assert_eq!(sql, r#"("title" = ? OR "note" LIKE ?)"#);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn unknown_attribute_is_bad_request() {
        let filter = Filter::eq(r#"title" = '' OR "1"#, 1i64);
        let err = render(&filter, Dialect::SQLite).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn in_requires_list() {
        let filter = Filter::predicate("id", Op::In, 1i64);
        let err = render(&filter, Dialect::SQLite).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.message(), "operator 'in' on 'id' requires a list value");
    }

    #[test]
    fn in_coerces_and_handles_empty() {
        let filter = Filter::in_list("id", ["1", "2"]);
        let (sql, params) = render(&filter, Dialect::PostgreSQL).unwrap();
        assert_eq!(sql, r#""id" IN ($1, $2)"#);
        assert_eq!(params, vec![Value::Integer(1), Value::Integer(2)]);

        let empty_in = Filter::predicate("id", Op::In, FilterValue::List(Vec::new()));
        assert_eq!(render(&empty_in, Dialect::SQLite).unwrap().0, "FALSE");
        let empty_nin = Filter::predicate("id", Op::NotIn, FilterValue::List(Vec::new()));
        assert_eq!(render(&empty_nin, Dialect::SQLite).unwrap().0, "TRUE");
    }

    #[test]
    fn uncoercible_value_is_bad_request() {
        let err = render(&Filter::eq("id", "seven"), Dialect::SQLite).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn unary_operators_ignore_value() {
        let filter = Filter::and([
            Filter::predicate("note", Op::IsNull, "ignored"),
            Filter::is_not_null("title"),
        ]);
        let (sql, params) = render(&filter, Dialect::SQLite).unwrap();
        assert_eq!(sql, r#"("note" IS NULL AND "title" IS NOT NULL)"#);
        assert!(params.is_empty());
    }

    #[test]
    fn pattern_operators_per_dialect() {
        let ilike = Filter::predicate("title", Op::NotILike, "%milk%");
        assert_eq!(
            render(&ilike, Dialect::PostgreSQL).unwrap().0,
            r#""title" NOT ILIKE $1"#
        );
        assert_eq!(
            render(&ilike, Dialect::SQLite).unwrap().0,
            r#"lower("title") NOT LIKE lower(?)"#
        );

        let unaccent = Filter::predicate("title", Op::UnaccentILike, "%cafe%");
        assert_eq!(
            render(&unaccent, Dialect::PostgreSQL).unwrap().0,
            r#"unaccent("title") ILIKE unaccent($1)"#
        );
        assert_eq!(
            render(&unaccent, Dialect::SQLite).unwrap().0,
            r#"lower(unaccent("title")) LIKE lower(unaccent(?))"#
        );

        let similar = Filter::predicate("title", Op::NotSimilar, "%(a|b)%");
        assert_eq!(
            render(&similar, Dialect::PostgreSQL).unwrap().0,
            r#""title" NOT SIMILAR TO $1"#
        );
        assert_eq!(
            render(&similar, Dialect::SQLite).unwrap().0,
            r#"NOT similar_to("title", ?)"#
        );
    }

    #[test]
    fn pattern_requires_text() {
        let err = render(&Filter::predicate("title", Op::Like, 5i64), Dialect::SQLite).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        let err = render(&Filter::predicate("title", Op::Similar, "(a"), Dialect::SQLite).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn empty_groups_impose_nothing() {
        let filter = Filter::and([Filter::or([]), Filter::and([])]);
        assert!(lower(&filter, &schema(), "todos", Dialect::SQLite).unwrap().is_none());

        let filter = Filter::or([Filter::and([]), Filter::eq("id", 1i64)]);
        assert_eq!(render(&filter, Dialect::SQLite).unwrap().0, r#"("id" = ?)"#);
    }

    #[test]
    fn similar_to_translation() {
        let re = similar_to_regex("%(b|d)%").unwrap();
        assert!(re.is_match("abc"));
        assert!(re.is_match("d"));
        assert!(!re.is_match("ace"));

        let re = similar_to_regex("a_c.").unwrap();
        assert!(re.is_match("abc."));
        assert!(!re.is_match("abcd"));

        let re = similar_to_regex("[0-9]+").unwrap();
        assert!(re.is_match("2024"));
        assert!(!re.is_match("20x4"));
    }
}
