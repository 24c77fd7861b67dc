//! Compiler from query descriptors to parameterized statements.
//!
//! Nothing here touches the store: every function returns a [`SQL`] fragment the
//! executor runs on the active transaction.

mod filter;

pub use filter::{lower, similar_to_regex};

use restsql_core::{
    Dialect, Entity, EntitySchema, Error, FieldKind, Filter, RelationDef, RelationKind, Resource,
    Result, SQL, SQLChunk, Sort, Token, Value,
};

/// The table a statement targets: resource, optional namespace and dialect.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub resource: &'a Resource,
    pub namespace: Option<&'a str>,
    pub dialect: Dialect,
}

impl<'a> Target<'a> {
    pub fn new(resource: &'a Resource, namespace: Option<&'a str>, dialect: Dialect) -> Self {
        Self {
            resource,
            namespace: namespace.filter(|ns| !ns.is_empty()),
            dialect,
        }
    }

    #[inline]
    pub fn schema(&self) -> &'a EntitySchema {
        self.resource.schema()
    }

    #[inline]
    pub fn name(&self) -> &'a str {
        self.resource.name()
    }

    /// `"namespace"."table"` or `"table"`
    pub fn table(&self) -> SQL<'a> {
        SQL::table(self.namespace, self.schema().table())
    }

    /// Quoted column list for the projected field indices.
    fn columns(&self, projection: &[usize]) -> SQL<'a> {
        let fields = self.schema().fields();
        SQL::ident_list(projection.iter().map(|&i| fields[i].name.as_str()))
    }

    fn all_columns(&self) -> SQL<'a> {
        SQL::ident_list(self.schema().fields().iter().map(|f| f.name.as_str()))
    }

    fn returning(&self) -> SQL<'a> {
        SQL::token(Token::RETURNING).append(self.all_columns())
    }

    /// `WHERE "pk" = ?`
    fn where_key(&self, key: Value) -> Result<SQL<'a>> {
        let (_, pk) = self.schema().primary_key(self.name())?;
        Ok(SQL::token(Token::WHERE)
            .append(SQL::ident(pk.name.as_str()))
            .push(Token::EQ)
            .push(key))
    }
}

/// Resolves a field-selection list to schema indices; empty selects every field.
pub fn projection(target: &Target<'_>, fields: &[String]) -> Result<Vec<usize>> {
    let schema = target.schema();
    if fields.is_empty() {
        return Ok((0..schema.fields().len()).collect());
    }
    let mut indices = Vec::with_capacity(fields.len());
    for name in fields {
        let index = schema.field_index(name).ok_or_else(|| {
            Error::bad_request(format!(
                "unknown field '{name}' for resource '{}'",
                target.name()
            ))
        })?;
        if !indices.contains(&index) {
            indices.push(index);
        }
    }
    Ok(indices)
}

/// Parses a primary key string into the key column's kind.
pub fn parse_key(target: &Target<'_>, key: &str) -> Result<Value> {
    let (_, pk) = target.schema().primary_key(target.name())?;
    pk.kind.coerce(Value::Text(key.to_owned())).map_err(|e| {
        Error::bad_request(format!(
            "invalid key '{key}' for resource '{}'",
            target.name()
        ))
        .with_cause(e)
    })
}

/// Window and ordering of a selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Window<'q> {
    pub sort: &'q [Sort],
    pub offset: u64,
    /// 0 means unlimited
    pub limit: u64,
}

/// `SELECT cols FROM table [WHERE ..] [ORDER BY ..] [LIMIT ..] [OFFSET ..]`
pub fn select<'a>(
    target: &Target<'a>,
    projection: &[usize],
    filter: Option<&'a Filter>,
    window: Window<'a>,
) -> Result<SQL<'a>> {
    let mut sql = SQL::token(Token::SELECT)
        .append(target.columns(projection))
        .push(Token::FROM)
        .append(target.table());

    if let Some(predicate) = where_clause(target, filter)? {
        sql.append_mut(predicate);
    }
    sql.append_mut(order_by(target, window.sort)?);
    sql.append_mut(paginate(target.dialect, window.offset, window.limit));
    Ok(sql)
}

/// `SELECT cols FROM table WHERE "pk" = ?`
pub fn select_one<'a>(target: &Target<'a>, projection: &[usize], key: Value) -> Result<SQL<'a>> {
    Ok(SQL::token(Token::SELECT)
        .append(target.columns(projection))
        .push(Token::FROM)
        .append(target.table())
        .append(target.where_key(key)?))
}

/// `SELECT cols FROM table WHERE "column" IN (...)`, used to eager-load relations.
pub fn select_in<'a>(
    target: &Target<'a>,
    projection: &[usize],
    column: &'a str,
    keys: Vec<Value>,
) -> SQL<'a> {
    SQL::token(Token::SELECT)
        .append(target.columns(projection))
        .push(Token::FROM)
        .append(target.table())
        .push(Token::WHERE)
        .append(SQL::ident(column))
        .push(Token::IN)
        .append(SQL::param_list(keys).parens())
}

/// `SELECT COUNT(*) FROM table [WHERE ..]`, ignoring window and projection.
pub fn count<'a>(target: &Target<'a>, filter: Option<&'a Filter>) -> Result<SQL<'a>> {
    let mut sql = SQL::token(Token::SELECT)
        .append(SQL::func("COUNT", SQL::token(Token::STAR)))
        .push(Token::FROM)
        .append(target.table());
    if let Some(predicate) = where_clause(target, filter)? {
        sql.append_mut(predicate);
    }
    Ok(sql)
}

/// `INSERT INTO table (cols) VALUES (..) RETURNING *`
///
/// Generated columns still at zero or null are left to the store.
pub fn insert<'a>(target: &Target<'a>, entity: &Entity) -> SQL<'a> {
    let fields = target.schema().fields();
    let (columns, values): (Vec<&'a str>, Vec<Value>) = fields
        .iter()
        .zip(entity.values())
        .filter(|(field, value)| !(field.generated && is_unset(field.kind, value)))
        .map(|(field, value)| (field.name.as_str(), value.clone()))
        .unzip();

    let mut sql = SQL::token(Token::INSERT)
        .push(Token::INTO)
        .append(target.table());
    if columns.is_empty() {
        sql = sql.push(Token::DEFAULT).push(Token::VALUES);
    } else {
        sql = sql
            .append(SQL::ident_list(columns).parens())
            .push(Token::VALUES)
            .append(SQL::param_list(values).parens());
    }
    sql.append(target.returning())
}

/// `UPDATE table SET .. WHERE "pk" = ? RETURNING *`, overwriting every non-key
/// column with the entity's values.
pub fn update<'a>(target: &Target<'a>, entity: &Entity) -> Result<SQL<'a>> {
    let schema = target.schema();
    let (pk_index, pk) = schema.primary_key(target.name())?;
    let key = entity.values()[pk_index].clone();

    let mut assignments: Vec<(&'a str, Value)> = schema
        .fields()
        .iter()
        .zip(entity.values())
        .filter(|(field, _)| !field.primary)
        .map(|(field, value)| (field.name.as_str(), value.clone()))
        .collect();
    if assignments.is_empty() {
        assignments.push((pk.name.as_str(), key.clone()));
    }

    Ok(SQL::token(Token::UPDATE)
        .append(target.table())
        .push(Token::SET)
        .append(SQL::assignments(assignments))
        .append(target.where_key(key)?)
        .append(target.returning()))
}

/// `DELETE FROM table WHERE "pk" = ? RETURNING *`
pub fn delete<'a>(target: &Target<'a>, key: Value) -> Result<SQL<'a>> {
    Ok(SQL::token(Token::DELETE)
        .push(Token::FROM)
        .append(target.table())
        .append(target.where_key(key)?)
        .append(target.returning()))
}

/// `CREATE TABLE IF NOT EXISTS table (..)`
pub fn create_table<'a>(target: &Target<'a>) -> SQL<'a> {
    let schema = target.schema();
    let keys: Vec<&str> = schema
        .fields()
        .iter()
        .filter(|f| f.primary)
        .map(|f| f.name.as_str())
        .collect();
    let inline_key = keys.len() == 1;

    let mut columns = Vec::with_capacity(schema.fields().len() + 1);
    for field in schema.fields() {
        let mut column = SQL::ident(field.name.as_str());
        let identity = field.generated && field.primary && field.kind == FieldKind::Integer;
        match (target.dialect, identity) {
            (Dialect::PostgreSQL, true) => {
                column.push_mut(SQLChunk::raw("BIGINT GENERATED BY DEFAULT AS IDENTITY"));
            }
            _ => column.push_mut(SQLChunk::raw(field.kind.sql_type(target.dialect))),
        }
        if field.primary && inline_key {
            column = column.push(Token::PRIMARY).push(Token::KEY);
        } else if !field.nullable {
            column = column.push(Token::NOT).push(Token::NULL);
        }
        columns.push(column);
    }
    if keys.len() > 1 {
        columns.push(
            SQL::token(Token::PRIMARY)
                .push(Token::KEY)
                .append(SQL::ident_list(keys).parens()),
        );
    }

    SQL::token(Token::CREATE)
        .push(Token::TABLE)
        .push(Token::IF)
        .push(Token::NOT)
        .push(Token::EXISTS)
        .append(target.table())
        .append(SQL::join(columns, Token::COMMA).parens())
}

/// A paged selection and the filter-only query counting every match.
#[derive(Debug, Clone)]
pub struct PageQuery<'a> {
    pub select: SQL<'a>,
    pub count: SQL<'a>,
    pub offset: u64,
    pub limit: u64,
}

pub fn page<'a>(
    target: &Target<'a>,
    projection: &[usize],
    filter: Option<&'a Filter>,
    window: Window<'a>,
) -> Result<PageQuery<'a>> {
    let select = select(target, projection, filter, window)?;
    let bound = select.params().count();
    let max = target.dialect.max_params();
    if bound > max {
        return Err(Error::bad_request(format!(
            "filter binds {bound} values, at most {max} are supported"
        )));
    }
    Ok(PageQuery {
        select,
        count: count(target, filter)?,
        offset: window.offset,
        limit: window.limit,
    })
}

/// Resolves relation names against the schema and widens `projection` with the
/// key column each relation is joined on.
pub fn relations<'a>(
    target: &Target<'a>,
    names: &[String],
    projection: &mut Vec<usize>,
) -> Result<Vec<&'a RelationDef>> {
    let schema = target.schema();
    let mut resolved: Vec<&'a RelationDef> = Vec::with_capacity(names.len());
    for name in names {
        let relation = schema.relation(name).ok_or_else(|| {
            Error::bad_request(format!(
                "unknown relation '{name}' for resource '{}'",
                target.name()
            ))
        })?;
        if resolved.iter().any(|r| r.name == relation.name) {
            continue;
        }
        let key = match &relation.kind {
            RelationKind::BelongsTo { local } => schema.field_index(local).ok_or_else(|| {
                Error::internal(format!("relation '{name}' names unknown field '{local}'"))
            })?,
            RelationKind::HasMany { .. } => schema.primary_key(target.name())?.0,
        };
        if !projection.contains(&key) {
            projection.push(key);
        }
        resolved.push(relation);
    }
    Ok(resolved)
}

fn is_unset(kind: FieldKind, value: &Value) -> bool {
    value.is_null() || *value == kind.zero()
}

fn where_clause<'a>(target: &Target<'a>, filter: Option<&'a Filter>) -> Result<Option<SQL<'a>>> {
    let Some(filter) = filter else {
        return Ok(None);
    };
    Ok(lower(filter, target.schema(), target.name(), target.dialect)?
        .map(|predicate| SQL::token(Token::WHERE).append(predicate)))
}

fn order_by<'a>(target: &Target<'a>, sort: &'a [Sort]) -> Result<SQL<'a>> {
    if sort.is_empty() {
        return Ok(SQL::empty());
    }
    let mut terms = Vec::with_capacity(sort.len());
    for s in sort {
        if target.schema().field(&s.attribute).is_none() {
            return Err(Error::bad_request(format!(
                "unknown sort attribute '{}' for resource '{}'",
                s.attribute,
                target.name()
            )));
        }
        let direction = if s.ascending { Token::ASC } else { Token::DESC };
        terms.push(SQL::ident(s.attribute.as_str()).push(direction));
    }
    Ok(SQL::token(Token::ORDER)
        .push(Token::BY)
        .append(SQL::join(terms, Token::COMMA)))
}

/// 0 leaves the clause out. SQLite only accepts `OFFSET` after a `LIMIT`, so an
/// offset without limit renders `LIMIT -1`.
fn paginate<'a>(dialect: Dialect, offset: u64, limit: u64) -> SQL<'a> {
    let clamp = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
    let mut sql = SQL::empty();
    match (limit, dialect) {
        (0, Dialect::SQLite) if offset > 0 => {
            sql = sql.push(Token::LIMIT).push(SQLChunk::Number(-1));
        }
        (0, _) => {}
        (limit, _) => sql = sql.push(Token::LIMIT).push(SQLChunk::Number(clamp(limit))),
    }
    if offset > 0 {
        sql = sql.push(Token::OFFSET).push(SQLChunk::Number(clamp(offset)));
    }
    sql
}
