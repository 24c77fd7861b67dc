//! Schema descriptors: the field table each resource carries instead of runtime
//! reflection.

use std::collections::HashSet;
use std::sync::Arc;

use crate::{ActionSet, Error, Result, Value};

/// Storage kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Bool,
    Blob,
}

/// A value could not be converted to a field kind.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot convert {found} value '{value}' to {expected}")]
pub struct CoerceError {
    pub expected: FieldKind,
    pub found: &'static str,
    pub value: String,
}

impl FieldKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Real => "real",
            FieldKind::Text => "text",
            FieldKind::Bool => "bool",
            FieldKind::Blob => "blob",
        }
    }

    /// Zero value of the kind.
    pub fn zero(self) -> Value {
        match self {
            FieldKind::Integer => Value::Integer(0),
            FieldKind::Real => Value::Real(0.0),
            FieldKind::Text => Value::Text(String::new()),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Blob => Value::Blob(Vec::new()),
        }
    }

    /// Storage type name used in DDL.
    pub const fn sql_type(self, dialect: crate::Dialect) -> &'static str {
        match (self, dialect) {
            (FieldKind::Integer, crate::Dialect::SQLite) => "INTEGER",
            (FieldKind::Integer, crate::Dialect::PostgreSQL) => "BIGINT",
            (FieldKind::Real, crate::Dialect::SQLite) => "REAL",
            (FieldKind::Real, crate::Dialect::PostgreSQL) => "DOUBLE PRECISION",
            (FieldKind::Text, _) => "TEXT",
            (FieldKind::Bool, crate::Dialect::SQLite) => "INTEGER",
            (FieldKind::Bool, crate::Dialect::PostgreSQL) => "BOOLEAN",
            (FieldKind::Blob, crate::Dialect::SQLite) => "BLOB",
            (FieldKind::Blob, crate::Dialect::PostgreSQL) => "BYTEA",
        }
    }

    /// Converts `value` to this kind. Null passes through unchanged.
    pub fn coerce(self, value: Value) -> core::result::Result<Value, CoerceError> {
        let fail = |value: &Value| CoerceError {
            expected: self,
            found: value.type_name(),
            value: value.to_string(),
        };

        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),

            (FieldKind::Integer, v @ Value::Integer(_)) => Ok(v),
            (FieldKind::Integer, Value::Bool(b)) => Ok(Value::Integer(i64::from(b))),
            (FieldKind::Integer, Value::Real(r))
                if r.fract() == 0.0 && r >= i64::MIN as f64 && r < i64::MAX as f64 =>
            {
                Ok(Value::Integer(r as i64))
            }
            (FieldKind::Integer, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(Value::Integer(i)),
                Err(_) => Err(fail(&Value::Text(s))),
            },

            (FieldKind::Real, v @ Value::Real(_)) => Ok(v),
            (FieldKind::Real, Value::Integer(i)) => Ok(Value::Real(i as f64)),
            (FieldKind::Real, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(r) => Ok(Value::Real(r)),
                Err(_) => Err(fail(&Value::Text(s))),
            },

            (FieldKind::Text, v @ Value::Text(_)) => Ok(v),
            (FieldKind::Text, Value::Integer(i)) => Ok(Value::Text(i.to_string())),
            (FieldKind::Text, Value::Real(r)) => Ok(Value::Text(r.to_string())),
            (FieldKind::Text, Value::Bool(b)) => Ok(Value::Text(b.to_string())),

            (FieldKind::Bool, v @ Value::Bool(_)) => Ok(v),
            (FieldKind::Bool, Value::Integer(0)) => Ok(Value::Bool(false)),
            (FieldKind::Bool, Value::Integer(1)) => Ok(Value::Bool(true)),
            (FieldKind::Bool, Value::Text(s)) => match s.trim() {
                "true" | "t" | "1" | "on" => Ok(Value::Bool(true)),
                "false" | "f" | "0" | "off" | "" => Ok(Value::Bool(false)),
                _ => Err(fail(&Value::Text(s))),
            },

            (FieldKind::Blob, v @ Value::Blob(_)) => Ok(v),
            (FieldKind::Blob, Value::Text(s)) => Ok(Value::Blob(s.into_bytes())),

            (_, other) => Err(fail(&other)),
        }
    }
}

impl core::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub primary: bool,
    /// Store-assigned (identity) column: omitted on insert while zero or null.
    pub generated: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            primary: false,
            generated: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Zero value: null for nullable fields.
    pub fn zero(&self) -> Value {
        if self.nullable {
            Value::Null
        } else {
            self.kind.zero()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// `local` field of this entity holds the target's primary key.
    BelongsTo { local: String },
    /// `foreign` field of the target holds this entity's primary key.
    HasMany { foreign: String },
}

/// A named one-level relation to another resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub target: String,
    pub kind: RelationKind,
}

impl RelationDef {
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        local: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::BelongsTo {
                local: local.into(),
            },
        }
    }

    pub fn has_many(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::HasMany {
                foreign: foreign.into(),
            },
        }
    }
}

/// Invalid schema descriptors, reported at registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema table name must not be empty")]
    EmptyTable,
    #[error("schema '{0}' has no fields")]
    NoFields(String),
    #[error("field name must not be empty in schema '{0}'")]
    EmptyFieldName(String),
    #[error("duplicate field '{field}' in schema '{table}'")]
    DuplicateField { table: String, field: String },
    #[error("duplicate relation '{relation}' in schema '{table}'")]
    DuplicateRelation { table: String, relation: String },
    #[error("relation '{relation}' names unknown field '{field}'")]
    UnknownRelationField { relation: String, field: String },
}

/// Field table of an entity: table name, fields in column order, relations.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    table: String,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
}

impl EntitySchema {
    pub fn builder(table: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            table: table.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    #[inline]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[inline]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[inline]
    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Index and definition of the single primary-key column.
    ///
    /// `resource` only names the resource in the error.
    pub fn primary_key(&self, resource: &str) -> Result<(usize, &FieldDef)> {
        let mut keys = self.fields.iter().enumerate().filter(|(_, f)| f.primary);
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key),
            (None, _) => Err(Error::bad_request(format!(
                "resource '{resource}' has no primary key"
            ))),
            (Some(_), Some(_)) => Err(Error::bad_request(format!(
                "only single pk is permitted for resource '{resource}'"
            ))),
        }
    }
}

pub struct EntitySchemaBuilder {
    table: String,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
}

impl EntitySchemaBuilder {
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn build(self) -> core::result::Result<EntitySchema, SchemaError> {
        if self.table.is_empty() {
            return Err(SchemaError::EmptyTable);
        }
        if self.fields.is_empty() {
            return Err(SchemaError::NoFields(self.table));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(SchemaError::EmptyFieldName(self.table));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    table: self.table.clone(),
                    field: field.name.clone(),
                });
            }
        }

        let mut seen_relations = HashSet::new();
        for relation in &self.relations {
            if !seen_relations.insert(relation.name.as_str()) || seen.contains(relation.name.as_str())
            {
                return Err(SchemaError::DuplicateRelation {
                    table: self.table.clone(),
                    relation: relation.name.clone(),
                });
            }
            if let RelationKind::BelongsTo { local } = &relation.kind
                && !seen.contains(local.as_str())
            {
                return Err(SchemaError::UnknownRelationField {
                    relation: relation.name.clone(),
                    field: local.clone(),
                });
            }
        }

        Ok(EntitySchema {
            table: self.table,
            fields: self.fields,
            relations: self.relations,
        })
    }
}

/// A named, schema-described entity type with its permitted actions.
///
/// Immutable once registered.
#[derive(Debug, Clone)]
pub struct Resource {
    name: String,
    schema: Arc<EntitySchema>,
    actions: ActionSet,
}

impl Resource {
    pub fn new(name: impl Into<String>, schema: EntitySchema, actions: impl Into<ActionSet>) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            actions: actions.into(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    #[inline]
    pub fn actions(&self) -> ActionSet {
        self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn todos() -> EntitySchema {
        EntitySchema::builder("todos")
            .field(FieldDef::new("id", FieldKind::Integer).primary().generated())
            .field(FieldDef::new("title", FieldKind::Text))
            .field(FieldDef::new("done", FieldKind::Bool))
            .build()
            .unwrap()
    }

    #[test]
    fn coerce_between_kinds() {
        assert_eq!(
            FieldKind::Integer.coerce(Value::Text(" 42 ".into())),
            Ok(Value::Integer(42))
        );
        assert_eq!(FieldKind::Real.coerce(Value::Integer(3)), Ok(Value::Real(3.0)));
        assert_eq!(FieldKind::Bool.coerce(Value::Integer(1)), Ok(Value::Bool(true)));
        assert_eq!(FieldKind::Text.coerce(Value::Integer(7)), Ok(Value::Text("7".into())));
        assert_eq!(FieldKind::Integer.coerce(Value::Null), Ok(Value::Null));
        assert!(FieldKind::Integer.coerce(Value::Text("abc".into())).is_err());
        assert!(FieldKind::Integer.coerce(Value::Real(1.5)).is_err());
        assert!(FieldKind::Bool.coerce(Value::Integer(2)).is_err());
    }

    #[test]
    fn single_primary_key() {
        let schema = todos();
        let (index, field) = schema.primary_key("todos").unwrap();
        assert_eq!(index, 0);
        assert_eq!(field.name, "id");
    }

    #[test]
    fn composite_key_is_bad_request() {
        let schema = EntitySchema::builder("pairs")
            .field(FieldDef::new("a", FieldKind::Integer).primary())
            .field(FieldDef::new("b", FieldKind::Integer).primary())
            .build()
            .unwrap();
        let err = schema.primary_key("pairs").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.message(), "only single pk is permitted for resource 'pairs'");
    }

    #[test]
    fn builder_validates() {
        assert_eq!(
            EntitySchema::builder("").field(FieldDef::new("a", FieldKind::Text)).build(),
            Err(SchemaError::EmptyTable)
        );
        let dup = EntitySchema::builder("t")
            .field(FieldDef::new("a", FieldKind::Text))
            .field(FieldDef::new("a", FieldKind::Integer))
            .build();
        assert!(matches!(dup, Err(SchemaError::DuplicateField { .. })));
        let bad_rel = EntitySchema::builder("t")
            .field(FieldDef::new("a", FieldKind::Text))
            .relation(RelationDef::belongs_to("owner", "users", "owner_id"))
            .build();
        assert!(matches!(bad_rel, Err(SchemaError::UnknownRelationField { .. })));
    }
}
