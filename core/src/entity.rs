use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::{EntitySchema, Value};

/// Eagerly loaded relation of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl Serialize for Related {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Related::One(entity) => entity.serialize(serializer),
            Related::Many(entities) => entities.serialize(serializer),
        }
    }
}

/// A schema-shaped record: one value per field, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    schema: Arc<EntitySchema>,
    values: Vec<Value>,
    relations: Vec<(String, Related)>,
}

impl Entity {
    /// Entity with every field at its zero value.
    pub fn zeroed(schema: &Arc<EntitySchema>) -> Self {
        Self {
            values: schema.fields().iter().map(|f| f.zero()).collect(),
            schema: Arc::clone(schema),
            relations: Vec::new(),
        }
    }

    /// Builds an entity from values in schema order. Missing trailing values are
    /// zeroed; extra values are dropped.
    pub fn from_values(schema: &Arc<EntitySchema>, values: impl IntoIterator<Item = Value>) -> Self {
        let mut entity = Self::zeroed(schema);
        for (slot, value) in entity.values.iter_mut().zip(values) {
            *slot = value;
        }
        entity
    }

    #[inline]
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[inline]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.schema.field_index(field).map(|i| &self.values[i])
    }

    #[inline]
    pub fn get_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Sets a field by name; returns `false` if the schema has no such field.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> bool {
        match self.schema.field_index(field) {
            Some(i) => {
                self.values[i] = value.into();
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn set_at(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations
            .iter()
            .find_map(|(n, r)| (n == name).then_some(r))
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Related)> {
        self.relations.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        let name = name.into();
        match self.relations.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = related,
            None => self.relations.push((name, related)),
        }
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.schema.fields();
        let mut map = serializer.serialize_map(Some(fields.len() + self.relations.len()))?;
        for (field, value) in fields.iter().zip(&self.values) {
            map.serialize_entry(&field.name, value)?;
        }
        for (name, related) in &self.relations {
            map.serialize_entry(name, related)?;
        }
        map.end()
    }
}

/// A windowed result set plus the total matching count.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Page {
    pub slice: Vec<Entity>,
    pub offset: u64,
    pub limit: u64,
    pub count: u64,
}

impl Page {
    pub fn empty(offset: u64, limit: u64) -> Self {
        Self {
            slice: Vec::new(),
            offset,
            limit,
            count: 0,
        }
    }
}
