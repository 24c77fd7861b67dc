//! Per-action store operations on an open transaction.

use std::sync::Arc;

use restsql_core::{
    Entity, EntitySchema, Error, Page, RelationDef, RelationKind, Related, Result, Value,
};

use crate::codec;
use crate::compile::{self, PageQuery, Target};
use crate::registry::Registry;
use crate::store::Connection;
use crate::transaction::Tx;

/// Keys bound by one relation query; larger key sets are split.
const RELATION_KEYS_PER_QUERY: usize = 500;

/// Runs compiled statements for one resource inside `tx`.
pub struct Executor<'a, C: Connection> {
    tx: &'a Tx<C>,
    registry: &'a Registry,
    target: Target<'a>,
}

impl<'a, C: Connection> Executor<'a, C> {
    pub fn new(tx: &'a Tx<C>, registry: &'a Registry, target: Target<'a>) -> Self {
        Self {
            tx,
            registry,
            target,
        }
    }

    /// Zero rows is `NotFound`.
    pub fn fetch_one(
        &self,
        key: Value,
        projection: &[usize],
        relations: &[&RelationDef],
    ) -> Result<Entity> {
        let sql = compile::select_one(&self.target, projection, key)?;
        let row = self
            .tx
            .query(&sql)?
            .into_iter()
            .next()
            .ok_or_else(no_rows)?;
        let mut entities = [decode_row(self.target.resource.schema(), projection, row)?];
        self.load_relations(&mut entities, relations)?;
        let [entity] = entities;
        Ok(entity)
    }

    /// Counts every match first; the window is only read when something matched.
    pub fn fetch_page(
        &self,
        page: &PageQuery<'_>,
        projection: &[usize],
        relations: &[&RelationDef],
    ) -> Result<Page> {
        let count = self.count(&page.count)?;
        if count == 0 {
            return Ok(Page::empty(page.offset, page.limit));
        }
        let mut slice = self
            .tx
            .query(&page.select)?
            .into_iter()
            .map(|row| decode_row(self.target.resource.schema(), projection, row))
            .collect::<Result<Vec<_>>>()?;
        self.load_relations(&mut slice, relations)?;
        Ok(Page {
            slice,
            offset: page.offset,
            limit: page.limit,
            count,
        })
    }

    /// Inserts `entity` and returns the stored row, store-assigned identity included.
    pub fn create(&self, entity: &Entity) -> Result<Entity> {
        let sql = compile::insert(&self.target, entity);
        let row = self
            .tx
            .query(&sql)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("insert returned no row"))?;
        self.decode_full(row)
    }

    /// Overwrites every column of the row keyed by the entity's primary key.
    pub fn replace(&self, entity: &Entity) -> Result<Entity> {
        let sql = compile::update(&self.target, entity)?;
        let row = self
            .tx
            .query(&sql)?
            .into_iter()
            .next()
            .ok_or_else(no_rows)?;
        self.decode_full(row)
    }

    /// Fetches the stored row, decodes `body` onto it and writes it back, so
    /// fields the body leaves out keep their stored values.
    pub fn partial_update(&self, key: Value, body: &[u8], content_type: &str) -> Result<Entity> {
        let schema = self.target.schema();
        let (pk, _) = schema.primary_key(self.target.name())?;
        let all: Vec<usize> = (0..schema.fields().len()).collect();

        let mut entity = self.fetch_one(key.clone(), &all, &[])?;
        codec::decode(body, content_type, &mut entity)?;
        entity.set_at(pk, key);
        self.replace(&entity)
    }

    /// Deletes by key and returns the removed row.
    pub fn delete(&self, key: Value) -> Result<Entity> {
        let sql = compile::delete(&self.target, key)?;
        let row = self
            .tx
            .query(&sql)?
            .into_iter()
            .next()
            .ok_or_else(no_rows)?;
        self.decode_full(row)
    }

    fn count(&self, sql: &restsql_core::SQL<'_>) -> Result<u64> {
        let rows = self.tx.query(sql)?;
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::internal("count query returned no value"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn decode_full(&self, row: Vec<Value>) -> Result<Entity> {
        let all: Vec<usize> = (0..self.target.schema().fields().len()).collect();
        decode_row(self.target.resource.schema(), &all, row)
    }

    /// One `IN (...)` query per relation, attached to the matching entities.
    fn load_relations(&self, entities: &mut [Entity], relations: &[&RelationDef]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        for relation in relations {
            let resource = self.registry.lookup(&relation.target).ok_or_else(|| {
                Error::internal(format!(
                    "relation '{}' targets unregistered resource '{}'",
                    relation.name, relation.target
                ))
            })?;
            let target = Target::new(resource, self.target.namespace, self.target.dialect);
            let schema = target.schema();
            let all: Vec<usize> = (0..schema.fields().len()).collect();

            match &relation.kind {
                RelationKind::BelongsTo { local } => {
                    let (target_pk, pk_field) = schema.primary_key(target.name())?;
                    let keys = distinct(entities.iter().filter_map(|e| e.get(local)));
                    let related = self.related_rows(&target, &all, &pk_field.name, keys)?;
                    for entity in entities.iter_mut() {
                        let found = entity.get(local).and_then(|key| {
                            related.iter().find(|r| r.get_at(target_pk) == Some(key))
                        });
                        let one = found.cloned().map(Box::new);
                        entity.set_relation(relation.name.as_str(), Related::One(one));
                    }
                }
                RelationKind::HasMany { foreign } => {
                    let (pk, _) = self.target.schema().primary_key(self.target.name())?;
                    let keys = distinct(entities.iter().filter_map(|e| e.get_at(pk)));
                    let related = self.related_rows(&target, &all, foreign, keys)?;
                    for entity in entities.iter_mut() {
                        let key = entity.get_at(pk).cloned();
                        let many = related
                            .iter()
                            .filter(|r| key.is_some() && r.get(foreign) == key.as_ref())
                            .cloned()
                            .collect();
                        entity.set_relation(relation.name.as_str(), Related::Many(many));
                    }
                }
            }
        }
        Ok(())
    }

    fn related_rows(
        &self,
        target: &Target<'_>,
        projection: &[usize],
        column: &str,
        keys: Vec<Value>,
    ) -> Result<Vec<Entity>> {
        let mut related = Vec::new();
        for chunk in keys.chunks(RELATION_KEYS_PER_QUERY) {
            let sql = compile::select_in(target, projection, column, chunk.to_vec());
            for row in self.tx.query(&sql)? {
                related.push(decode_row(target.resource.schema(), projection, row)?);
            }
        }
        Ok(related)
    }
}

/// Maps a row read with `projection` onto a zeroed entity, coercing each column
/// to its field kind.
pub fn decode_row(
    schema: &Arc<EntitySchema>,
    projection: &[usize],
    row: Vec<Value>,
) -> Result<Entity> {
    if row.len() != projection.len() {
        return Err(Error::internal(format!(
            "expected {} columns from '{}', got {}",
            projection.len(),
            schema.table(),
            row.len()
        )));
    }
    let mut entity = Entity::zeroed(schema);
    for (&index, value) in projection.iter().zip(row) {
        let field = &schema.fields()[index];
        let value = field.kind.coerce(value).map_err(|e| {
            Error::internal(format!("cannot decode column '{}'", field.name)).with_cause(e)
        })?;
        entity.set_at(index, value);
    }
    Ok(entity)
}

fn distinct<'v>(values: impl Iterator<Item = &'v Value>) -> Vec<Value> {
    let mut keys: Vec<Value> = Vec::new();
    for value in values {
        if !value.is_null() && !keys.contains(value) {
            keys.push(value.clone());
        }
    }
    keys
}

fn no_rows() -> Error {
    Error::not_found("no rows in result set")
}
