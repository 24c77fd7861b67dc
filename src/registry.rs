//! Read-only resource registry.
//!
//! Populated through [`RegistryBuilder`] before traffic is served; the built
//! [`Registry`] is immutable and safe to share across threads.

use std::sync::Arc;

use hashbrown::HashMap;
use restsql_core::{ActionSet, EntitySchemaBuilder, RelationKind, Resource, SchemaError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("resource name must not be empty")]
    EmptyName,

    #[error("resource '{0}' is already registered")]
    Duplicate(String),

    #[error("invalid schema for resource '{resource}': {source}")]
    Schema {
        resource: String,
        #[source]
        source: SchemaError,
    },

    #[error("relation '{relation}' of '{resource}' targets unregistered resource '{target}'")]
    UnknownTarget {
        resource: String,
        relation: String,
        target: String,
    },

    #[error("relation '{relation}' of '{resource}' names field '{field}' missing on '{target}'")]
    UnknownForeignField {
        resource: String,
        relation: String,
        target: String,
        field: String,
    },

    #[error("relation '{relation}' of '{resource}' requires '{keyed}' to have a single primary key")]
    RelationKey {
        resource: String,
        relation: String,
        keyed: String,
    },
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    resources: HashMap<String, Arc<Resource>>,
}

impl RegistryBuilder {
    pub fn register(mut self, resource: Resource) -> Result<Self, RegistryError> {
        if resource.name().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.resources.contains_key(resource.name()) {
            return Err(RegistryError::Duplicate(resource.name().to_owned()));
        }
        self.resources
            .insert(resource.name().to_owned(), Arc::new(resource));
        Ok(self)
    }

    /// Builds the schema and registers it under `name`.
    pub fn define(
        self,
        name: impl Into<String>,
        schema: EntitySchemaBuilder,
        actions: impl Into<ActionSet>,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        let schema = schema.build().map_err(|source| RegistryError::Schema {
            resource: name.clone(),
            source,
        })?;
        self.register(Resource::new(name, schema, actions))
    }

    /// Checks every relation against the registered resources.
    pub fn build(self) -> Result<Registry, RegistryError> {
        for resource in self.resources.values() {
            for relation in resource.schema().relations() {
                let Some(target) = self.resources.get(&relation.target) else {
                    return Err(RegistryError::UnknownTarget {
                        resource: resource.name().to_owned(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    });
                };
                // BelongsTo points at the target's key, HasMany at ours.
                let keyed = match &relation.kind {
                    RelationKind::BelongsTo { .. } => target,
                    RelationKind::HasMany { foreign } => {
                        if target.schema().field(foreign).is_none() {
                            return Err(RegistryError::UnknownForeignField {
                                resource: resource.name().to_owned(),
                                relation: relation.name.clone(),
                                target: relation.target.clone(),
                                field: foreign.clone(),
                            });
                        }
                        resource
                    }
                };
                if keyed.schema().primary_key(keyed.name()).is_err() {
                    return Err(RegistryError::RelationKey {
                        resource: resource.name().to_owned(),
                        relation: relation.name.clone(),
                        keyed: keyed.name().to_owned(),
                    });
                }
            }
        }
        Ok(Registry {
            resources: self.resources,
        })
    }
}

/// Resource name to resource, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: HashMap<String, Arc<Resource>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[inline]
    pub fn lookup(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
