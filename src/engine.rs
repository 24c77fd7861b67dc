//! Action dispatch: validate, authorize, prepare, execute and finalize one
//! [`RestQuery`].

use std::sync::Arc;

use restsql_core::{
    Action, Entity, Error, ErrorKind, ExecContext, Page, RelationDef, Resource, RestQuery, Result,
    Value,
};
use serde::ser::{Serialize, Serializer};

use crate::codec::{self, Format};
use crate::compile::{self, PageQuery, Target, Window};
use crate::config::EngineConfig;
use crate::executor::Executor;
use crate::registry::Registry;
use crate::store::Store;
use crate::transaction::{Outcome, Propagation, Transactional, Tx};

/// Result of a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Entity(Entity),
    Page(Page),
}

impl Output {
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Output::Entity(entity) => Some(entity),
            Output::Page(_) => None,
        }
    }

    pub fn page(&self) -> Option<&Page> {
        match self {
            Output::Page(page) => Some(page),
            Output::Entity(_) => None,
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Output::Entity(entity) => Some(entity),
            Output::Page(_) => None,
        }
    }

    pub fn into_page(self) -> Option<Page> {
        match self {
            Output::Page(page) => Some(page),
            Output::Entity(_) => None,
        }
    }
}

impl Serialize for Output {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        match self {
            Output::Entity(entity) => entity.serialize(serializer),
            Output::Page(page) => page.serialize(serializer),
        }
    }
}

/// Encoded reply for the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

/// What a validated query will do once a transaction is available.
enum Step<'a> {
    FetchOne {
        key: Value,
        projection: Vec<usize>,
        relations: Vec<&'a RelationDef>,
    },
    FetchPage {
        page: PageQuery<'a>,
        projection: Vec<usize>,
        relations: Vec<&'a RelationDef>,
    },
    Create(Entity),
    Replace(Entity),
    PartialUpdate {
        key: Value,
        body: &'a [u8],
        content_type: &'a str,
    },
    Delete(Value),
}

struct Plan<'a> {
    target: Target<'a>,
    step: Step<'a>,
}

/// The action dispatch engine.
pub struct Engine<S: Store> {
    registry: Arc<Registry>,
    transactional: Transactional<S>,
    config: EngineConfig,
}

impl<S: Store> Engine<S> {
    pub fn new(registry: impl Into<Arc<Registry>>, store: S) -> Self {
        Self {
            registry: registry.into(),
            transactional: Transactional::new(store),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn transactional(&self) -> &Transactional<S> {
        &self.transactional
    }

    /// Runs `query` in a transaction of its own.
    pub fn execute(&self, query: RestQuery) -> Result<Output> {
        self.execute_in(query, None, Propagation::Current)?
            .into_result()
    }

    /// Runs `query` against `ambient` under `propagation`.
    ///
    /// Validation and authorization failures are returned before the store is
    /// touched, so they never roll back a transaction this call does not own.
    pub fn execute_in(
        &self,
        query: RestQuery,
        ambient: Option<&Tx<S::Conn>>,
        propagation: Propagation,
    ) -> Result<Outcome<Output>> {
        if query.debug {
            #[cfg(feature = "tracing")]
            tracing::info!(query = %query, ?propagation, "restsql.request");
        }

        let result = self.prepare(&query).and_then(|plan| {
            self.transactional
                .execute(&query.context, ambient, propagation, |tx| self.run(tx, plan))
        });

        match result {
            Ok(Outcome::Done(output)) => {
                if query.debug {
                    #[cfg(feature = "tracing")]
                    tracing::info!(result = ?output, "restsql.response");
                }
                Ok(Outcome::Done(output))
            }
            Ok(Outcome::Absorbed(err)) => Ok(Outcome::Absorbed(self.finalize_error(&query, err))),
            Err(err) => Err(self.finalize_error(&query, err)),
        }
    }

    /// Executes and encodes `query`, mapping failures to their status codes.
    pub fn respond(&self, query: RestQuery) -> Response {
        let action = query.action;
        let accept = self.accept(&query).to_owned();

        let encoded = self
            .execute(query)
            .and_then(|output| codec::encode(&output, &accept));
        match encoded {
            Ok(_) if action == Action::Delete => Response {
                status: action.success_status(),
                content_type: codec::JSON,
                body: Vec::new(),
            },
            Ok((body, content_type)) => Response {
                status: action.success_status(),
                content_type,
                body,
            },
            Err(err) => error_response(&err),
        }
    }

    /// Creates every registered table that does not exist yet, in the default
    /// namespace.
    pub fn create_tables(&self) -> Result<()> {
        let ctx = ExecContext::new();
        let namespace = self.config.default_namespace.as_deref();
        let dialect = self.transactional.store().dialect();
        self.transactional.current(&ctx, None, |tx| {
            for resource in self.registry.iter() {
                let target = Target::new(resource, namespace, dialect);
                tx.execute(&compile::create_table(&target))?;
            }
            Ok(())
        })
    }

    /// Validate, authorize and prepare the entity; no store access.
    fn prepare<'a>(&'a self, query: &'a RestQuery) -> Result<Plan<'a>> {
        if query.resource.is_empty() {
            return Err(Error::bad_request("resource name is required"));
        }
        let resource = self.registry.lookup(&query.resource).ok_or_else(|| {
            Error::bad_request(format!("unknown resource '{}'", query.resource))
        })?;

        let action = query.action;
        let keyed = !query.key.is_empty();
        match action {
            Action::Create if keyed => {
                return Err(Error::bad_request("key must be empty for create"));
            }
            Action::Replace | Action::PartialUpdate | Action::Delete if !keyed => {
                return Err(Error::bad_request(format!("key is required for {action}")));
            }
            _ => {}
        }

        codec::result_format(self.accept(query))?;

        if !resource.actions().permits(action) {
            return Err(Error::forbidden(format!(
                "action '{action}' is not permitted on resource '{}'",
                resource.name()
            )));
        }

        let namespace = Some(query.namespace.as_str())
            .filter(|ns| !ns.is_empty())
            .or(self.config.default_namespace.as_deref());
        let target = Target::new(resource, namespace, self.transactional.store().dialect());

        let step = match action {
            Action::Fetch => {
                let mut projection = compile::projection(&target, &query.fields)?;
                let relations = compile::relations(&target, &query.relations, &mut projection)?;
                if keyed {
                    Step::FetchOne {
                        key: compile::parse_key(&target, &query.key)?,
                        projection,
                        relations,
                    }
                } else {
                    let window = Window {
                        sort: &query.sort,
                        offset: query.offset,
                        limit: self.config.resolve_limit(query.limit),
                    };
                    Step::FetchPage {
                        page: compile::page(&target, &projection, query.filter.as_ref(), window)?,
                        projection,
                        relations,
                    }
                }
            }
            Action::Create => Step::Create(self.decode_body(resource, query)?),
            Action::Replace => {
                let key = compile::parse_key(&target, &query.key)?;
                let (pk, _) = resource.schema().primary_key(resource.name())?;
                let mut entity = self.decode_body(resource, query)?;
                entity.set_at(pk, key);
                Step::Replace(entity)
            }
            Action::PartialUpdate => {
                let content_type = self.content_type(query);
                Format::detect(content_type)?;
                Step::PartialUpdate {
                    key: compile::parse_key(&target, &query.key)?,
                    body: &query.body,
                    content_type,
                }
            }
            Action::Delete => Step::Delete(compile::parse_key(&target, &query.key)?),
        };

        Ok(Plan { target, step })
    }

    fn run(&self, tx: &Tx<S::Conn>, plan: Plan<'_>) -> Result<Output> {
        let executor = Executor::new(tx, &self.registry, plan.target);
        let output = match plan.step {
            Step::FetchOne {
                key,
                projection,
                relations,
            } => Output::Entity(executor.fetch_one(key, &projection, &relations)?),
            Step::FetchPage {
                page,
                projection,
                relations,
            } => Output::Page(executor.fetch_page(&page, &projection, &relations)?),
            Step::Create(entity) => Output::Entity(executor.create(&entity)?),
            Step::Replace(entity) => Output::Entity(executor.replace(&entity)?),
            Step::PartialUpdate {
                key,
                body,
                content_type,
            } => Output::Entity(executor.partial_update(key, body, content_type)?),
            Step::Delete(key) => Output::Entity(executor.delete(key)?),
        };
        Ok(output)
    }

    /// A zeroed entity with the request body decoded onto it.
    fn decode_body(&self, resource: &Resource, query: &RestQuery) -> Result<Entity> {
        let content_type = self.content_type(query);
        Format::detect(content_type)?;
        let mut entity = Entity::zeroed(resource.schema());
        codec::decode(&query.body, content_type, &mut entity)?;
        Ok(entity)
    }

    fn content_type<'a>(&'a self, query: &'a RestQuery) -> &'a str {
        if query.content_type.trim().is_empty() {
            &self.config.default_content_type
        } else {
            &query.content_type
        }
    }

    fn accept<'a>(&'a self, query: &'a RestQuery) -> &'a str {
        if query.accept.trim().is_empty() {
            &self.config.default_accept
        } else {
            &query.accept
        }
    }

    fn finalize_error(&self, query: &RestQuery, err: Error) -> Error {
        match err.kind() {
            ErrorKind::NotFound if !query.key.is_empty() => err.with_message(format!(
                "resource '{}' with key '{}' not found",
                query.resource, query.key
            )),
            ErrorKind::Internal => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    error = %err,
                    cause = ?err.cause(),
                    resource = %query.resource,
                    action = %query.action,
                    "restsql.execute.failed"
                );
                err
            }
            _ => err,
        }
    }
}

fn error_response(err: &Error) -> Response {
    let body = serde_json::json!({
        "status": err.status_code(),
        "error": err.public_message(),
    });
    Response {
        status: err.status_code(),
        content_type: codec::JSON,
        body: serde_json::to_vec(&body).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restsql_core::{ActionSet, EntitySchema, FieldDef, FieldKind};

    use crate::store::Connection;

    /// Store that fails the test if it is ever reached.
    struct Unreachable;

    struct NoConn;

    impl Connection for NoConn {
        fn dialect(&self) -> restsql_core::Dialect {
            restsql_core::Dialect::SQLite
        }
        fn execute_control(&self, _: &str) -> Result<()> {
            unreachable!("store accessed")
        }
        fn execute(&self, _: &restsql_core::SQL<'_>) -> Result<usize> {
            unreachable!("store accessed")
        }
        fn query(&self, _: &restsql_core::SQL<'_>) -> Result<Vec<Vec<Value>>> {
            unreachable!("store accessed")
        }
        fn bind_context(&self, _: Option<ExecContext>) -> Option<ExecContext> {
            None
        }
    }

    impl Store for Unreachable {
        type Conn = NoConn;
        fn dialect(&self) -> restsql_core::Dialect {
            restsql_core::Dialect::SQLite
        }
        fn connect(&self, _: &ExecContext) -> Result<NoConn> {
            unreachable!("store accessed")
        }
    }

    fn engine() -> Engine<Unreachable> {
        let registry = Registry::builder()
            .define(
                "todos",
                EntitySchema::builder("todos")
                    .field(FieldDef::new("id", FieldKind::Integer).primary().generated())
                    .field(FieldDef::new("title", FieldKind::Text)),
                Action::Fetch,
            )
            .unwrap()
            .build()
            .unwrap();
        Engine::new(registry, Unreachable)
    }

    fn kind(result: Result<Output>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    #[test]
    fn validation_happens_before_store_access() {
        let engine = engine();
        assert_eq!(
            kind(engine.execute(RestQuery::new("", Action::Fetch))),
            ErrorKind::BadRequest
        );
        assert_eq!(
            kind(engine.execute(RestQuery::new("nope", Action::Fetch))),
            ErrorKind::BadRequest
        );
        assert_eq!(
            kind(engine.execute(RestQuery::new("todos", Action::Delete))),
            ErrorKind::BadRequest
        );
        assert_eq!(
            kind(engine.execute(RestQuery::new("todos", Action::Create).key("1"))),
            ErrorKind::BadRequest
        );
        assert_eq!(
            kind(engine.execute(RestQuery::new("todos", Action::Fetch).key("abc"))),
            ErrorKind::BadRequest
        );
        assert_eq!(
            kind(engine.execute(RestQuery::new("todos", Action::Fetch).fields(["nope"]))),
            ErrorKind::BadRequest
        );
        assert_eq!(
            kind(engine.execute(RestQuery::new("todos", Action::Fetch).accept("text/html"))),
            ErrorKind::BadRequest
        );
    }

    #[test]
    fn unpermitted_actions_are_forbidden() {
        let engine = engine();
        for action in [Action::Create, Action::Replace, Action::PartialUpdate, Action::Delete] {
            let mut query = RestQuery::new("todos", action)
                .body("application/json", br#"{"title":"x"}"#.to_vec());
            if action != Action::Create {
                query = query.key("1");
            }
            assert_eq!(kind(engine.execute(query)), ErrorKind::Forbidden, "{action}");
        }
    }

    #[test]
    fn error_responses_hide_internal_detail() {
        let response = error_response(&Error::internal("disk on fire"));
        assert_eq!(response.status, 500);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], "internal error");

        let response = error_response(&Error::forbidden("no"));
        assert_eq!(response.status, 403);
    }

    #[test]
    fn mandatory_without_ambient_is_internal() {
        let engine = engine();
        let err = engine
            .execute_in(RestQuery::new("todos", Action::Fetch), None, Propagation::Mandatory)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn registry_defaults() {
        let engine = engine();
        assert_eq!(engine.registry().len(), 1);
        assert_eq!(engine.config().default_limit, 10);
        let resource = engine.registry().lookup("todos").unwrap();
        assert_eq!(resource.actions(), ActionSet::from(Action::Fetch));
    }
}
