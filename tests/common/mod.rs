#![allow(dead_code)]

use restsql::prelude::*;
use restsql::rusqlite::SqliteStore;
use restsql::{EngineConfig, Registry};
use tempfile::TempDir;

/// Temp-file SQLite database with the `users`/`todos` resources created.
pub struct Fixture {
    pub dir: TempDir,
    pub engine: Engine<SqliteStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path().join("main.db"))
            .attach("tenant", dir.path().join("tenant.db"));
        let engine = Engine::new(registry(), store).with_config(config);
        engine.create_tables().expect("create tables");
        Self { dir, engine }
    }

    /// Creates a todo from a JSON body and returns its id.
    pub fn create_todo(&self, body: &str) -> i64 {
        let output = self
            .engine
            .execute(RestQuery::new("todos", Action::Create).body("application/json", body))
            .expect("create todo");
        id_of(&output)
    }

    pub fn create_user(&self, name: &str) -> i64 {
        let body = format!(r#"{{"name": "{name}"}}"#);
        let output = self
            .engine
            .execute(RestQuery::new("users", Action::Create).body("application/json", body))
            .expect("create user");
        id_of(&output)
    }

    pub fn fetch_todo(&self, id: i64) -> restsql::Result<Entity> {
        self.engine
            .execute(RestQuery::new("todos", Action::Fetch).key(id.to_string()))
            .map(|output| output.into_entity().expect("entity"))
    }

    /// Every todo, ordered by id.
    pub fn todos(&self) -> Page {
        self.engine
            .execute(
                RestQuery::new("todos", Action::Fetch)
                    .limit(0)
                    .sort([Sort::asc("id")]),
            )
            .expect("fetch todos")
            .into_page()
            .expect("page")
    }

    pub fn titles(&self) -> Vec<String> {
        self.todos()
            .slice
            .iter()
            .map(|todo| todo.get("title").and_then(Value::as_str).unwrap_or_default().to_owned())
            .collect()
    }
}

pub fn id_of(output: &Output) -> i64 {
    output
        .entity()
        .and_then(|entity| entity.get("id"))
        .and_then(Value::as_i64)
        .expect("id")
}

pub fn registry() -> Registry {
    Registry::builder()
        .define(
            "users",
            EntitySchema::builder("users")
                .field(FieldDef::new("id", FieldKind::Integer).primary().generated())
                .field(FieldDef::new("name", FieldKind::Text))
                .relation(RelationDef::has_many("todos", "todos", "owner_id")),
            ActionSet::ALL,
        )
        .expect("users")
        .define(
            "todos",
            EntitySchema::builder("todos")
                .field(FieldDef::new("id", FieldKind::Integer).primary().generated())
                .field(FieldDef::new("title", FieldKind::Text))
                .field(FieldDef::new("done", FieldKind::Bool))
                .field(FieldDef::new("priority", FieldKind::Integer))
                .field(FieldDef::new("note", FieldKind::Text).nullable())
                .field(FieldDef::new("owner_id", FieldKind::Integer).nullable())
                .relation(RelationDef::belongs_to("owner", "users", "owner_id")),
            ActionSet::ALL,
        )
        .expect("todos")
        .define(
            "archive",
            EntitySchema::builder("archive")
                .field(FieldDef::new("id", FieldKind::Integer).primary().generated())
                .field(FieldDef::new("title", FieldKind::Text)),
            Action::Fetch,
        )
        .expect("archive")
        .define(
            "inbox",
            EntitySchema::builder("inbox")
                .field(FieldDef::new("id", FieldKind::Integer).primary().generated())
                .field(FieldDef::new("title", FieldKind::Text)),
            Action::Create | Action::Replace | Action::PartialUpdate | Action::Delete,
        )
        .expect("inbox")
        .build()
        .expect("registry")
}
