#![cfg(feature = "rusqlite")]

use common::{Fixture, id_of};
use restsql::EngineConfig;
use restsql::prelude::*;

mod common;

fn kind_of(result: restsql::Result<Output>) -> ErrorKind {
    result.unwrap_err().kind()
}

#[test]
fn test_create_reflects_identity() {
    let fx = Fixture::new();

    let first = fx.create_todo(r#"{"title": "milk", "priority": 1}"#);
    let second = fx.create_todo(r#"{"title": "eggs"}"#);
    assert_ne!(first, second);

    let eggs = fx.fetch_todo(second).unwrap();
    assert_eq!(eggs.get("title"), Some(&Value::from("eggs")));
    assert_eq!(eggs.get("done"), Some(&Value::Bool(false)));
    assert_eq!(eggs.get("note"), Some(&Value::Null));
}

#[test]
fn test_partial_update_keeps_absent_fields() {
    let fx = Fixture::new();
    let id = fx.create_todo(r#"{"title": "x", "priority": 1}"#);

    let output = fx
        .engine
        .execute(
            RestQuery::new("todos", Action::PartialUpdate)
                .key(id.to_string())
                .body("application/json", r#"{"priority": 2}"#),
        )
        .unwrap();
    let updated = output.entity().unwrap();
    assert_eq!(updated.get("title"), Some(&Value::from("x")));
    assert_eq!(updated.get("priority"), Some(&Value::Integer(2)));

    // Stored row agrees with the returned one
    let stored = fx.fetch_todo(id).unwrap();
    assert_eq!(stored.get("title"), Some(&Value::from("x")));
    assert_eq!(stored.get("priority"), Some(&Value::Integer(2)));
}

#[test]
fn test_replace_overwrites_every_field() {
    let fx = Fixture::new();
    let id = fx.create_todo(r#"{"title": "x", "priority": 1, "note": "keep?"}"#);

    fx.engine
        .execute(
            RestQuery::new("todos", Action::Replace)
                .key(id.to_string())
                .body("application/json", r#"{"priority": 2}"#),
        )
        .unwrap();

    let stored = fx.fetch_todo(id).unwrap();
    assert_eq!(stored.get("title"), Some(&Value::from("")));
    assert_eq!(stored.get("priority"), Some(&Value::Integer(2)));
    assert_eq!(stored.get("note"), Some(&Value::Null));
}

#[test]
fn test_body_cannot_change_primary_key() {
    let fx = Fixture::new();
    let id = fx.create_todo(r#"{"title": "x"}"#);

    let output = fx
        .engine
        .execute(
            RestQuery::new("todos", Action::PartialUpdate)
                .key(id.to_string())
                .body("application/json", format!(r#"{{"id": {}, "title": "y"}}"#, id + 100)),
        )
        .unwrap();
    assert_eq!(id_of(&output), id);
    assert!(fx.fetch_todo(id + 100).is_err());
}

#[test]
fn test_form_body() {
    let fx = Fixture::new();

    let output = fx
        .engine
        .execute(
            RestQuery::new("todos", Action::Create)
                .body("application/x-www-form-urlencoded", "title=buy+bread&done=true&ignored=1"),
        )
        .unwrap();
    let todo = output.entity().unwrap();
    assert_eq!(todo.get("title"), Some(&Value::from("buy bread")));
    assert_eq!(todo.get("done"), Some(&Value::Bool(true)));
}

#[test]
fn test_missing_keys_are_not_found() {
    let fx = Fixture::new();
    fx.create_todo(r#"{"title": "x"}"#);

    let fetch = fx.fetch_todo(99).unwrap_err();
    assert_eq!(fetch.kind(), ErrorKind::NotFound);
    assert_eq!(fetch.message(), "resource 'todos' with key '99' not found");

    let body = r#"{"title": "y"}"#;
    for action in [Action::Replace, Action::PartialUpdate, Action::Delete] {
        let query = RestQuery::new("todos", action)
            .key("99")
            .body("application/json", body);
        assert_eq!(kind_of(fx.engine.execute(query)), ErrorKind::NotFound, "{action}");
    }

    // Nothing was written by the failed calls
    assert_eq!(fx.titles(), ["x"]);
}

#[test]
fn test_delete_returns_removed_entity() {
    let fx = Fixture::new();
    let id = fx.create_todo(r#"{"title": "gone"}"#);

    let output = fx
        .engine
        .execute(RestQuery::new("todos", Action::Delete).key(id.to_string()))
        .unwrap();
    assert_eq!(output.entity().unwrap().get("title"), Some(&Value::from("gone")));
    assert_eq!(fx.fetch_todo(id).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_action_permissions() {
    let fx = Fixture::new();

    // Fetch-only resource
    assert_eq!(
        kind_of(
            fx.engine
                .execute(RestQuery::new("archive", Action::Create).body("application/json", "{}"))
        ),
        ErrorKind::Forbidden
    );
    for action in [Action::Replace, Action::PartialUpdate, Action::Delete] {
        let query = RestQuery::new("archive", action)
            .key("1")
            .body("application/json", "{}");
        assert_eq!(kind_of(fx.engine.execute(query)), ErrorKind::Forbidden);
    }
    assert!(fx.engine.execute(RestQuery::new("archive", Action::Fetch)).is_ok());

    // Everything but fetch
    assert_eq!(
        kind_of(fx.engine.execute(RestQuery::new("inbox", Action::Fetch))),
        ErrorKind::Forbidden
    );
    assert!(
        fx.engine
            .execute(RestQuery::new("inbox", Action::Create).body("application/json", "{}"))
            .is_ok()
    );
}

#[test]
fn test_page_count_ignores_window() {
    let fx = Fixture::new();
    for title in ["a", "b", "c"] {
        fx.create_todo(&format!(r#"{{"title": "{title}"}}"#));
    }

    let page = fx
        .engine
        .execute(RestQuery::new("todos", Action::Fetch).offset(10).limit(5))
        .unwrap()
        .into_page()
        .unwrap();
    assert!(page.slice.is_empty());
    assert_eq!(page.count, 3);
    assert_eq!((page.offset, page.limit), (10, 5));

    let page = fx
        .engine
        .execute(
            RestQuery::new("todos", Action::Fetch)
                .offset(1)
                .limit(1)
                .sort([Sort::desc("title")]),
        )
        .unwrap()
        .into_page()
        .unwrap();
    assert_eq!(page.count, 3);
    assert_eq!(page.slice.len(), 1);
    assert_eq!(page.slice[0].get("title"), Some(&Value::from("b")));
}

#[test]
fn test_default_and_max_limit() {
    let fx = Fixture::with_config(EngineConfig {
        default_limit: 2,
        max_limit: 3,
        ..EngineConfig::default()
    });
    for i in 0..5 {
        fx.create_todo(&format!(r#"{{"title": "t{i}"}}"#));
    }

    let page = |query: RestQuery| fx.engine.execute(query).unwrap().into_page().unwrap();

    let defaulted = page(RestQuery::new("todos", Action::Fetch));
    assert_eq!((defaulted.slice.len(), defaulted.limit, defaulted.count), (2, 2, 5));

    let clamped = page(RestQuery::new("todos", Action::Fetch).limit(50));
    assert_eq!((clamped.slice.len(), clamped.limit), (3, 3));
}

#[test]
fn test_field_selection() {
    let fx = Fixture::new();
    let id = fx.create_todo(r#"{"title": "x", "priority": 7}"#);

    let output = fx
        .engine
        .execute(
            RestQuery::new("todos", Action::Fetch)
                .key(id.to_string())
                .fields(["priority"]),
        )
        .unwrap();
    let todo = output.entity().unwrap();
    assert_eq!(todo.get("priority"), Some(&Value::Integer(7)));
    // Unselected fields keep their zero value
    assert_eq!(todo.get("title"), Some(&Value::from("")));
    assert_eq!(todo.get("id"), Some(&Value::Integer(0)));
}

#[test]
fn test_relations_are_loaded() {
    let fx = Fixture::new();
    let ada = fx.create_user("ada");
    let bob = fx.create_user("bob");
    fx.create_todo(&format!(r#"{{"title": "a1", "owner_id": {ada}}}"#));
    fx.create_todo(&format!(r#"{{"title": "a2", "owner_id": {ada}}}"#));
    fx.create_todo(r#"{"title": "orphan"}"#);

    // has-many on fetch-one
    let output = fx
        .engine
        .execute(
            RestQuery::new("users", Action::Fetch)
                .key(ada.to_string())
                .relations(["todos"]),
        )
        .unwrap();
    let Some(Related::Many(todos)) = output.entity().unwrap().relation("todos") else {
        panic!("todos not loaded");
    };
    assert_eq!(todos.len(), 2);

    let output = fx
        .engine
        .execute(
            RestQuery::new("users", Action::Fetch)
                .key(bob.to_string())
                .relations(["todos"]),
        )
        .unwrap();
    assert_eq!(
        output.entity().unwrap().relation("todos"),
        Some(&Related::Many(Vec::new()))
    );

    // belongs-to on fetch-page, with the join column outside the selection
    let page = fx
        .engine
        .execute(
            RestQuery::new("todos", Action::Fetch)
                .fields(["title"])
                .relations(["owner"])
                .sort([Sort::asc("title")]),
        )
        .unwrap()
        .into_page()
        .unwrap();
    let owners: Vec<Option<String>> = page
        .slice
        .iter()
        .map(|todo| match todo.relation("owner") {
            Some(Related::One(Some(owner))) => {
                owner.get("name").and_then(Value::as_str).map(str::to_owned)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        owners,
        [Some("ada".to_owned()), Some("ada".to_owned()), None]
    );

    let json = serde_json::to_value(&page.slice[0]).unwrap();
    assert_eq!(json["owner"]["name"], "ada");

    // Unknown relation
    assert_eq!(
        kind_of(
            fx.engine
                .execute(RestQuery::new("todos", Action::Fetch).relations(["tags"]))
        ),
        ErrorKind::BadRequest
    );
}

#[test]
fn test_cancelled_context_rolls_back() {
    let fx = Fixture::new();
    let ctx = ExecContext::new();
    ctx.cancel();

    let err = fx
        .engine
        .execute(
            RestQuery::new("todos", Action::Create)
                .body("application/json", r#"{"title": "never"}"#)
                .context(ctx),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.public_message(), "internal error");
    assert!(fx.titles().is_empty());
}

#[test]
fn test_unsupported_content_type() {
    let fx = Fixture::new();
    let query = RestQuery::new("todos", Action::Create).body("text/csv", "title\nx");
    assert_eq!(kind_of(fx.engine.execute(query)), ErrorKind::BadRequest);

    let id = fx.create_todo(r#"{"title": "x"}"#);
    let query = RestQuery::new("todos", Action::PartialUpdate)
        .key(id.to_string())
        .body("text/csv", "title\ny");
    assert_eq!(kind_of(fx.engine.execute(query)), ErrorKind::BadRequest);
}

#[test]
fn test_malformed_body_is_internal() {
    let fx = Fixture::new();
    let query = RestQuery::new("todos", Action::Create).body("application/json", "{not json");
    assert_eq!(kind_of(fx.engine.execute(query)), ErrorKind::Internal);
}

#[test]
fn test_namespace_override() {
    let fx = Fixture::with_config(EngineConfig {
        default_namespace: Some("tenant".into()),
        ..EngineConfig::default()
    });

    // Same files, no default namespace
    let store = restsql::rusqlite::SqliteStore::open(fx.dir.path().join("main.db"))
        .attach("tenant", fx.dir.path().join("tenant.db"));
    let plain = Engine::new(common::registry(), store);
    plain.create_tables().unwrap();

    fx.create_todo(r#"{"title": "tenant row"}"#);

    let count = |engine: &Engine<_>, namespace: &str| {
        engine
            .execute(RestQuery::new("todos", Action::Fetch).namespace(namespace))
            .unwrap()
            .into_page()
            .unwrap()
            .count
    };
    assert_eq!(count(&plain, ""), 0);
    assert_eq!(count(&plain, "tenant"), 1);
    assert_eq!(count(&fx.engine, ""), 1);
    assert_eq!(count(&fx.engine, "main"), 0);
}

#[test]
fn test_respond_maps_status_codes() {
    let fx = Fixture::new();

    let created = fx.engine.respond(
        RestQuery::new("todos", Action::Create).body("application/json", r#"{"title": "x"}"#),
    );
    assert_eq!(created.status, 201);
    assert_eq!(created.content_type, "application/json; charset=utf-8");
    let body: serde_json::Value = serde_json::from_slice(&created.body).unwrap();
    assert_eq!(body["title"], "x");
    let id = body["id"].as_i64().unwrap();

    let fetched = fx.engine.respond(RestQuery::new("todos", Action::Fetch));
    assert_eq!(fetched.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&fetched.body).unwrap();
    assert_eq!(body["count"], 1);

    let deleted = fx
        .engine
        .respond(RestQuery::new("todos", Action::Delete).key(id.to_string()));
    assert_eq!(deleted.status, 204);
    assert!(deleted.body.is_empty());

    let missing = fx
        .engine
        .respond(RestQuery::new("todos", Action::Delete).key(id.to_string()));
    assert_eq!(missing.status, 404);

    let forbidden = fx.engine.respond(RestQuery::new("archive", Action::Delete).key("1"));
    assert_eq!(forbidden.status, 403);

    let bad = fx.engine.respond(RestQuery::new("nope", Action::Fetch));
    assert_eq!(bad.status, 400);
    let body: serde_json::Value = serde_json::from_slice(&bad.body).unwrap();
    assert_eq!(body["error"], "unknown resource 'nope'");
}

#[test]
fn test_unsupported_accept_rejects_before_writing() {
    let fx = Fixture::new();

    for accept in ["application/x-www-form-urlencoded", "text/html"] {
        let response = fx.engine.respond(
            RestQuery::new("todos", Action::Create)
                .body("application/json", r#"{"title": "x"}"#)
                .accept(accept),
        );
        assert_eq!(response.status, 400);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], format!("unsupported accept type '{accept}'"));
    }

    assert!(fx.titles().is_empty());
}

#[test]
fn test_relations_load_across_many_keys() {
    let fx = Fixture::new();
    let ctx = ExecContext::new();

    // More distinct owners than one relation query binds
    fx.engine
        .transactional()
        .current(&ctx, None, |tx| {
            for i in 0..1_200 {
                let user = fx
                    .engine
                    .execute_in(
                        RestQuery::new("users", Action::Create)
                            .body("application/json", format!(r#"{{"name": "u{i}"}}"#)),
                        Some(tx),
                        Propagation::Current,
                    )?
                    .into_result()?;
                let owner = id_of(&user);
                fx.engine
                    .execute_in(
                        RestQuery::new("todos", Action::Create).body(
                            "application/json",
                            format!(r#"{{"title": "t{i}", "owner_id": {owner}}}"#),
                        ),
                        Some(tx),
                        Propagation::Current,
                    )?
                    .into_result()?;
            }
            Ok(())
        })
        .unwrap();

    let page = fx
        .engine
        .execute(
            RestQuery::new("todos", Action::Fetch)
                .limit(0)
                .relations(["owner"]),
        )
        .unwrap()
        .into_page()
        .unwrap();
    assert_eq!(page.count, 1_200);
    for todo in &page.slice {
        let Some(Related::One(Some(owner))) = todo.relation("owner") else {
            panic!("owner not loaded for {:?}", todo.get("title"));
        };
        assert_eq!(owner.get("id"), todo.get("owner_id"));
    }
}
