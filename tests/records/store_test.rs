//! Tests for `src/records/store.rs`: generic CRUD over a materialized shape.

use std::time::Duration;

use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use modelgate::error::{GateError, NotFound};
use modelgate::model::{FieldDefinition, FieldKind, ModelDefinition};
use modelgate::records::{payload_from_json, FieldValue, Page, Payload, RecordStore};
use modelgate::schema::StorageShape;

async fn setup() -> (RecordStore, StorageShape) {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect");

    let model = ModelDefinition::new("Ticket")
        .field(FieldDefinition::new("title", FieldKind::ShortText).required())
        .field(FieldDefinition::new("code", FieldKind::ShortText).unique())
        .field(FieldDefinition::new("estimate", FieldKind::Number))
        .field(FieldDefinition::new("done", FieldKind::Boolean).required().with_default(json!(false)))
        .field(FieldDefinition::new("due", FieldKind::Date))
        .field(FieldDefinition::new("notes", FieldKind::LongText))
        .owned_by("ownerId");
    let shape = StorageShape::from_model(&model);
    shape.materialize(&pool).await.expect("materialize");
    (RecordStore::new(pool), shape)
}

fn payload(value: serde_json::Value) -> Payload {
    payload_from_json(value).expect("payload should convert")
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let (store, shape) = setup().await;
    let created = store
        .create(
            &shape,
            payload(json!({
                "title": "write tests",
                "estimate": 2.5,
                "due": "2024-01-02",
                "notes": "it's fine",
            })),
        )
        .await
        .expect("create");

    assert_eq!(created.id, 1);
    assert_eq!(created.created_at, created.updated_at);
    assert_eq!(created.get("title"), Some(&FieldValue::Text("write tests".into())));
    assert_eq!(created.get("estimate"), Some(&FieldValue::Number(2.5)));
    assert_eq!(created.get("due"), Some(&FieldValue::Date("2024-01-02".into())));
    assert_eq!(created.get("notes"), Some(&FieldValue::Text("it's fine".into())));
    assert_eq!(created.get("done"), Some(&FieldValue::Boolean(false)));
    assert_eq!(created.get("code"), Some(&FieldValue::Null));

    let fetched = store.get(&shape, created.id).await.expect("get");
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn booleans_round_trip() {
    let (store, shape) = setup().await;
    let created = store
        .create(&shape, payload(json!({ "title": "t", "done": true })))
        .await
        .expect("create");
    assert_eq!(created.get("done"), Some(&FieldValue::Boolean(true)));
}

#[tokio::test]
async fn unknown_and_implicit_keys_are_ignored() {
    let (store, shape) = setup().await;
    let created = store
        .create(
            &shape,
            payload(json!({
                "title": "t",
                "bogus": 1,
                "id": 99,
                "createdAt": "1999-01-01",
            })),
        )
        .await
        .expect("create");
    assert_ne!(created.id, 99);
    assert_ne!(created.created_at, "1999-01-01");
    assert!(created.get("bogus").is_none());
}

#[tokio::test]
async fn missing_or_null_required_field_is_validation() {
    let (store, shape) = setup().await;

    let err = store
        .create(&shape, payload(json!({ "notes": "no title" })))
        .await
        .expect_err("title missing");
    assert!(matches!(err, GateError::Validation(msg) if msg.contains("title")));

    let err = store
        .create(&shape, payload(json!({ "title": null })))
        .await
        .expect_err("title null");
    assert!(matches!(err, GateError::Validation(_)));

    let rows = store.list(&shape, Page::default()).await.expect("list");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn unique_violation_is_validation() {
    let (store, shape) = setup().await;
    store
        .create(&shape, payload(json!({ "title": "a", "code": "T-1" })))
        .await
        .expect("first");
    let err = store
        .create(&shape, payload(json!({ "title": "b", "code": "T-1" })))
        .await
        .expect_err("duplicate code");
    assert!(matches!(err, GateError::Validation(_)));
}

#[tokio::test]
async fn get_missing_record_is_not_found() {
    let (store, shape) = setup().await;
    let err = store.get(&shape, 42).await.expect_err("empty table");
    assert!(matches!(
        err,
        GateError::NotFound(NotFound::Record { id: 42, .. })
    ));
}

#[tokio::test]
async fn delete_twice_reports_true_then_false() {
    let (store, shape) = setup().await;
    let created = store
        .create(&shape, payload(json!({ "title": "gone" })))
        .await
        .expect("create");
    assert!(store.delete(&shape, created.id).await.expect("first delete"));
    assert!(!store.delete(&shape, created.id).await.expect("second delete"));
}

#[tokio::test]
async fn empty_update_is_rejected_and_leaves_row_untouched() {
    let (store, shape) = setup().await;
    let created = store
        .create(&shape, payload(json!({ "title": "t" })))
        .await
        .expect("create");

    tokio::time::sleep(Duration::from_millis(20)).await;
    for body in [json!({}), json!({ "unknown": 1, "updatedAt": "x" })] {
        let err = store
            .update(&shape, created.id, payload(body))
            .await
            .expect_err("nothing to update");
        assert!(matches!(err, GateError::Validation(_)));
    }

    let fetched = store.get(&shape, created.id).await.expect("get");
    assert_eq!(fetched.updated_at, created.updated_at);
}

#[tokio::test]
async fn update_overwrites_fields_and_refreshes_updated_at() {
    let (store, shape) = setup().await;
    let created = store
        .create(&shape, payload(json!({ "title": "old", "estimate": 1 })))
        .await
        .expect("create");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let updated = store
        .update(&shape, created.id, payload(json!({ "title": "new", "done": true })))
        .await
        .expect("update");

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.get("title"), Some(&FieldValue::Text("new".into())));
    assert_eq!(updated.get("done"), Some(&FieldValue::Boolean(true)));
    assert_eq!(updated.get("estimate"), Some(&FieldValue::Number(1.0)));
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at > created.updated_at);
}

#[tokio::test]
async fn update_missing_record_is_not_found() {
    let (store, shape) = setup().await;
    let err = store
        .update(&shape, 7, payload(json!({ "title": "x" })))
        .await
        .expect_err("no row");
    assert!(matches!(err, GateError::NotFound(NotFound::Record { id: 7, .. })));
}

#[tokio::test]
async fn list_is_newest_first_and_paginated() {
    let (store, shape) = setup().await;
    for n in 1..=5 {
        store
            .create(&shape, payload(json!({ "title": format!("t{n}") })))
            .await
            .expect("create");
    }

    let ids = |records: Vec<modelgate::records::Record>| records.iter().map(|r| r.id).collect::<Vec<_>>();

    let first = store.list(&shape, Page::first(2)).await.expect("page 1");
    assert_eq!(ids(first), vec![5, 4]);

    let second = store
        .list(&shape, Page { limit: 2, offset: 2 })
        .await
        .expect("page 2");
    assert_eq!(ids(second), vec![3, 2]);

    let all = store.list(&shape, Page::default()).await.expect("all");
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn lookup_owner_reads_one_row() {
    let (store, shape) = setup().await;
    let mut body = payload(json!({ "title": "mine" }));
    body.insert("ownerId".into(), FieldValue::Text("u1".into()));
    let created = store.create(&shape, body).await.expect("create");

    assert_eq!(
        store.lookup_owner(&shape, created.id).await.expect("lookup"),
        Some("u1".to_owned())
    );
    assert_eq!(store.lookup_owner(&shape, 999).await.expect("lookup"), None);
}
