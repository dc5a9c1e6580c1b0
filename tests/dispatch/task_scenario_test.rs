//! End-to-end access decisions on the Task model through `Dispatcher`.

use std::sync::Arc;

use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use modelgate::dispatch::{Dispatcher, Operation, Outcome};
use modelgate::error::{ForbiddenReason, GateError, NotFound};
use modelgate::model::{FieldDefinition, FieldKind, Identity, ModelDefinition, PermissionToken};
use modelgate::records::{payload_from_json, FieldValue, Page, Payload, Record, RecordStore};
use modelgate::registry::ModelRegistry;

async fn setup() -> Dispatcher {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect");

    let task = ModelDefinition::new("Task")
        .field(FieldDefinition::new("title", FieldKind::ShortText).required())
        .owned_by("ownerId")
        .grant("Admin", &[PermissionToken::All])
        .grant("Viewer", &[PermissionToken::Read])
        .grant(
            "Owner",
            &[PermissionToken::Read, PermissionToken::Update, PermissionToken::Delete],
        );

    let registry = Arc::new(ModelRegistry::new(pool.clone()));
    registry.register(task).await.expect("register Task");
    Dispatcher::new(registry, RecordStore::new(pool))
}

fn payload(value: serde_json::Value) -> Payload {
    payload_from_json(value).expect("payload should convert")
}

fn record(outcome: Outcome) -> Record {
    match outcome {
        Outcome::Record(record) => record,
        other => panic!("expected a record, got {other:?}"),
    }
}

/// u1 creates a task. The Owner grant in this policy has no `create`, so u1
/// also holds Admin for the insert; ownership is stamped from the caller id.
async fn create_as_u1(dispatcher: &Dispatcher) -> Record {
    let u1 = Identity::new("u1", ["Owner", "Admin"]);
    let outcome = dispatcher
        .dispatch("Task", Some(&u1), Operation::Create(payload(json!({ "title": "ship it" }))))
        .await
        .expect("u1 creates");
    record(outcome)
}

fn assert_forbidden(result: Result<Outcome, GateError>, expected: ForbiddenReason) {
    match result {
        Err(GateError::Forbidden { reason, .. }) => assert_eq!(reason, expected),
        other => panic!("expected Forbidden({expected:?}), got {other:?}"),
    }
}

#[tokio::test]
async fn creator_becomes_owner() {
    let dispatcher = setup().await;
    let created = create_as_u1(&dispatcher).await;
    assert_eq!(created.get("ownerId"), Some(&FieldValue::Text("u1".into())));
}

#[tokio::test]
async fn owner_column_cannot_be_spoofed() {
    let dispatcher = setup().await;
    let admin = Identity::new("root", ["Admin"]);
    let outcome = dispatcher
        .dispatch(
            "Task",
            Some(&admin),
            Operation::Create(payload(json!({ "title": "t", "ownerId": "someone-else" }))),
        )
        .await
        .expect("create");
    assert_eq!(record(outcome).get("ownerId"), Some(&FieldValue::Text("root".into())));
}

#[tokio::test]
async fn owner_only_identity_cannot_create_without_token() {
    let dispatcher = setup().await;
    let u1 = Identity::new("u1", ["Owner"]);
    let result = dispatcher
        .dispatch("Task", Some(&u1), Operation::Create(payload(json!({ "title": "t" }))))
        .await;
    assert_forbidden(result, ForbiddenReason::NoRoleGrant);
}

#[tokio::test]
async fn other_owner_cannot_update() {
    let dispatcher = setup().await;
    let created = create_as_u1(&dispatcher).await;

    let u2 = Identity::new("u2", ["Owner"]);
    let result = dispatcher
        .dispatch(
            "Task",
            Some(&u2),
            Operation::Update(created.id, payload(json!({ "title": "hijacked" }))),
        )
        .await;
    assert_forbidden(result, ForbiddenReason::NotOwner);

    let unchanged = dispatcher
        .records()
        .get(&dispatcher.registry().resolve("Task").expect("resolve").shape, created.id)
        .await
        .expect("get");
    assert_eq!(unchanged.get("title"), Some(&FieldValue::Text("ship it".into())));
}

#[tokio::test]
async fn owner_updates_and_deletes_own_record() {
    let dispatcher = setup().await;
    let created = create_as_u1(&dispatcher).await;
    let u1 = Identity::new("u1", ["Owner"]);

    let updated = dispatcher
        .dispatch(
            "Task",
            Some(&u1),
            Operation::Update(created.id, payload(json!({ "title": "shipped" }))),
        )
        .await
        .expect("owner updates");
    assert_eq!(record(updated).get("title"), Some(&FieldValue::Text("shipped".into())));

    let deleted = dispatcher
        .dispatch("Task", Some(&u1), Operation::Delete(created.id))
        .await
        .expect("owner deletes");
    assert_eq!(deleted, Outcome::Deleted { deleted: true });
}

#[tokio::test]
async fn owner_reads_every_record() {
    let dispatcher = setup().await;
    create_as_u1(&dispatcher).await;

    let u2 = Identity::new("u2", ["Owner"]);
    let outcome = dispatcher
        .dispatch("Task", Some(&u2), Operation::List(Page::default()))
        .await
        .expect("owner reads");
    assert!(matches!(outcome, Outcome::Records(rows) if rows.len() == 1));
}

#[tokio::test]
async fn viewer_cannot_delete() {
    let dispatcher = setup().await;
    let created = create_as_u1(&dispatcher).await;

    let viewer = Identity::new("v1", ["Viewer"]);
    let result = dispatcher
        .dispatch("Task", Some(&viewer), Operation::Delete(created.id))
        .await;
    assert_forbidden(result, ForbiddenReason::NoRoleGrant);

    let read = dispatcher
        .dispatch("Task", Some(&viewer), Operation::Get(created.id))
        .await
        .expect("viewer reads");
    assert_eq!(record(read).id, created.id);
}

#[tokio::test]
async fn forbidden_message_names_operation_and_model() {
    let dispatcher = setup().await;
    let viewer = Identity::new("v1", ["Viewer"]);
    let err = dispatcher
        .dispatch("Task", Some(&viewer), Operation::Delete(1))
        .await
        .expect_err("denied");
    let message = err.to_string();
    assert!(message.contains("delete"), "{message}");
    assert!(message.contains("Task"), "{message}");
}

#[tokio::test]
async fn unknown_model_is_not_found_before_authorization() {
    let dispatcher = setup().await;
    let err = dispatcher
        .dispatch("Ghost", None, Operation::List(Page::default()))
        .await
        .expect_err("no such model");
    assert!(matches!(err, GateError::NotFound(NotFound::Model(_))));
}

#[tokio::test]
async fn concurrent_delete_between_check_and_update_is_not_found() {
    let dispatcher = setup().await;
    let created = create_as_u1(&dispatcher).await;
    let u1 = Identity::new("u1", ["Owner"]);

    // Ownership is checked against the live row; once the row disappears
    // the update matches nothing.
    let shape = dispatcher.registry().resolve("Task").expect("resolve").shape.clone();
    let owner = dispatcher
        .records()
        .lookup_owner(&shape, created.id)
        .await
        .expect("ownership check");
    assert_eq!(owner.as_deref(), Some("u1"));

    assert!(dispatcher.records().delete(&shape, created.id).await.expect("delete"));

    let err = dispatcher
        .records()
        .update(&shape, created.id, payload(json!({ "title": "late" })))
        .await
        .expect_err("row is gone");
    assert!(matches!(err, GateError::NotFound(NotFound::Record { .. })));

    // Through the dispatcher the same race surfaces as a failed ownership check.
    let result = dispatcher
        .dispatch(
            "Task",
            Some(&u1),
            Operation::Update(created.id, payload(json!({ "title": "late" }))),
        )
        .await;
    assert_forbidden(result, ForbiddenReason::NotOwner);
}
