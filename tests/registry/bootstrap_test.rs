//! Tests for loading published models back from the catalog at startup.

use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use modelgate::model::catalog::ModelCatalog;
use modelgate::model::{FieldDefinition, FieldKind, ModelDefinition, PermissionToken};
use modelgate::records::{payload_from_json, RecordStore};
use modelgate::registry::{BootstrapReport, ModelRegistry};

async fn memory_pool() -> SqlitePool {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect")
}

fn note() -> ModelDefinition {
    ModelDefinition::new("Note")
        .field(FieldDefinition::new("body", FieldKind::LongText).required())
        .field(FieldDefinition::new("pinned", FieldKind::Boolean).with_default(json!(false)))
        .grant("Admin", &[PermissionToken::All])
}

#[tokio::test]
async fn bootstrap_without_catalog_is_empty() {
    let registry = ModelRegistry::new(memory_pool().await);
    let report = registry.bootstrap().await.expect("bootstrap");
    assert_eq!(report, BootstrapReport::default());
}

#[tokio::test]
async fn bootstrap_restores_published_models() {
    let tmp = tempfile::tempdir().expect("tempdir");

    let first = ModelRegistry::new(memory_pool().await)
        .with_catalog(ModelCatalog::open(tmp.path()).expect("open catalog"));
    first.register(note()).await.expect("register");

    // Fresh database: bootstrap must materialize the table again.
    let pool = memory_pool().await;
    let second = ModelRegistry::new(pool.clone())
        .with_catalog(ModelCatalog::open(tmp.path()).expect("reopen catalog"));
    let report = second.bootstrap().await.expect("bootstrap");
    assert_eq!(report.loaded, vec!["Note".to_owned()]);
    assert_eq!(report.failed, 0);

    let restored = second.resolve("Note").expect("resolve");
    assert_eq!(restored.definition, note());

    let record = RecordStore::new(pool)
        .create(&restored.shape, payload_from_json(json!({ "body": "hello" })).expect("payload"))
        .await
        .expect("create after bootstrap");
    assert_eq!(record.id, 1);
}

#[tokio::test]
async fn bootstrap_skips_broken_entries() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let catalog = ModelCatalog::open(tmp.path()).expect("open catalog");
    catalog.save(&note()).expect("save good model");

    std::fs::write(tmp.path().join("Broken.json"), "{ not json").expect("write broken");
    std::fs::write(
        tmp.path().join("Fieldless.json"),
        r#"{ "name": "Fieldless", "fields": [] }"#,
    )
    .expect("write invalid");
    std::fs::write(tmp.path().join("README.txt"), "ignored").expect("write non-json");

    let registry = ModelRegistry::new(memory_pool().await).with_catalog(catalog);
    let report = registry.bootstrap().await.expect("bootstrap");

    assert_eq!(report.loaded, vec!["Note".to_owned()]);
    assert_eq!(report.failed, 2);
    assert!(registry.resolve("Fieldless").is_err());
}

#[tokio::test]
async fn bootstrap_does_not_rewrite_catalog_files() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("Note.json");
    let compact = serde_json::to_string(&note()).expect("serialize");
    std::fs::write(&path, &compact).expect("write compact");

    let registry = ModelRegistry::new(memory_pool().await)
        .with_catalog(ModelCatalog::open(tmp.path()).expect("open catalog"));
    registry.bootstrap().await.expect("bootstrap");

    let on_disk = std::fs::read_to_string(&path).expect("read back");
    assert_eq!(on_disk, compact);
}
