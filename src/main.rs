//! modelgate CLI entry point.
//!
//! Provides `serve`, `publish`, `models`, and `shape` subcommands for running
//! the HTTP server, publishing a model definition file, listing the catalog,
//! or previewing a table without touching storage.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use modelgate::config::{GateConfig, StorageConfig};
use modelgate::dispatch::Dispatcher;
use modelgate::model::catalog::ModelCatalog;
use modelgate::model::ModelDefinition;
use modelgate::records::RecordStore;
use modelgate::registry::ModelRegistry;
use modelgate::schema::StorageShape;
use modelgate::server::{self, AppState};

/// modelgate: runtime-declared record models with access control.
#[derive(Parser)]
#[command(name = "modelgate", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Load the catalog and serve the HTTP API.
    Serve,
    /// Register a model definition file into the database and catalog.
    Publish {
        /// Path to a model definition JSON file.
        file: PathBuf,
    },
    /// List catalog models with their table names.
    Models,
    /// Print the CREATE TABLE statement for a definition file.
    Shape {
        /// Path to a model definition JSON file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(anyhow::anyhow!("failed to load .env: {e}"));
        }
    }
    let config = GateConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Serve => handle_serve(config).await,
        Command::Publish { file } => handle_publish(config, &file).await,
        Command::Models => handle_models(&config),
        Command::Shape { file } => handle_shape(&config, &file),
    }
}

/// Run the HTTP server until ctrl-c.
async fn handle_serve(config: GateConfig) -> anyhow::Result<()> {
    let _logging_guard = modelgate::logging::init_server(&config.logging)?;

    let pool = open_pool(&config.storage).await?;
    let registry = Arc::new(open_registry(&config.storage, pool.clone())?);
    let report = registry
        .bootstrap()
        .await
        .context("failed to load model catalog")?;
    info!(
        loaded = report.loaded.len(),
        failed = report.failed,
        "catalog loaded"
    );

    let state = AppState {
        dispatcher: Dispatcher::new(registry, RecordStore::new(pool.clone())),
        list_limit: config.storage.list_limit,
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(server::serve(listener, state, async move {
        if stop_rx.await.is_err() {
            debug!("shutdown sender dropped");
        }
    }));

    tokio::select! {
        result = &mut server => {
            result.context("server task panicked")?.context("server failed")?;
            pool.close().await;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
        }
    }

    if stop_tx.send(()).is_err() {
        debug!("server already stopped before shutdown signal");
    }
    let timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    match tokio::time::timeout(timeout, server).await {
        Ok(result) => result.context("server task panicked")?.context("server failed")?,
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout_seconds,
            "graceful shutdown timed out"
        ),
    }

    pool.close().await;
    info!("modelgate stopped");
    Ok(())
}

/// Publish one definition file.
async fn handle_publish(config: GateConfig, file: &Path) -> anyhow::Result<()> {
    modelgate::logging::init_cli(&config.logging.level);

    let model = read_definition(file)?;
    let pool = open_pool(&config.storage).await?;
    let registry = open_registry(&config.storage, pool.clone())?;
    let registered = registry
        .register(model)
        .await
        .with_context(|| format!("failed to publish {}", file.display()))?;
    println!("published {} at /api/{}", registered.name(), registered.table());

    pool.close().await;
    Ok(())
}

/// Print every catalog model and its table.
fn handle_models(config: &GateConfig) -> anyhow::Result<()> {
    modelgate::logging::init_cli(&config.logging.level);

    let catalog = ModelCatalog::open(&config.storage.models_dir)
        .with_context(|| format!("failed to open catalog {}", config.storage.models_dir))?;
    for entry in catalog.load_all().context("failed to list catalog")? {
        match entry {
            Ok(model) => println!("{}\t{}", model.name, model.storage_name()),
            Err(e) => warn!(error = %e, "skipping unreadable model file"),
        }
    }
    Ok(())
}

/// Validate a definition and print its table DDL.
fn handle_shape(config: &GateConfig, file: &Path) -> anyhow::Result<()> {
    modelgate::logging::init_cli(&config.logging.level);

    let model = read_definition(file)?;
    model
        .validate()
        .with_context(|| format!("invalid model in {}", file.display()))?;
    println!("{};", StorageShape::from_model(&model).create_table_sql());
    Ok(())
}

fn read_definition(file: &Path) -> anyhow::Result<ModelDefinition> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", file.display()))
}

fn open_registry(storage: &StorageConfig, pool: SqlitePool) -> anyhow::Result<ModelRegistry> {
    let catalog = ModelCatalog::open(&storage.models_dir)
        .with_context(|| format!("failed to open catalog {}", storage.models_dir))?;
    Ok(ModelRegistry::new(pool).with_catalog(catalog))
}

async fn open_pool(storage: &StorageConfig) -> anyhow::Result<SqlitePool> {
    let path = Path::new(&storage.database);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .pragma("trusted_schema", "OFF");

    SqlitePoolOptions::new()
        .max_connections(storage.max_connections)
        .acquire_timeout(Duration::from_secs(storage.acquire_timeout_seconds))
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))
}
