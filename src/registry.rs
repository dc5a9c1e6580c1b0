//! Model registry: the single mutation point for published models.
//!
//! Registration validates a definition, materializes its table, optionally
//! persists it to the [`ModelCatalog`], and only then makes it resolvable.
//! A failure at any step leaves the registry exactly as it was. Publishes
//! are serialized behind one async mutex; lookups only take the read side of
//! the map lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{GateError, NotFound};
use crate::model::catalog::ModelCatalog;
use crate::model::ModelDefinition;
use crate::schema::StorageShape;

/// A model that passed registration, with its derived storage shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredModel {
    /// Published definition.
    pub definition: ModelDefinition,
    /// Table shape derived from the definition.
    pub shape: StorageShape,
}

impl RegisteredModel {
    /// Model name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.shape.table
    }
}

/// Outcome of loading the catalog at startup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Models registered.
    pub loaded: Vec<String>,
    /// Catalog entries that could not be parsed or registered.
    pub failed: usize,
}

/// Registry of published models.
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<RegisteredModel>>>,
    publish_lock: Mutex<()>,
    db: SqlitePool,
    catalog: Option<ModelCatalog>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = match self.models.read() {
            Ok(models) => models.len(),
            Err(_) => 0,
        };
        f.debug_struct("ModelRegistry")
            .field("model_count", &count)
            .field("catalog", &self.catalog.as_ref().map(ModelCatalog::dir))
            .finish_non_exhaustive()
    }
}

impl ModelRegistry {
    /// Registry materializing tables into `db`, without a catalog.
    pub fn new(db: SqlitePool) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            publish_lock: Mutex::new(()),
            db,
            catalog: None,
        }
    }

    /// Persist every successful registration to `catalog`.
    #[must_use]
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Attached catalog, if any.
    pub fn catalog(&self) -> Option<&ModelCatalog> {
        self.catalog.as_ref()
    }

    /// Validate, materialize, persist and publish a definition.
    ///
    /// Replaces any model with the same name.
    ///
    /// # Errors
    ///
    /// [`GateError::Validation`] for structural problems or a table name
    /// already owned by another model; [`GateError::Internal`] if the table
    /// or catalog file cannot be written. The registry is unchanged on error.
    pub async fn register(&self, model: ModelDefinition) -> Result<Arc<RegisteredModel>, GateError> {
        self.publish(model, true).await
    }

    async fn publish(&self, model: ModelDefinition, persist: bool) -> Result<Arc<RegisteredModel>, GateError> {
        model.validate()?;
        let shape = StorageShape::from_model(&model);

        let _guard = self.publish_lock.lock().await;

        {
            let models = self.read_models()?;
            if let Some(other) = models
                .values()
                .find(|m| m.table().eq_ignore_ascii_case(&shape.table) && m.name() != model.name)
            {
                return Err(GateError::Validation(format!(
                    "table '{}' is already used by model '{}'",
                    shape.table,
                    other.name()
                )));
            }
        }

        if let Err(err) = shape.materialize(&self.db).await {
            error!(model = %model.name, error = %err, "materialization failed");
            return Err(GateError::Internal("table materialization failed"));
        }

        if persist {
            if let Some(catalog) = &self.catalog {
                if let Err(err) = catalog.save(&model) {
                    error!(model = %model.name, error = %err, "catalog write failed");
                    return Err(GateError::Internal("model catalog write failed"));
                }
            }
        }

        let registered = Arc::new(RegisteredModel {
            definition: model,
            shape,
        });
        let replaced = self
            .models
            .write()
            .map_err(|_| GateError::Internal("registry lock poisoned"))?
            .insert(registered.name().to_owned(), Arc::clone(&registered))
            .is_some();
        info!(
            model = %registered.name(),
            table = %registered.table(),
            replaced,
            "model registered"
        );
        Ok(registered)
    }

    /// Register every definition found in the attached catalog.
    ///
    /// A model that fails to parse or register is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Internal`] only if the catalog directory cannot
    /// be listed.
    pub async fn bootstrap(&self) -> Result<BootstrapReport, GateError> {
        let mut report = BootstrapReport::default();
        let Some(catalog) = &self.catalog else {
            return Ok(report);
        };
        let entries = catalog.load_all().map_err(|err| {
            error!(error = %err, "failed to list model catalog");
            GateError::Internal("model catalog unreadable")
        })?;
        info!(count = entries.len(), "loading catalog models");

        for entry in entries {
            let model = match entry {
                Ok(model) => model,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable model file");
                    report.failed = report.failed.saturating_add(1);
                    continue;
                }
            };
            let name = model.name.clone();
            match self.publish(model, false).await {
                Ok(_) => report.loaded.push(name),
                Err(err) => {
                    warn!(model = %name, error = %err, "skipping model that failed to register");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }
        Ok(report)
    }

    /// Look up a model by name.
    ///
    /// # Errors
    ///
    /// [`GateError::NotFound`] if no model has this name.
    pub fn resolve(&self, name: &str) -> Result<Arc<RegisteredModel>, GateError> {
        self.read_models()?
            .get(name)
            .cloned()
            .ok_or_else(|| GateError::NotFound(NotFound::Model(name.to_owned())))
    }

    /// Look up a model by its table name.
    ///
    /// # Errors
    ///
    /// [`GateError::NotFound`] if no model maps to this table.
    pub fn resolve_table(&self, table: &str) -> Result<Arc<RegisteredModel>, GateError> {
        self.read_models()?
            .values()
            .find(|m| m.table().eq_ignore_ascii_case(table))
            .cloned()
            .ok_or_else(|| GateError::NotFound(NotFound::Model(table.to_owned())))
    }

    /// Every registered model, sorted by name.
    ///
    /// # Errors
    ///
    /// [`GateError::Internal`] if the registry lock is poisoned.
    pub fn list_all(&self) -> Result<Vec<Arc<RegisteredModel>>, GateError> {
        let mut all: Vec<_> = self.read_models()?.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(all)
    }

    fn read_models(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<RegisteredModel>>>, GateError> {
        self.models
            .read()
            .map_err(|_| GateError::Internal("registry lock poisoned"))
    }
}
