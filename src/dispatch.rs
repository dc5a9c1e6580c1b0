//! Dispatch boundary: resolve the model, authorize, then execute.
//!
//! No record operation runs unless [`authorize`] allowed it. On create the
//! owner column, if the model has one, is stamped with the caller's id.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::authz::{authorize, AccessRequest, Permission};
use crate::error::GateError;
use crate::model::Identity;
use crate::records::{FieldValue, Page, Payload, Record, RecordStore};
use crate::registry::{ModelRegistry, RegisteredModel};

/// A record operation with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert a record.
    Create(Payload),
    /// Newest records first.
    List(Page),
    /// One record by id.
    Get(i64),
    /// Overwrite fields of one record.
    Update(i64, Payload),
    /// Remove one record.
    Delete(i64),
}

impl Operation {
    /// Permission this operation requires.
    pub fn permission(&self) -> Permission {
        match self {
            Self::Create(_) => Permission::Create,
            Self::List(_) | Self::Get(_) => Permission::Read,
            Self::Update(..) => Permission::Update,
            Self::Delete(_) => Permission::Delete,
        }
    }

    /// Record the operation acts on, if any.
    pub fn target(&self) -> Option<i64> {
        match self {
            Self::Get(id) | Self::Update(id, _) | Self::Delete(id) => Some(*id),
            Self::Create(_) | Self::List(_) => None,
        }
    }
}

/// Result of a successful operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    /// Created, fetched or updated record.
    Record(Record),
    /// A page of records.
    Records(Vec<Record>),
    /// Delete result.
    Deleted {
        /// Whether a row was removed.
        deleted: bool,
    },
}

/// Composes the registry, the authorization engine and the record store.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    records: RecordStore,
}

impl Dispatcher {
    /// Build a dispatcher over a registry and record store.
    pub fn new(registry: Arc<ModelRegistry>, records: RecordStore) -> Self {
        Self { registry, records }
    }

    /// Registry handle.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Record store handle.
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Run `operation` on the model named `model`.
    ///
    /// # Errors
    ///
    /// [`GateError::NotFound`] for an unknown model, any authorization
    /// error, or the record operation's error.
    pub async fn dispatch(
        &self,
        model: &str,
        identity: Option<&Identity>,
        operation: Operation,
    ) -> Result<Outcome, GateError> {
        let registered = self.registry.resolve(model)?;
        self.run(registered, identity, operation).await
    }

    /// Run `operation` on the model stored in `table`.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::dispatch`].
    pub async fn dispatch_table(
        &self,
        table: &str,
        identity: Option<&Identity>,
        operation: Operation,
    ) -> Result<Outcome, GateError> {
        let registered = self.registry.resolve_table(table)?;
        self.run(registered, identity, operation).await
    }

    async fn run(
        &self,
        registered: Arc<RegisteredModel>,
        identity: Option<&Identity>,
        operation: Operation,
    ) -> Result<Outcome, GateError> {
        let permission = operation.permission();
        let span = info_span!(
            "dispatch",
            request_id = %Uuid::new_v4(),
            model = %registered.name(),
            operation = %permission,
        );

        async move {
            let request = AccessRequest {
                identity,
                model: &registered.definition,
                permission,
                target: operation.target(),
            };
            let grant = match authorize(request, &self.records).await {
                Ok(grant) => grant,
                Err(err) => {
                    if err.is_denial() {
                        info!(caller = ?identity.map(|i| &i.id), error = %err, "request denied");
                    }
                    return Err(err);
                }
            };
            debug!(?grant, "request authorized");
            self.execute(&registered, identity, operation).await
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        registered: &RegisteredModel,
        identity: Option<&Identity>,
        operation: Operation,
    ) -> Result<Outcome, GateError> {
        let shape = &registered.shape;
        match operation {
            Operation::Create(mut payload) => {
                if let (Some(owner), Some(identity)) = (&shape.owner_column, identity) {
                    payload.insert(owner.clone(), FieldValue::Text(identity.id.clone()));
                }
                self.records.create(shape, payload).await.map(Outcome::Record)
            }
            Operation::List(page) => self.records.list(shape, page).await.map(Outcome::Records),
            Operation::Get(id) => self.records.get(shape, id).await.map(Outcome::Record),
            Operation::Update(id, payload) => self
                .records
                .update(shape, id, payload)
                .await
                .map(Outcome::Record),
            Operation::Delete(id) => self
                .records
                .delete(shape, id)
                .await
                .map(|deleted| Outcome::Deleted { deleted }),
        }
    }
}
