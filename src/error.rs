//! Error taxonomy shared by the registry, record operations, authorization
//! engine and dispatch boundary.
//!
//! Every entry point returns a [`GateError`] instead of panicking across the
//! boundary. Storage failures are logged where they happen and surface only
//! as the opaque [`GateError::Internal`].

use std::fmt;

use tracing::error;

use crate::authz::Permission;

/// What could not be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    /// No model is registered under this name or table.
    Model(String),
    /// No record with this id exists in the model's table.
    Record {
        /// Model name.
        model: String,
        /// Requested record id.
        id: i64,
    },
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(name) => write!(f, "model '{name}' not found"),
            Self::Record { model, id } => write!(f, "{model} record {id} not found"),
        }
    }
}

/// Why a request was forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// None of the caller's roles grants the permission.
    NoRoleGrant,
    /// Owner role applies but the caller does not own the target record.
    NotOwner,
    /// Owner role applies but no target record id was supplied.
    MissingIdentifier,
}

impl ForbiddenReason {
    /// Short human-readable explanation used in denial messages.
    pub fn describe(self) -> &'static str {
        match self {
            Self::NoRoleGrant => "no role grants this permission",
            Self::NotOwner => "caller does not own the record",
            Self::MissingIdentifier => "owner role requires a record id",
        }
    }
}

/// Errors returned by every core entry point.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Malformed or incomplete payload or model definition.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing model or record.
    #[error("{0}")]
    NotFound(NotFound),

    /// No identity, or an identity without roles.
    #[error("authentication required")]
    Unauthenticated,

    /// Identity is known but not permitted.
    #[error("forbidden: cannot {operation} {model}: {}", reason.describe())]
    Forbidden {
        /// Sub-reason for the denial.
        reason: ForbiddenReason,
        /// Attempted operation.
        operation: Permission,
        /// Model the operation targeted.
        model: String,
    },

    /// Storage failure; details are logged, never returned.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl GateError {
    /// Log a storage error and collapse it into an opaque [`GateError::Internal`].
    ///
    /// Constraint violations are caller mistakes, not storage faults, and
    /// become [`GateError::Validation`] naming only the model.
    pub(crate) fn from_storage(err: sqlx::Error, model: &str, context: &'static str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return Self::Validation(format!("{model}: unique constraint violated"));
                }
                sqlx::error::ErrorKind::NotNullViolation => {
                    return Self::Validation(format!("{model}: required field missing"));
                }
                sqlx::error::ErrorKind::CheckViolation => {
                    return Self::Validation(format!("{model}: check constraint violated"));
                }
                _ => {}
            }
        }
        error!(model, context, error = %err, "storage operation failed");
        Self::Internal(context)
    }

    /// Whether this error is a permission denial (as opposed to a fault).
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Forbidden { .. })
    }
}
