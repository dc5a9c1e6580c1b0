//! Authorization engine: role and ownership based access decisions.
//!
//! [`authorize`] is evaluated once per request, before any record operation
//! runs. Rules are checked in a fixed order and the first match wins:
//!
//! 1. no identity or no roles → [`GateError::Unauthenticated`]
//! 2. `Admin` with a matching grant → allow
//! 3. any other role (not `Admin`, not `Owner`) with a matching grant → allow
//! 4. `Owner` on a model with an owner column and a matching grant:
//!    create and read → allow; update and delete → allow only if the target
//!    record's owner equals the caller id
//! 5. otherwise → [`ForbiddenReason::NoRoleGrant`]
//!
//! The ownership lookup in rule 4 is the only storage access the engine
//! makes, and it touches exactly the one row the operation will act on.
//! Owner read access is not row-filtered: an `Owner` with `read` sees every
//! record of the model.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ForbiddenReason, GateError};
use crate::model::{Identity, ModelDefinition, ADMIN_ROLE, OWNER_ROLE};
use crate::records::RecordStore;
use crate::schema::StorageShape;

/// Permission requested by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Create a record.
    Create,
    /// List or get records.
    Read,
    /// Update a record.
    Update,
    /// Delete a record.
    Delete,
}

impl Permission {
    /// Every permission.
    pub const ALL: [Self; 4] = [Self::Create, Self::Read, Self::Update, Self::Delete];

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether the Owner rule needs a record id and ownership check.
    pub fn targets_record(self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule granted access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// Rule 2.
    Admin,
    /// Rule 3, naming the granting role.
    Role(String),
    /// Rule 4.
    Owner,
}

/// Resolves the owner of a single record.
#[async_trait]
pub trait OwnerLookup: Send + Sync {
    /// Owner column value of record `id`, string-normalized; `None` if the
    /// record does not exist or has no owner.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Internal`] on storage failure.
    async fn owner_of(&self, model: &ModelDefinition, id: i64) -> Result<Option<String>, GateError>;
}

#[async_trait]
impl OwnerLookup for RecordStore {
    async fn owner_of(&self, model: &ModelDefinition, id: i64) -> Result<Option<String>, GateError> {
        let shape = StorageShape::from_model(model);
        self.lookup_owner(&shape, id).await
    }
}

/// One authorization question.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// Caller, if any.
    pub identity: Option<&'a Identity>,
    /// Target model.
    pub model: &'a ModelDefinition,
    /// Requested permission.
    pub permission: Permission,
    /// Target record for update/delete.
    pub target: Option<i64>,
}

/// Decide whether `request` is allowed.
///
/// # Errors
///
/// [`GateError::Unauthenticated`], [`GateError::Forbidden`] with the matching
/// sub-reason, or [`GateError::Internal`] if the ownership lookup fails.
pub async fn authorize(request: AccessRequest<'_>, owners: &dyn OwnerLookup) -> Result<Grant, GateError> {
    let AccessRequest {
        identity,
        model,
        permission,
        target,
    } = request;

    let identity = match identity {
        Some(identity) if identity.is_authenticated() => identity,
        _ => return Err(GateError::Unauthenticated),
    };

    if identity.has_role(ADMIN_ROLE) && model.role_grants(ADMIN_ROLE, permission) {
        return Ok(Grant::Admin);
    }

    if let Some(role) = identity
        .roles
        .iter()
        .filter(|r| r.as_str() != ADMIN_ROLE && r.as_str() != OWNER_ROLE)
        .find(|r| model.role_grants(r, permission))
    {
        return Ok(Grant::Role(role.clone()));
    }

    if identity.has_role(OWNER_ROLE)
        && model.owner_field.is_some()
        && model.role_grants(OWNER_ROLE, permission)
    {
        if !permission.targets_record() {
            return Ok(Grant::Owner);
        }
        let forbidden = |reason| GateError::Forbidden {
            reason,
            operation: permission,
            model: model.name.clone(),
        };
        let id = target.ok_or_else(|| forbidden(ForbiddenReason::MissingIdentifier))?;
        let owner = owners.owner_of(model, id).await?;
        return match owner {
            Some(owner) if owner == identity.id => Ok(Grant::Owner),
            _ => Err(forbidden(ForbiddenReason::NotOwner)),
        };
    }

    Err(GateError::Forbidden {
        reason: ForbiddenReason::NoRoleGrant,
        operation: permission,
        model: model.name.clone(),
    })
}
