//! Declarative model definitions and their structural validation.
//!
//! A [`ModelDefinition`] is what an operator publishes: a name, ordered typed
//! fields, an optional owner column and a role → permission-token map. The
//! JSON wire format matches the catalog files on disk (`tableName`,
//! `ownerField`, `rbac`, field `type`), and the longer names
//! (`storageName`, `ownerFieldName`, `rolePermissions`, `kind`) are accepted
//! as aliases when reading.

pub mod catalog;

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::authz::Permission;
use crate::error::GateError;

/// Implicit primary key column present in every table.
pub const ID_COLUMN: &str = "id";
/// Implicit creation timestamp column.
pub const CREATED_AT_COLUMN: &str = "createdAt";
/// Implicit modification timestamp column, refreshed on every update.
pub const UPDATED_AT_COLUMN: &str = "updatedAt";

/// Column names no declared field may take.
pub const RESERVED_COLUMNS: &[&str] = &[ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];

/// Role whose grants short-circuit every other check.
pub const ADMIN_ROLE: &str = "Admin";
/// Role whose update/delete grants depend on record ownership.
pub const OWNER_ROLE: &str = "Owner";

/// Identifier charset accepted for model, table and field names.
///
/// `None` only if the pattern fails to compile, in which case every name is
/// rejected.
fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$") {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!(error = %e, "identifier pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Check that `name` is a safe storage identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_some_and(|re| re.is_match(name))
}

/// Whether `name` collides with an implicit column. SQLite identifiers are
/// case-insensitive.
fn is_reserved(name: &str) -> bool {
    RESERVED_COLUMNS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

// ---------------------------------------------------------------------------
// Field definitions
// ---------------------------------------------------------------------------

/// Kind of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Bounded string.
    #[serde(rename = "string")]
    ShortText,
    /// Floating-point number.
    #[serde(rename = "number")]
    Number,
    /// Boolean, stored as an integer.
    #[serde(rename = "boolean")]
    Boolean,
    /// Unbounded string.
    #[serde(rename = "text")]
    LongText,
    /// ISO date string.
    #[serde(rename = "date")]
    Date,
    /// Foreign identifier of another record; not enforced.
    #[serde(rename = "relation")]
    Relation,
}

impl FieldKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShortText => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::LongText => "text",
            Self::Date => "date",
            Self::Relation => "relation",
        }
    }

    /// Whether values of this kind are stored as quoted strings.
    pub fn is_string_like(self) -> bool {
        matches!(
            self,
            Self::ShortText | Self::LongText | Self::Date | Self::Relation
        )
    }
}

/// Target of a relation field. Descriptive only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTarget {
    /// Related model name.
    pub model: String,
    /// Related field name.
    pub field: String,
}

/// One declared field of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Column name.
    pub name: String,
    /// Value kind.
    #[serde(rename = "type", alias = "kind")]
    pub kind: FieldKind,
    /// Column is `NOT NULL`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Column carries a uniqueness constraint.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    /// Stored default literal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Relation target for relation fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationTarget>,
}

impl FieldDefinition {
    /// A plain optional field of the given kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            unique: false,
            default: None,
            relation: None,
        }
    }

    /// Mark the field `NOT NULL`.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the field unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Attach a default literal.
    #[must_use]
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Whether a create payload may omit this field.
    pub fn may_be_omitted(&self) -> bool {
        !self.required || self.default.is_some()
    }

    fn validate_default(&self) -> Result<(), String> {
        let Some(value) = &self.default else {
            return Ok(());
        };
        let ok = match (self.kind, value) {
            (_, serde_json::Value::Null) => !self.required,
            (FieldKind::Number, serde_json::Value::Number(_)) => true,
            (FieldKind::Boolean, serde_json::Value::Bool(_)) => true,
            (FieldKind::Date, serde_json::Value::String(s)) => is_iso_date(s),
            (FieldKind::ShortText | FieldKind::LongText | FieldKind::Relation, serde_json::Value::String(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "default for field '{}' does not match kind {}",
                self.name,
                self.kind.as_str()
            ))
        }
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 / naive ISO datetime.
fn is_iso_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

// ---------------------------------------------------------------------------
// Permission tokens
// ---------------------------------------------------------------------------

/// Token granted to a role in a model's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionToken {
    /// Every permission.
    All,
    /// Create records.
    Create,
    /// List and get records.
    Read,
    /// Update records.
    Update,
    /// Delete records.
    Delete,
}

impl PermissionToken {
    /// Whether holding this token grants `permission`.
    pub fn grants(self, permission: Permission) -> bool {
        matches!(
            (self, permission),
            (Self::All, _)
                | (Self::Create, Permission::Create)
                | (Self::Read, Permission::Read)
                | (Self::Update, Permission::Update)
                | (Self::Delete, Permission::Delete)
        )
    }
}

// ---------------------------------------------------------------------------
// Model definition
// ---------------------------------------------------------------------------

/// A published record model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Unique model name.
    pub name: String,
    /// Table name override.
    #[serde(
        rename = "tableName",
        alias = "storageName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub table_name: Option<String>,
    /// Declared fields in column order.
    pub fields: Vec<FieldDefinition>,
    /// Column holding the creator's identity.
    #[serde(
        rename = "ownerField",
        alias = "ownerFieldName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_field: Option<String>,
    /// Role name → granted tokens.
    #[serde(rename = "rbac", alias = "rolePermissions", default)]
    pub rbac: BTreeMap<String, Vec<PermissionToken>>,
}

impl ModelDefinition {
    /// Start a definition with no fields, owner or policy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            fields: Vec::new(),
            owner_field: None,
            rbac: BTreeMap::new(),
        }
    }

    /// Append a field.
    #[must_use]
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Set the owner column.
    #[must_use]
    pub fn owned_by(mut self, column: impl Into<String>) -> Self {
        self.owner_field = Some(column.into());
        self
    }

    /// Grant tokens to a role, replacing any previous grant.
    #[must_use]
    pub fn grant(mut self, role: impl Into<String>, tokens: &[PermissionToken]) -> Self {
        self.rbac.insert(role.into(), tokens.to_vec());
        self
    }

    /// Storage table name: the override if non-blank, else `lowercase(name) + "s"`.
    pub fn storage_name(&self) -> String {
        match self.table_name.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_owned(),
            _ => format!("{}s", self.name.to_lowercase()),
        }
    }

    /// Look up a declared field.
    pub fn field_named(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `role` holds a token granting `permission`. Absent roles hold nothing.
    pub fn role_grants(&self, role: &str, permission: Permission) -> bool {
        self.rbac
            .get(role)
            .is_some_and(|tokens| tokens.iter().any(|t| t.grants(permission)))
    }

    /// Structural validation run before a definition is registered.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Validation`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), GateError> {
        let invalid = |msg: String| Err(GateError::Validation(msg));

        if self.name.trim().is_empty() {
            return invalid("model name is required".to_owned());
        }
        if !is_valid_identifier(&self.name) {
            return invalid(format!("model name '{}' is not a valid identifier", self.name));
        }
        let table = self.storage_name();
        if !is_valid_identifier(&table) {
            return invalid(format!("table name '{table}' is not a valid identifier"));
        }
        if self.fields.is_empty() {
            return invalid(format!("model '{}' must declare at least one field", self.name));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return invalid(format!("model '{}' has a field without a name", self.name));
            }
            if !is_valid_identifier(&field.name) {
                return invalid(format!("field name '{}' is not a valid identifier", field.name));
            }
            if is_reserved(&field.name) {
                return invalid(format!("field name '{}' is reserved", field.name));
            }
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return invalid(format!("duplicate field name '{}'", field.name));
            }
            field.validate_default().or_else(invalid)?;
        }

        if let Some(owner) = &self.owner_field {
            if !is_valid_identifier(owner) {
                return invalid(format!("owner field '{owner}' is not a valid identifier"));
            }
            if is_reserved(owner) {
                return invalid(format!("owner field '{owner}' is reserved"));
            }
            let declared = self
                .fields
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(owner));
            if let Some(field) = declared {
                if field.name != *owner {
                    return invalid(format!(
                        "owner field '{owner}' differs only in case from field '{}'",
                        field.name
                    ));
                }
                if !matches!(
                    field.kind,
                    FieldKind::ShortText | FieldKind::LongText | FieldKind::Relation
                ) {
                    return invalid(format!(
                        "owner field '{owner}' must be a string, text or relation field, not {}",
                        field.kind.as_str()
                    ));
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Caller identity supplied by the external trust boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque caller id.
    pub id: String,
    /// Roles held, in the order supplied.
    pub roles: Vec<String>,
}

impl Identity {
    /// Build an identity from an id and role names.
    pub fn new<I, S>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the identity holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// An identity without roles counts as unauthenticated.
    pub fn is_authenticated(&self) -> bool {
        !self.roles.is_empty()
    }
}
