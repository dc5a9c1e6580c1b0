//! Generic record operations over a model's storage shape.
//!
//! Payloads and rows are maps of tagged [`FieldValue`]s. Only columns present
//! in the [`StorageShape`](crate::schema::StorageShape) are ever written;
//! unknown payload keys are dropped without error.

pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::model::FieldKind;

pub use self::store::RecordStore;

/// Default number of records returned by `list`.
pub const DEFAULT_PAGE_SIZE: u32 = 100;
/// Upper bound on a single `list` page.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// String value.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value, stored as `1`/`0`.
    Boolean(bool),
    /// ISO date string read from a date column.
    Date(String),
    /// Absent / SQL `NULL`.
    Null,
}

impl FieldValue {
    /// Tag a JSON scalar. Arrays and objects are not field values.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Validation`] for arrays, objects and numbers that
    /// do not fit an `f64`.
    pub fn from_json(key: &str, value: serde_json::Value) -> Result<Self, GateError> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Boolean(b)),
            serde_json::Value::String(s) => Ok(Self::Text(s)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Self::Number)
                .ok_or_else(|| GateError::Validation(format!("field '{key}': number out of range"))),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(GateError::Validation(
                format!("field '{key}': expected a scalar value"),
            )),
        }
    }

    /// Re-tag a string as a date when it targets a date column.
    pub fn for_kind(self, kind: FieldKind) -> Self {
        match (self, kind) {
            (Self::Text(s), FieldKind::Date) => Self::Date(s),
            (other, _) => other,
        }
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) | Self::Date(s) => serializer.serialize_str(s),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json("value", value).map_err(serde::de::Error::custom)
    }
}

/// Caller-supplied field map for create and update.
pub type Payload = BTreeMap<String, FieldValue>;

/// Convert a JSON object into a [`Payload`].
///
/// # Errors
///
/// Returns [`GateError::Validation`] if the body is not an object or holds a
/// non-scalar value.
pub fn payload_from_json(body: serde_json::Value) -> Result<Payload, GateError> {
    match body {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| FieldValue::from_json(&k, v).map(|fv| (k, fv)))
            .collect(),
        serde_json::Value::Null => Ok(Payload::new()),
        _ => Err(GateError::Validation("payload must be a JSON object".to_owned())),
    }
}

/// One stored row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Auto-assigned id.
    pub id: i64,
    /// Creation timestamp.
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Last modification timestamp.
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
    /// Declared columns and the owner column.
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Value of a column, if present in the shape.
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }
}

/// Bounds for `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    /// Maximum rows to return; clamped to [`MAX_PAGE_SIZE`].
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Rows to skip from the newest.
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Page {
    /// First page of the given size.
    pub fn first(limit: u32) -> Self {
        Self { limit, offset: 0 }
    }

    /// Limit clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}
