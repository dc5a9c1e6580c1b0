//! Schema mapper: model definition → storage table shape.
//!
//! [`StorageShape::from_model`] is a pure, deterministic mapping. The shape
//! renders its own `CREATE TABLE IF NOT EXISTS` statement, so materializing
//! the same definition twice is a no-op and two processes loading the same
//! definitions converge on the same table without coordination.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::model::{
    FieldDefinition, FieldKind, ModelDefinition, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN,
};

/// SQL expression for the current UTC time with millisecond precision.
pub const NOW_SQL: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Errors from materializing a shape.
#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    /// The `CREATE TABLE` statement failed.
    #[error("failed to materialize table {table}: {source}")]
    Materialize {
        /// Table being created.
        table: String,
        /// Underlying database error.
        source: sqlx::Error,
    },
}

/// SQLite column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `VARCHAR(255)`.
    BoundedText,
    /// `REAL`.
    Real,
    /// `INTEGER`, used for booleans.
    Integer,
    /// `TEXT`.
    Text,
}

impl ColumnType {
    /// Map a field kind to its column type.
    pub fn for_kind(kind: FieldKind) -> Self {
        match kind {
            FieldKind::ShortText => Self::BoundedText,
            FieldKind::Number => Self::Real,
            FieldKind::Boolean => Self::Integer,
            FieldKind::LongText | FieldKind::Date | FieldKind::Relation => Self::Text,
        }
    }

    /// SQL type name.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::BoundedText => "VARCHAR(255)",
            Self::Real => "REAL",
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
        }
    }
}

/// One user-visible column of a model table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Field kind the column holds values of.
    pub kind: FieldKind,
    /// Column type.
    pub column_type: ColumnType,
    /// `NOT NULL`.
    pub not_null: bool,
    /// `UNIQUE`.
    pub unique: bool,
    /// Rendered `DEFAULT` literal.
    pub default_sql: Option<String>,
    /// Column was synthesized for the owner field.
    pub synthesized_owner: bool,
}

impl ColumnSpec {
    fn from_field(field: &FieldDefinition) -> Self {
        Self {
            name: field.name.clone(),
            kind: field.kind,
            column_type: ColumnType::for_kind(field.kind),
            not_null: field.required,
            unique: field.unique,
            default_sql: field.default.as_ref().and_then(|v| default_literal(field.kind, v)),
            synthesized_owner: false,
        }
    }

    fn owner(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: FieldKind::ShortText,
            column_type: ColumnType::BoundedText,
            not_null: false,
            unique: false,
            default_sql: None,
            synthesized_owner: true,
        }
    }

    fn to_sql(&self) -> String {
        let mut parts = vec![quote_ident(&self.name), self.column_type.as_sql().to_owned()];
        if self.not_null {
            parts.push("NOT NULL".to_owned());
        }
        if self.unique {
            parts.push("UNIQUE".to_owned());
        }
        if let Some(default) = &self.default_sql {
            parts.push(format!("DEFAULT {default}"));
        }
        parts.join(" ")
    }
}

/// Render a default value as a SQL literal. `null` renders as no default.
fn default_literal(kind: FieldKind, value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_owned()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if kind.is_string_like() => Some(quote_literal(s)),
        other => Some(quote_literal(&other.to_string())),
    }
}

/// Double-quote an identifier. Identifiers are validated at registration;
/// embedded quotes are still doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Column layout of one model's table.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageShape {
    /// Model name the shape was derived from.
    pub model: String,
    /// Table name.
    pub table: String,
    /// Declared columns in order, followed by the synthesized owner column.
    pub columns: Vec<ColumnSpec>,
    /// Owner column name, if the model has one.
    pub owner_column: Option<String>,
}

impl StorageShape {
    /// Derive the table shape for a model.
    pub fn from_model(model: &ModelDefinition) -> Self {
        let mut columns: Vec<ColumnSpec> = model.fields.iter().map(ColumnSpec::from_field).collect();
        if let Some(owner) = &model.owner_field {
            if model.field_named(owner).is_none() {
                columns.push(ColumnSpec::owner(owner));
            }
        }
        Self {
            model: model.name.clone(),
            table: model.storage_name(),
            columns,
            owner_column: model.owner_field.clone(),
        }
    }

    /// Look up a user-visible column.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether callers may write `name`. Implicit columns never are.
    pub fn is_writable(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Quoted table name.
    pub fn quoted_table(&self) -> String {
        quote_ident(&self.table)
    }

    /// The `CREATE TABLE IF NOT EXISTS` statement for this shape.
    pub fn create_table_sql(&self) -> String {
        let mut cols = vec![
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(ID_COLUMN)),
            format!("{} TEXT NOT NULL DEFAULT ({NOW_SQL})", quote_ident(CREATED_AT_COLUMN)),
            format!("{} TEXT NOT NULL DEFAULT ({NOW_SQL})", quote_ident(UPDATED_AT_COLUMN)),
        ];
        cols.extend(self.columns.iter().map(ColumnSpec::to_sql));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quoted_table(),
            cols.join(", ")
        )
    }

    /// Ensure the table exists.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Materialize`] if the statement fails.
    pub async fn materialize(&self, pool: &SqlitePool) -> Result<(), ShapeError> {
        let sql = self.create_table_sql();
        debug!(table = %self.table, %sql, "materializing table");
        sqlx::query(&sql)
            .execute(pool)
            .await
            .map_err(|source| ShapeError::Materialize {
                table: self.table.clone(),
                source,
            })?;
        info!(model = %self.model, table = %self.table, columns = self.columns.len(), "table materialized");
        Ok(())
    }
}
