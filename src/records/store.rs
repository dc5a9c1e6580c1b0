//! SQLite-backed generic record store.
//!
//! One query builder serves every model: identifiers come from the validated
//! [`StorageShape`] and are always quoted, values are always bound
//! parameters. Every operation is a single statement (`RETURNING` for
//! writes), so each completes within one storage round trip.

use std::collections::BTreeMap;

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, trace};

use super::{FieldValue, Page, Payload, Record};
use crate::error::{GateError, NotFound};
use crate::model::{FieldKind, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::schema::{quote_ident, StorageShape, NOW_SQL};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Generic create/list/get/update/delete over any materialized shape.
#[derive(Debug, Clone)]
pub struct RecordStore {
    db: SqlitePool,
}

impl RecordStore {
    /// Wrap a connection pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert a record built from the writable subset of `payload`.
    ///
    /// # Errors
    ///
    /// [`GateError::Validation`] if a required field without a default is
    /// absent or null, or a storage constraint rejects the row;
    /// [`GateError::Internal`] on other storage failures.
    pub async fn create(&self, shape: &StorageShape, payload: Payload) -> Result<Record, GateError> {
        let values = writable_values(shape, payload);

        for column in &shape.columns {
            let may_omit = !column.not_null || column.default_sql.is_some();
            let present = values
                .iter()
                .any(|(name, v)| name == &column.name && !v.is_null());
            if !may_omit && !present {
                return Err(GateError::Validation(format!(
                    "{}: required field '{}' is missing",
                    shape.model, column.name
                )));
            }
        }

        let sql = if values.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING *", shape.quoted_table())
        } else {
            let columns: Vec<String> = values.iter().map(|(name, _)| quote_ident(name)).collect();
            let placeholders = vec!["?"; values.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({placeholders}) RETURNING *",
                shape.quoted_table(),
                columns.join(", ")
            )
        };

        let query = bind_values(sqlx::query(&sql), values.into_iter().map(|(_, v)| v));
        let row = query
            .fetch_one(&self.db)
            .await
            .map_err(|e| GateError::from_storage(e, &shape.model, "record insert"))?;
        let record = decode_row(shape, &row).map_err(|e| GateError::from_storage(e, &shape.model, "record decode"))?;
        debug!(model = %shape.model, id = record.id, "record created");
        Ok(record)
    }

    /// Newest records first, bounded by `page`.
    ///
    /// # Errors
    ///
    /// [`GateError::Internal`] on storage failure.
    pub async fn list(&self, shape: &StorageShape, page: Page) -> Result<Vec<Record>, GateError> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} DESC LIMIT ? OFFSET ?",
            shape.quoted_table(),
            quote_ident(ID_COLUMN)
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(page.effective_limit()))
            .bind(i64::from(page.offset))
            .fetch_all(&self.db)
            .await
            .map_err(|e| GateError::from_storage(e, &shape.model, "record list"))?;
        trace!(model = %shape.model, count = rows.len(), "records listed");
        rows.iter()
            .map(|row| decode_row(shape, row))
            .collect::<Result<_, _>>()
            .map_err(|e| GateError::from_storage(e, &shape.model, "record decode"))
    }

    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// [`GateError::NotFound`] if no row has this id.
    pub async fn get(&self, shape: &StorageShape, id: i64) -> Result<Record, GateError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            shape.quoted_table(),
            quote_ident(ID_COLUMN)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| GateError::from_storage(e, &shape.model, "record lookup"))?
            .ok_or_else(|| record_not_found(shape, id))?;
        decode_row(shape, &row).map_err(|e| GateError::from_storage(e, &shape.model, "record decode"))
    }

    /// Overwrite the writable columns present in `payload` and refresh `updatedAt`.
    ///
    /// # Errors
    ///
    /// [`GateError::Validation`] if no writable column is present (the row is
    /// left untouched); [`GateError::NotFound`] if no row matched.
    pub async fn update(&self, shape: &StorageShape, id: i64, payload: Payload) -> Result<Record, GateError> {
        let values = writable_values(shape, payload);
        if values.is_empty() {
            return Err(GateError::Validation(format!("{}: no fields to update", shape.model)));
        }

        let assignments: Vec<String> = values
            .iter()
            .map(|(name, _)| format!("{} = ?", quote_ident(name)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {}, {} = ({NOW_SQL}) WHERE {} = ? RETURNING *",
            shape.quoted_table(),
            assignments.join(", "),
            quote_ident(UPDATED_AT_COLUMN),
            quote_ident(ID_COLUMN)
        );

        let query = bind_values(sqlx::query(&sql), values.into_iter().map(|(_, v)| v)).bind(id);
        let row = query
            .fetch_optional(&self.db)
            .await
            .map_err(|e| GateError::from_storage(e, &shape.model, "record update"))?
            .ok_or_else(|| record_not_found(shape, id))?;
        debug!(model = %shape.model, id, "record updated");
        decode_row(shape, &row).map_err(|e| GateError::from_storage(e, &shape.model, "record decode"))
    }

    /// Remove a record. Returns whether a row was actually removed.
    ///
    /// # Errors
    ///
    /// [`GateError::Internal`] on storage failure.
    pub async fn delete(&self, shape: &StorageShape, id: i64) -> Result<bool, GateError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            shape.quoted_table(),
            quote_ident(ID_COLUMN)
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| GateError::from_storage(e, &shape.model, "record delete"))?;
        let deleted = result.rows_affected() > 0;
        debug!(model = %shape.model, id, deleted, "record delete");
        Ok(deleted)
    }

    /// Owner column value of one record, string-normalized.
    ///
    /// Returns `None` when the model has no owner column, the row does not
    /// exist, or the owner is `NULL`.
    ///
    /// # Errors
    ///
    /// [`GateError::Internal`] on storage failure.
    pub async fn lookup_owner(&self, shape: &StorageShape, id: i64) -> Result<Option<String>, GateError> {
        let Some(owner) = &shape.owner_column else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            quote_ident(owner),
            shape.quoted_table(),
            quote_ident(ID_COLUMN)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| GateError::from_storage(e, &shape.model, "ownership lookup"))?;
        match row {
            Some(row) => row
                .try_get_unchecked::<Option<String>, _>(0)
                .map_err(|e| GateError::from_storage(e, &shape.model, "ownership lookup")),
            None => Ok(None),
        }
    }
}

/// Keep only writable columns, in shape order.
fn writable_values(shape: &StorageShape, mut payload: Payload) -> Vec<(String, FieldValue)> {
    let mut values = Vec::new();
    for column in &shape.columns {
        if let Some(value) = payload.remove(&column.name) {
            values.push((column.name.clone(), value.for_kind(column.kind)));
        }
    }
    if !payload.is_empty() {
        trace!(model = %shape.model, ignored = ?payload.keys().collect::<Vec<_>>(), "unknown payload keys ignored");
    }
    values
}

fn bind_values<'q>(mut query: SqliteQuery<'q>, values: impl Iterator<Item = FieldValue>) -> SqliteQuery<'q> {
    for value in values {
        query = match value {
            FieldValue::Text(s) | FieldValue::Date(s) => query.bind(s),
            FieldValue::Number(n) => query.bind(n),
            FieldValue::Boolean(b) => query.bind(i64::from(b)),
            FieldValue::Null => query.bind(None::<String>),
        };
    }
    query
}

fn record_not_found(shape: &StorageShape, id: i64) -> GateError {
    GateError::NotFound(NotFound::Record {
        model: shape.model.clone(),
        id,
    })
}

/// Decode a full row, tagging each column by its field kind.
///
/// Decoding is unchecked so SQLite's own conversions apply when a stored
/// value's type differs from the column's declared kind.
fn decode_row(shape: &StorageShape, row: &SqliteRow) -> Result<Record, sqlx::Error> {
    let id: i64 = row.try_get(ID_COLUMN)?;
    let created_at: String = row.try_get_unchecked(CREATED_AT_COLUMN)?;
    let updated_at: String = row.try_get_unchecked(UPDATED_AT_COLUMN)?;

    let mut fields = BTreeMap::new();
    for column in &shape.columns {
        let name = column.name.as_str();
        let value = match column.kind {
            FieldKind::Number => row
                .try_get_unchecked::<Option<f64>, _>(name)?
                .map_or(FieldValue::Null, FieldValue::Number),
            FieldKind::Boolean => row
                .try_get_unchecked::<Option<i64>, _>(name)?
                .map_or(FieldValue::Null, |v| FieldValue::Boolean(v != 0)),
            FieldKind::Date => row
                .try_get_unchecked::<Option<String>, _>(name)?
                .map_or(FieldValue::Null, FieldValue::Date),
            FieldKind::ShortText | FieldKind::LongText | FieldKind::Relation => row
                .try_get_unchecked::<Option<String>, _>(name)?
                .map_or(FieldValue::Null, FieldValue::Text),
        };
        fields.insert(column.name.clone(), value);
    }

    Ok(Record {
        id,
        created_at,
        updated_at,
        fields,
    })
}
