//! SQL value binding and row extraction
//!
//! Migration bodies and the sync checker exchange rows as JSON objects, so
//! the engine needs a single mapping between `serde_json::Value`, bindable
//! query parameters, and PostgreSQL result columns.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};

/// SQL value for parameter binding
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Double(f64),
    String(String),
    Uuid(uuid::Uuid),
    DateTime(DateTime<Utc>),
    Json(JsonValue),
}

impl SqlValue {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Bind this value onto a PostgreSQL query
    pub fn bind<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Bool(b) => query.bind(b),
            SqlValue::Int(i) => query.bind(i),
            SqlValue::BigInt(i) => query.bind(i),
            SqlValue::Double(f) => query.bind(f),
            SqlValue::String(s) => query.bind(s),
            SqlValue::Uuid(u) => query.bind(u),
            SqlValue::DateTime(dt) => query.bind(dt),
            SqlValue::Json(j) => query.bind(j),
        }
    }
}

impl From<&JsonValue> for SqlValue {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::BigInt(i)
                } else {
                    SqlValue::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => SqlValue::String(s.clone()),
            composite => SqlValue::Json(composite.clone()),
        }
    }
}

/// Convert a PostgreSQL row into a JSON object keyed by column name
pub fn pg_row_to_json(row: &PgRow) -> Result<JsonValue> {
    let mut obj = Map::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = extract_column_value(row, i, column)?;
        obj.insert(column.name().to_string(), value);
    }

    Ok(JsonValue::Object(obj))
}

fn extract_column_value(
    row: &PgRow,
    index: usize,
    column: &sqlx::postgres::PgColumn,
) -> Result<JsonValue> {
    let is_null = row
        .try_get_raw(index)
        .map(|raw| raw.is_null())
        .unwrap_or(true);
    if is_null {
        return Ok(JsonValue::Null);
    }

    let type_name = column.type_info().name();
    match type_name {
        "BOOL" => Ok(JsonValue::Bool(row.try_get::<bool, _>(index).map_err(
            |e| Error::database_query(format!("column '{}': {}", column.name(), e)),
        )?)),
        "INT2" => Ok(JsonValue::from(row.try_get::<i16, _>(index).map_err(
            |e| Error::database_query(format!("column '{}': {}", column.name(), e)),
        )?)),
        "INT4" => Ok(JsonValue::from(row.try_get::<i32, _>(index).map_err(
            |e| Error::database_query(format!("column '{}': {}", column.name(), e)),
        )?)),
        "INT8" => Ok(JsonValue::from(row.try_get::<i64, _>(index).map_err(
            |e| Error::database_query(format!("column '{}': {}", column.name(), e)),
        )?)),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => extract_float(row, index, column),
        "UUID" => Ok(JsonValue::String(
            row.try_get::<uuid::Uuid, _>(index)
                .map_err(|e| {
                    Error::database_query(format!("column '{}': {}", column.name(), e))
                })?
                .to_string(),
        )),
        "TIMESTAMPTZ" | "TIMESTAMP" => extract_timestamp(row, index, column),
        "DATE" => {
            let date = row.try_get::<NaiveDate, _>(index).map_err(|e| {
                Error::database_query(format!("column '{}': {}", column.name(), e))
            })?;
            Ok(JsonValue::String(date.to_string()))
        }
        "JSON" | "JSONB" => row
            .try_get::<JsonValue, _>(index)
            .map_err(|e| Error::database_query(format!("column '{}': {}", column.name(), e))),
        // TEXT, VARCHAR, NAME, BPCHAR, enums and anything else textual
        _ => extract_text(row, index, column),
    }
}

fn extract_float(row: &PgRow, index: usize, column: &sqlx::postgres::PgColumn) -> Result<JsonValue> {
    if let Ok(f) = row.try_get::<f64, _>(index) {
        return Ok(serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null));
    }
    if let Ok(f) = row.try_get::<f32, _>(index) {
        return Ok(serde_json::Number::from_f64(f as f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null));
    }
    // NUMERIC without the decimal feature decodes as text
    extract_text(row, index, column)
}

fn extract_timestamp(
    row: &PgRow,
    index: usize,
    column: &sqlx::postgres::PgColumn,
) -> Result<JsonValue> {
    if let Ok(dt) = row.try_get::<DateTime<Utc>, _>(index) {
        return Ok(JsonValue::String(dt.to_rfc3339()));
    }

    if let Ok(ndt) = row.try_get::<NaiveDateTime, _>(index) {
        let dt = DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc);
        return Ok(JsonValue::String(dt.to_rfc3339()));
    }

    Err(Error::database_query(format!(
        "Failed to extract timestamp from column '{}' (type: {})",
        column.name(),
        column.type_info().name()
    )))
}

fn extract_text(row: &PgRow, index: usize, column: &sqlx::postgres::PgColumn) -> Result<JsonValue> {
    if let Ok(s) = row.try_get::<String, _>(index) {
        return Ok(JsonValue::String(s));
    }

    // Enum and other user-defined types are textual on the wire but carry a
    // type oid sqlx will not match against String; decode unchecked.
    if let Ok(s) = row.try_get_unchecked::<String, _>(index) {
        return Ok(JsonValue::String(s));
    }

    log::warn!(
        "Unsupported column type '{}' for column '{}', returning null",
        column.type_info().name(),
        column.name()
    );
    Ok(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_from_json() {
        assert_eq!(SqlValue::from(&JsonValue::Null), SqlValue::Null);
        assert_eq!(SqlValue::from(&serde_json::json!(true)), SqlValue::Bool(true));
        assert_eq!(SqlValue::from(&serde_json::json!(42)), SqlValue::BigInt(42));
        assert_eq!(
            SqlValue::from(&serde_json::json!(1.5)),
            SqlValue::Double(1.5)
        );
        assert_eq!(
            SqlValue::from(&serde_json::json!("hello")),
            SqlValue::String("hello".to_string())
        );
        assert_eq!(
            SqlValue::from(&serde_json::json!({"a": 1})),
            SqlValue::Json(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn test_sql_value_null_check() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Bool(false).is_null());
    }
}
