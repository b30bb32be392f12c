//! Transaction-scoped query helpers
//!
//! Migration bodies and the drift detector never touch the pool directly;
//! they receive a [`TransactionHelpers`] bound to exactly one transaction.
//! Nothing here escapes that transaction boundary: every statement runs on
//! the wrapped connection and is committed or rolled back as a unit.

pub mod batch;

pub use batch::BatchScan;

use crate::config::BatchConfig;
use crate::database::{pg_row_to_json, SqlValue};
use crate::error::{Error, Result};
use serde_json::{Map, Value as JsonValue};
use sqlx::{PgPool, Postgres, Transaction};

/// Result of a raw statement
#[derive(Debug)]
pub struct QueryOutput {
    /// Rows returned, as JSON objects
    pub rows: Vec<JsonValue>,
    /// Number of rows returned
    pub count: usize,
}

/// Typed helpers over a single database transaction
pub struct TransactionHelpers {
    tx: Transaction<'static, Postgres>,
    batch: BatchConfig,
}

impl TransactionHelpers {
    /// Begin a transaction on the pool
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        Self::begin_with(pool, BatchConfig::default()).await
    }

    /// Begin a transaction with explicit batch settings
    pub async fn begin_with(pool: &PgPool, batch: BatchConfig) -> Result<Self> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| Error::database_transaction(format!("Failed to begin: {}", e)))?;
        Ok(Self { tx, batch })
    }

    /// Commit the transaction, consuming the helpers
    pub async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::database_transaction(format!("Failed to commit: {}", e)))
    }

    /// Roll the transaction back, consuming the helpers
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| Error::database_transaction(format!("Failed to rollback: {}", e)))
    }

    pub(crate) fn batch_config(&self) -> &BatchConfig {
        &self.batch
    }

    /// Fetch all rows of a parameterized SELECT as JSON objects
    pub async fn select(&mut self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<JsonValue>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = param.bind(query);
        }

        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| Error::database_query(format!("select failed: {}", e)))?;

        rows.iter().map(pg_row_to_json).collect()
    }

    /// Execute a parameterized statement, returning the affected row count
    pub async fn execute(&mut self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = param.bind(query);
        }

        let result = query
            .execute(&mut *self.tx)
            .await
            .map_err(|e| Error::database_query(format!("execute failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    /// Run a raw, possibly multi-statement script and collect any rows
    ///
    /// Uses the simple query protocol, so DDL scripts (e.g. a bootstrap
    /// snapshot) run as-is.
    pub async fn raw(&mut self, sql: &str) -> Result<QueryOutput> {
        let rows = sqlx::raw_sql(sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| Error::database_query(format!("raw statement failed: {}", e)))?;

        let rows: Vec<JsonValue> = rows.iter().map(pg_row_to_json).collect::<Result<_>>()?;
        let count = rows.len();
        Ok(QueryOutput { rows, count })
    }

    /// Bulk-insert rows into a table
    ///
    /// Column set is taken from the first row; later rows may omit columns,
    /// which insert as NULL.
    pub async fn insert(&mut self, table: &str, rows: &[JsonValue]) -> Result<u64> {
        let first = match rows.first() {
            Some(JsonValue::Object(obj)) => obj,
            Some(_) => return Err(Error::validation("insert rows must be JSON objects")),
            None => return Ok(0),
        };

        let columns: Vec<String> = first.keys().cloned().collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ",
            quote_ident(table),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut params: Vec<SqlValue> = Vec::with_capacity(rows.len() * columns.len());
        let mut placeholder = 1;
        for (row_index, row) in rows.iter().enumerate() {
            let obj = row
                .as_object()
                .ok_or_else(|| Error::validation("insert rows must be JSON objects"))?;

            if row_index > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (col_index, column) in columns.iter().enumerate() {
                if col_index > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&format!("${}", placeholder));
                placeholder += 1;
                params.push(obj.get(column).map(SqlValue::from).unwrap_or(SqlValue::Null));
            }
            sql.push(')');
        }

        self.execute(&sql, params).await
    }

    /// Delete rows matching an equality predicate
    ///
    /// Null predicate values translate to `IS NULL`.
    pub async fn delete(&mut self, table: &str, predicate: &Map<String, JsonValue>) -> Result<u64> {
        let mut sql = format!("DELETE FROM {}", quote_ident(table));
        let mut params = Vec::new();

        if !predicate.is_empty() {
            sql.push_str(" WHERE ");
            let mut placeholder = 1;
            for (i, (column, value)) in predicate.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                if value.is_null() {
                    sql.push_str(&format!("{} IS NULL", quote_ident(column)));
                } else {
                    sql.push_str(&format!("{} = ${}", quote_ident(column), placeholder));
                    placeholder += 1;
                    params.push(SqlValue::from(value));
                }
            }
        }

        self.execute(&sql, params).await
    }
}

/// Quote a SQL identifier
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }
}
