//! Live catalog introspection
//!
//! Read-only queries against `information_schema` and `pg_catalog`. These
//! may run concurrently with anything, including a migration in flight;
//! results are only meaningful for drift detection once the lock holder has
//! released.

use crate::error::Result;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

/// One catalog column
#[derive(Debug, Clone)]
pub struct CatalogColumn {
    pub name: String,
    /// information_schema data type, e.g. `boolean`, `USER-DEFINED`
    pub data_type: String,
    /// Underlying type name for user-defined types (enum type name)
    pub udt_name: Option<String>,
    pub is_nullable: bool,
    pub column_default: Option<String>,
}

/// One catalog foreign key
#[derive(Debug, Clone)]
pub struct CatalogForeignKey {
    pub constraint_name: String,
    pub column: String,
    pub foreign_table: String,
    pub delete_rule: String,
}

/// Constraint names per column, for one constraint type
pub type ConstraintColumns = HashMap<String, Vec<String>>;

pub async fn table_exists(pool: &PgPool, table: &str) -> Result<bool> {
    let row = sqlx::query(
        "SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = 'public' AND table_name = $1
        ) AS present",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;

    Ok(row.try_get::<bool, _>("present")?)
}

pub async fn all_tables(pool: &PgPool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT table_name
        FROM information_schema.tables
        WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
        ORDER BY table_name",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| Ok(row.try_get::<String, _>("table_name")?))
        .collect()
}

pub async fn table_columns(pool: &PgPool, table: &str) -> Result<Vec<CatalogColumn>> {
    let rows = sqlx::query(
        "SELECT
            c.column_name,
            c.data_type,
            c.is_nullable,
            c.column_default,
            CASE
                WHEN c.data_type IN ('USER-DEFINED', 'ARRAY') THEN c.udt_name
                ELSE NULL
            END as custom_type_name
        FROM information_schema.columns c
        WHERE c.table_name = $1 AND c.table_schema = 'public'
        ORDER BY c.ordinal_position",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(CatalogColumn {
            name: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            udt_name: row.try_get("custom_type_name").ok().flatten(),
            is_nullable: row.try_get::<&str, _>("is_nullable")? == "YES",
            column_default: row.try_get("column_default").ok().flatten(),
        });
    }

    Ok(columns)
}

/// Column name -> constraint names, for one constraint type
/// (`PRIMARY KEY` or `UNIQUE`)
pub async fn constraint_columns(
    pool: &PgPool,
    table: &str,
    constraint_type: &str,
) -> Result<ConstraintColumns> {
    let rows = sqlx::query(
        "SELECT tc.constraint_name, kcu.column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        WHERE tc.table_name = $1
            AND tc.table_schema = 'public'
            AND tc.constraint_type = $2",
    )
    .bind(table)
    .bind(constraint_type)
    .fetch_all(pool)
    .await?;

    let mut by_column: ConstraintColumns = HashMap::new();
    for row in rows {
        let constraint: String = row.try_get("constraint_name")?;
        let column: String = row.try_get("column_name")?;
        by_column.entry(column).or_default().push(constraint);
    }

    Ok(by_column)
}

pub async fn foreign_keys(pool: &PgPool, table: &str) -> Result<Vec<CatalogForeignKey>> {
    let rows = sqlx::query(
        "SELECT
            tc.constraint_name,
            kcu.column_name,
            ccu.table_name as foreign_table_name,
            rc.delete_rule
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
        JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_name = tc.constraint_name
        JOIN information_schema.referential_constraints rc
            ON tc.constraint_name = rc.constraint_name
        WHERE tc.table_name = $1
            AND tc.table_schema = 'public'
            AND tc.constraint_type = 'FOREIGN KEY'",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut keys = Vec::with_capacity(rows.len());
    for row in rows {
        keys.push(CatalogForeignKey {
            constraint_name: row.try_get("constraint_name")?,
            column: row.try_get("column_name")?,
            foreign_table: row.try_get("foreign_table_name")?,
            delete_rule: row.try_get("delete_rule")?,
        });
    }

    Ok(keys)
}

/// Values of an enum type, in declared order
pub async fn enum_values(pool: &PgPool, type_name: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT e.enumlabel
        FROM pg_type t
        JOIN pg_enum e ON t.oid = e.enumtypid
        WHERE t.typname = $1
        ORDER BY e.enumsortorder",
    )
    .bind(type_name)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| Ok(row.try_get::<String, _>("enumlabel")?))
        .collect()
}

/// Names of every index on a table, including constraint-backed ones
pub async fn index_names(pool: &PgPool, table: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT i.relname as index_name
        FROM pg_class t
        JOIN pg_index idx ON t.oid = idx.indrelid
        JOIN pg_class i ON i.oid = idx.indexrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE t.relname = $1 AND n.nspname = 'public'
        ORDER BY i.relname",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| Ok(row.try_get::<String, _>("index_name")?))
        .collect()
}
