//! Schema-sync checker
//!
//! Diffs the declared model schema against the live PostgreSQL catalog and
//! reports every mismatch as a [`DriftError`]. Sub-checks never
//! short-circuit: a table is in sync iff it produced zero errors across all
//! of them, and a failed catalog query for one table degrades to an error
//! for that table without aborting the others.

pub mod associations;
pub mod column;
pub mod introspect;

use crate::config::{NamingConfig, SyncConfig};
use crate::error::Error;
use futures::future::join_all;
use sqlx::PgPool;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use wildebeest_schema::{ModelDeclaration, ModelRegistry};

/// One detected mismatch between declaration and catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftError {
    pub table: String,
    pub message: String,
}

impl DriftError {
    pub fn new(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for DriftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table, self.message)
    }
}

/// The drift detector
pub struct SchemaSyncChecker {
    pool: PgPool,
    registry: Arc<ModelRegistry>,
    naming: NamingConfig,
    sync: SyncConfig,
    /// The engine's own tables, always exempt from the extraneous check
    internal_tables: Vec<String>,
}

impl SchemaSyncChecker {
    pub fn new(
        pool: PgPool,
        registry: Arc<ModelRegistry>,
        naming: NamingConfig,
        sync: SyncConfig,
        internal_tables: Vec<String>,
    ) -> Self {
        Self {
            pool,
            registry,
            naming,
            sync,
            internal_tables,
        }
    }

    /// Run every sub-check for every declared model and merge the results
    ///
    /// Per-table checks run concurrently; they are independent read-only
    /// catalog queries.
    pub async fn check_all(&self) -> Vec<DriftError> {
        let per_table = join_all(self.registry.models().map(|model| self.check_model(model))).await;

        let mut errors: Vec<DriftError> = per_table.into_iter().flatten().collect();
        errors.extend(self.check_extraneous_tables().await);
        errors
    }

    /// Aggregate predicate: zero drift errors across every sub-check
    pub async fn is_synced(&self) -> bool {
        self.check_all().await.is_empty()
    }

    async fn check_model(&self, model: &ModelDeclaration) -> Vec<DriftError> {
        let table = model.table.as_str();
        let mut errors = Vec::new();

        match introspect::table_exists(&self.pool, table).await {
            Ok(true) => {}
            Ok(false) => {
                errors.push(DriftError::new(table, "table does not exist in the catalog"));
                // Association symmetry is declaration-only and still worth
                // reporting for a missing table
                errors.extend(associations::check_associations(&self.registry, model));
                return errors;
            }
            Err(e) => {
                errors.push(query_drift(table, "table existence", e));
                return errors;
            }
        }

        errors.extend(self.check_columns(model).await);
        errors.extend(self.check_indexes(model).await);
        errors.extend(associations::check_associations(&self.registry, model));
        errors
    }

    async fn check_columns(&self, model: &ModelDeclaration) -> Vec<DriftError> {
        let table = model.table.as_str();
        let mut errors = Vec::new();

        let catalog_columns = match introspect::table_columns(&self.pool, table).await {
            Ok(columns) => columns,
            Err(e) => return vec![query_drift(table, "columns", e)],
        };

        // Column set equality, both directions, deduplicated
        let declared_names: HashSet<&str> = model.columns.keys().map(String::as_str).collect();
        let catalog_names: HashSet<&str> =
            catalog_columns.iter().map(|c| c.name.as_str()).collect();

        for name in declared_names.difference(&catalog_names) {
            errors.push(DriftError::new(
                table,
                format!("declared column '{}' is missing from the catalog", name),
            ));
        }
        for name in catalog_names.difference(&declared_names) {
            errors.push(DriftError::new(
                table,
                format!("catalog column '{}' is not declared", name),
            ));
        }

        let unique_constraints =
            match introspect::constraint_columns(&self.pool, table, "UNIQUE").await {
                Ok(constraints) => constraints,
                Err(e) => {
                    errors.push(query_drift(table, "unique constraints", e));
                    Default::default()
                }
            };
        let primary_key_constraints =
            match introspect::constraint_columns(&self.pool, table, "PRIMARY KEY").await {
                Ok(constraints) => constraints,
                Err(e) => {
                    errors.push(query_drift(table, "primary key constraints", e));
                    Default::default()
                }
            };
        let foreign_keys = match introspect::foreign_keys(&self.pool, table).await {
            Ok(keys) => keys,
            Err(e) => {
                errors.push(query_drift(table, "foreign keys", e));
                Vec::new()
            }
        };

        for (name, declaration) in &model.columns {
            let Some(catalog_column) = catalog_columns.iter().find(|c| c.name == *name) else {
                // Already reported by the column-set check
                continue;
            };

            errors.extend(column::check_column(
                table,
                name,
                declaration,
                catalog_column,
                &self.naming,
            ));
            errors.extend(column::check_unique(
                table,
                name,
                declaration,
                &unique_constraints,
                &self.naming,
            ));
            errors.extend(column::check_primary_key(
                table,
                name,
                declaration,
                &primary_key_constraints,
                &self.naming,
            ));

            if let Some(declared_values) = declaration.column_type.enum_values() {
                let type_name = catalog_column
                    .udt_name
                    .clone()
                    .unwrap_or_else(|| self.naming.enum_type_name(table, name));

                match introspect::enum_values(&self.pool, &type_name).await {
                    Ok(catalog_values) => {
                        errors.extend(column::check_enum_values(
                            table,
                            name,
                            declared_values,
                            &catalog_values,
                        ));
                    }
                    Err(e) => errors.push(query_drift(table, "enum values", e)),
                }
            }
        }

        for association in &model.associations.belongs_to {
            let Some(target) = self.registry.get(&association.entity) else {
                // Reported by the association checks
                continue;
            };
            errors.extend(column::check_foreign_key(
                table,
                association,
                &target.table,
                &foreign_keys,
                &self.naming,
            ));
        }

        errors
    }

    async fn check_indexes(&self, model: &ModelDeclaration) -> Vec<DriftError> {
        let table = model.table.as_str();

        let catalog_names = match introspect::index_names(&self.pool, table).await {
            Ok(names) => names,
            Err(e) => return vec![query_drift(table, "indexes", e)],
        };
        let catalog_names: HashSet<String> = catalog_names.into_iter().collect();
        let expected = expected_index_names(model, &self.naming);

        let mut errors = Vec::new();
        for name in expected.difference(&catalog_names) {
            errors.push(DriftError::new(
                table,
                format!("declared index '{}' is missing from the catalog", name),
            ));
        }
        for name in catalog_names.difference(&expected) {
            errors.push(DriftError::new(
                table,
                format!("catalog index '{}' is not declared", name),
            ));
        }

        errors
    }

    /// Catalog tables declared by no model and not ignored, reported once
    async fn check_extraneous_tables(&self) -> Vec<DriftError> {
        let tables = match introspect::all_tables(&self.pool).await {
            Ok(tables) => tables,
            Err(e) => return vec![query_drift("catalog", "table listing", e)],
        };

        let declared: HashSet<&str> = self
            .registry
            .models()
            .map(|m| m.table.as_str())
            .collect();

        tables
            .into_iter()
            .filter(|table| {
                !declared.contains(table.as_str())
                    && !self.sync.ignored_tables.contains(table)
                    && !self.internal_tables.contains(table)
            })
            .map(|table| {
                DriftError::new(
                    table.clone(),
                    "table exists in the catalog but is declared by no model",
                )
            })
            .collect()
    }
}

/// Index names the catalog is expected to carry for a model
///
/// Declared composite indexes plus the implicit indexes PostgreSQL creates
/// for primary key and unique constraints.
pub(crate) fn expected_index_names(
    model: &ModelDeclaration,
    naming: &NamingConfig,
) -> HashSet<String> {
    let table = model.table.as_str();
    let mut names = HashSet::new();

    for index in &model.indexes {
        let name = index
            .name
            .clone()
            .unwrap_or_else(|| naming.index_name(table, &index.columns));
        names.insert(name);
    }

    for (column, declaration) in &model.columns {
        if declaration.primary_key {
            names.insert(naming.primary_key_name(table));
        } else if declaration.unique {
            names.insert(naming.unique_name(table, column));
        }
    }

    names
}

fn query_drift(table: &str, what: &str, error: Error) -> DriftError {
    DriftError::new(
        table,
        format!("catalog query for {} failed: {}", what, error),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wildebeest_schema::{ColumnDeclaration, ColumnType, IndexDeclaration};

    #[test]
    fn test_drift_error_display() {
        let error = DriftError::new("users", "column 'email' default mismatch");
        assert_eq!(error.to_string(), "users: column 'email' default mismatch");
    }

    #[test]
    fn test_expected_index_names_cover_declared_and_implicit() {
        let model = ModelDeclaration::new("User", "users")
            .column("id", ColumnDeclaration::new(ColumnType::Serial).primary_key())
            .column("email", ColumnDeclaration::new(ColumnType::Text).unique())
            .column("name", ColumnDeclaration::new(ColumnType::Text))
            .index(IndexDeclaration::new(["tenant_id", "email"]))
            .index(IndexDeclaration::new(["name"]).named("users_custom_name_idx"));

        let names = expected_index_names(&model, &NamingConfig::default());

        assert!(names.contains("users_pkey"));
        assert!(names.contains("users_email_key"));
        assert!(names.contains("users_tenant_id_email_index"));
        assert!(names.contains("users_custom_name_idx"));
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_primary_key_column_does_not_expect_unique_index() {
        let model = ModelDeclaration::new("User", "users").column(
            "id",
            ColumnDeclaration::new(ColumnType::Serial)
                .primary_key()
                .unique(),
        );

        let names = expected_index_names(&model, &NamingConfig::default());
        assert!(names.contains("users_pkey"));
        assert!(!names.contains("users_id_key"));
    }
}
