//! Per-column drift checks
//!
//! Field-by-field mapping between a declared column and its catalog row:
//! type equivalence, nullability, normalized default comparison, constraint
//! presence, and enum value sets. Every check emits drift errors instead of
//! failing, so a single pass reports all mismatches.

use super::introspect::{CatalogColumn, CatalogForeignKey, ConstraintColumns};
use super::DriftError;
use crate::config::NamingConfig;
use serde_json::Value as JsonValue;
use wildebeest_schema::{BelongsTo, ColumnDeclaration, ColumnType};

/// Catalog type names equivalent to a declared type
pub fn expected_data_types(column_type: &ColumnType) -> &'static [&'static str] {
    match column_type {
        ColumnType::Boolean => &["boolean"],
        ColumnType::Integer | ColumnType::Serial => &["integer"],
        ColumnType::BigInt | ColumnType::BigSerial => &["bigint"],
        ColumnType::Float => &["double precision", "real"],
        ColumnType::Text => &["text"],
        ColumnType::VarChar(_) => &["character varying"],
        ColumnType::Uuid => &["uuid"],
        ColumnType::Timestamp => &["timestamp with time zone", "timestamp without time zone"],
        ColumnType::Date => &["date"],
        ColumnType::Json => &["json"],
        ColumnType::JsonB => &["jsonb"],
        ColumnType::Enum { .. } => &["USER-DEFINED"],
    }
}

/// Catalog default forms a declared column may legitimately show
///
/// `None` means the catalog must report no default. Function-valued
/// defaults are computed by the application at write time, so they compare
/// as absent; auto-increment columns compare against the catalog's sequence
/// expression.
pub fn expected_default_forms(
    table: &str,
    column: &str,
    declaration: &ColumnDeclaration,
    naming: &NamingConfig,
) -> Option<Vec<String>> {
    if declaration.is_auto_increment() {
        return Some(vec![format!(
            "nextval('{}_{}_seq'::regclass)",
            table, column
        )]);
    }

    let default = declaration.default.as_ref()?;
    let literal = match default {
        wildebeest_schema::ColumnDefault::Function(_) => return None,
        wildebeest_schema::ColumnDefault::Literal(value) => value,
    };

    match literal {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(vec![b.to_string()]),
        JsonValue::Number(n) => Some(vec![n.to_string()]),
        JsonValue::String(s) => {
            let forms = match &declaration.column_type {
                ColumnType::Enum { .. } => vec![format!(
                    "'{}'::{}",
                    s,
                    naming.enum_type_name(table, column)
                )],
                ColumnType::Text => {
                    vec![format!("'{}'::text", s), format!("'{}'", s)]
                }
                ColumnType::VarChar(_) => {
                    vec![format!("'{}'::character varying", s), format!("'{}'", s)]
                }
                ColumnType::Uuid => {
                    vec![format!("'{}'::uuid", s), format!("'{}'", s)]
                }
                _ => vec![format!("'{}'", s)],
            };
            Some(forms)
        }
        composite => {
            let serialized = composite.to_string();
            let cast = match &declaration.column_type {
                ColumnType::JsonB => "jsonb",
                _ => "json",
            };
            Some(vec![
                format!("'{}'::{}", serialized, cast),
                format!("'{}'", serialized),
            ])
        }
    }
}

fn default_matches(catalog: Option<&str>, expected: &Option<Vec<String>>) -> bool {
    match expected {
        None => catalog.is_none(),
        Some(forms) => catalog
            .map(|value| forms.iter().any(|form| form == value))
            .unwrap_or(false),
    }
}

/// Type, nullability, and default checks for one declared column
pub fn check_column(
    table: &str,
    name: &str,
    declaration: &ColumnDeclaration,
    catalog: &CatalogColumn,
    naming: &NamingConfig,
) -> Vec<DriftError> {
    let mut errors = Vec::new();

    let expected_types = expected_data_types(&declaration.column_type);
    if !expected_types.contains(&catalog.data_type.as_str()) {
        errors.push(DriftError::new(
            table,
            format!(
                "column '{}' has catalog type '{}', declared '{}'",
                name,
                catalog.data_type,
                declaration.column_type.base_name()
            ),
        ));
    }

    if catalog.is_nullable != declaration.allow_null {
        let (catalog_word, declared_word) = if catalog.is_nullable {
            ("nullable", "NOT NULL")
        } else {
            ("NOT NULL", "nullable")
        };
        errors.push(DriftError::new(
            table,
            format!(
                "column '{}' is {} in the catalog but declared {}",
                name, catalog_word, declared_word
            ),
        ));
    }

    let expected = expected_default_forms(table, name, declaration, naming);
    if !default_matches(catalog.column_default.as_deref(), &expected) {
        errors.push(DriftError::new(
            table,
            format!(
                "column '{}' default mismatch: catalog {}, expected {}",
                name,
                catalog
                    .column_default
                    .as_deref()
                    .map(|d| format!("'{}'", d))
                    .unwrap_or_else(|| "none".to_string()),
                expected
                    .as_ref()
                    .map(|forms| forms.join(" or "))
                    .unwrap_or_else(|| "none".to_string()),
            ),
        ));
    }

    errors
}

/// Unique-constraint presence iff declared unique and not primary key
pub fn check_unique(
    table: &str,
    name: &str,
    declaration: &ColumnDeclaration,
    unique_constraints: &ConstraintColumns,
    naming: &NamingConfig,
) -> Vec<DriftError> {
    let mut errors = Vec::new();
    let should_be_unique = declaration.unique && !declaration.primary_key;
    let constraint_name = naming.unique_name(table, name);
    let present = unique_constraints.contains_key(name);

    if should_be_unique && !present {
        errors.push(DriftError::new(
            table,
            format!(
                "column '{}' declared unique but constraint '{}' is missing",
                name, constraint_name
            ),
        ));
    }

    if !should_be_unique && present {
        errors.push(DriftError::new(
            table,
            format!(
                "column '{}' carries a unique constraint but is not declared unique",
                name
            ),
        ));
    }

    errors
}

/// Primary-key constraint presence and naming iff declared primary key
pub fn check_primary_key(
    table: &str,
    name: &str,
    declaration: &ColumnDeclaration,
    primary_key_constraints: &ConstraintColumns,
    naming: &NamingConfig,
) -> Vec<DriftError> {
    let mut errors = Vec::new();
    let expected_name = naming.primary_key_name(table);

    match primary_key_constraints.get(name) {
        Some(constraints) if declaration.primary_key => {
            if !constraints.iter().any(|c| *c == expected_name) {
                errors.push(DriftError::new(
                    table,
                    format!(
                        "primary key on '{}' is named '{}', expected '{}'",
                        name,
                        constraints.join(", "),
                        expected_name
                    ),
                ));
            }
        }
        Some(_) => {
            errors.push(DriftError::new(
                table,
                format!(
                    "column '{}' is part of the primary key but not declared primary key",
                    name
                ),
            ));
        }
        None if declaration.primary_key => {
            errors.push(DriftError::new(
                table,
                format!(
                    "column '{}' declared primary key but constraint '{}' is missing",
                    name, expected_name
                ),
            ));
        }
        None => {}
    }

    errors
}

/// Enum value set equality, both directions
pub fn check_enum_values(
    table: &str,
    name: &str,
    declared: &[String],
    catalog: &[String],
) -> Vec<DriftError> {
    let mut errors = Vec::new();

    for value in declared {
        if !catalog.contains(value) {
            errors.push(DriftError::new(
                table,
                format!(
                    "enum column '{}' is missing value '{}' in the catalog",
                    name, value
                ),
            ));
        }
    }

    for value in catalog {
        if !declared.contains(value) {
            errors.push(DriftError::new(
                table,
                format!(
                    "enum column '{}' has extra catalog value '{}'",
                    name, value
                ),
            ));
        }
    }

    errors
}

/// Foreign-key presence and on-delete rule for an association column
pub fn check_foreign_key(
    table: &str,
    association: &BelongsTo,
    target_table: &str,
    foreign_keys: &[CatalogForeignKey],
    naming: &NamingConfig,
) -> Vec<DriftError> {
    let mut errors = Vec::new();
    let column = association.column.as_str();

    let Some(key) = foreign_keys.iter().find(|fk| fk.column == column) else {
        errors.push(DriftError::new(
            table,
            format!(
                "association column '{}' has no foreign key constraint '{}'",
                column,
                naming.foreign_key_name(table, column)
            ),
        ));
        return errors;
    };

    if key.foreign_table != target_table {
        errors.push(DriftError::new(
            table,
            format!(
                "foreign key on '{}' references '{}', declared target is '{}'",
                column, key.foreign_table, target_table
            ),
        ));
    }

    let expected_rule = association.on_delete.as_sql();
    if key.delete_rule != expected_rule {
        errors.push(DriftError::new(
            table,
            format!(
                "foreign key on '{}' has on-delete rule '{}', declared '{}'",
                column, key.delete_rule, expected_rule
            ),
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_column(data_type: &str, nullable: bool, default: Option<&str>) -> CatalogColumn {
        CatalogColumn {
            name: "col".to_string(),
            data_type: data_type.to_string(),
            udt_name: None,
            is_nullable: nullable,
            column_default: default.map(str::to_string),
        }
    }

    #[test]
    fn test_boolean_default_normalizes_to_catalog_string() {
        let declaration = ColumnDeclaration::new(ColumnType::Boolean)
            .default_value(serde_json::json!(true));
        let catalog = catalog_column("boolean", false, Some("true"));

        let errors = check_column("users", "active", &declaration, &catalog, &NamingConfig::default());
        assert!(errors.is_empty(), "unexpected drift: {:?}", errors);
    }

    #[test]
    fn test_enum_default_normalizes_to_typed_literal() {
        let declaration = ColumnDeclaration::new(ColumnType::Enum {
            values: vec!["ACTIVE".to_string(), "RETIRED".to_string()],
        })
        .default_value(serde_json::json!("ACTIVE"));
        let mut catalog = catalog_column("USER-DEFINED", false, Some("'ACTIVE'::enum_users_state"));
        catalog.udt_name = Some("enum_users_state".to_string());

        let errors = check_column("users", "state", &declaration, &catalog, &NamingConfig::default());
        assert!(errors.is_empty(), "unexpected drift: {:?}", errors);
    }

    #[test]
    fn test_numeric_default_stringifies() {
        let declaration =
            ColumnDeclaration::new(ColumnType::Integer).default_value(serde_json::json!(0));
        let catalog = catalog_column("integer", false, Some("0"));

        let errors = check_column("users", "score", &declaration, &catalog, &NamingConfig::default());
        assert!(errors.is_empty(), "unexpected drift: {:?}", errors);
    }

    #[test]
    fn test_json_default_compares_serialized() {
        let declaration = ColumnDeclaration::new(ColumnType::JsonB)
            .default_value(serde_json::json!({"role": "member"}));
        let catalog = catalog_column("jsonb", false, Some("'{\"role\":\"member\"}'::jsonb"));

        let errors =
            check_column("users", "settings", &declaration, &catalog, &NamingConfig::default());
        assert!(errors.is_empty(), "unexpected drift: {:?}", errors);
    }

    #[test]
    fn test_function_default_compares_as_absent() {
        let declaration =
            ColumnDeclaration::new(ColumnType::Uuid).default_fn("generated in application code");

        let clean = catalog_column("uuid", false, None);
        assert!(check_column("users", "id", &declaration, &clean, &NamingConfig::default()).is_empty());

        let drifted = catalog_column("uuid", false, Some("gen_random_uuid()"));
        let errors = check_column("users", "id", &declaration, &drifted, &NamingConfig::default());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("default mismatch"));
    }

    #[test]
    fn test_serial_expects_sequence_expression() {
        let declaration = ColumnDeclaration::new(ColumnType::Serial).primary_key();
        let catalog = catalog_column(
            "integer",
            false,
            Some("nextval('users_id_seq'::regclass)"),
        );

        let errors = check_column("users", "id", &declaration, &catalog, &NamingConfig::default());
        assert!(errors.is_empty(), "unexpected drift: {:?}", errors);
    }

    #[test]
    fn test_type_mismatch_reported() {
        let declaration = ColumnDeclaration::new(ColumnType::Boolean);
        let catalog = catalog_column("text", false, None);

        let errors = check_column("users", "active", &declaration, &catalog, &NamingConfig::default());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("catalog type 'text'"));
        assert!(errors[0].message.contains("declared 'boolean'"));
    }

    #[test]
    fn test_nullability_mismatch_reported_both_ways() {
        let not_null = ColumnDeclaration::new(ColumnType::Text);
        let errors = check_column(
            "users",
            "email",
            &not_null,
            &catalog_column("text", true, None),
            &NamingConfig::default(),
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("nullable in the catalog"));

        let nullable = ColumnDeclaration::new(ColumnType::Text).nullable();
        let errors = check_column(
            "users",
            "email",
            &nullable,
            &catalog_column("text", false, None),
            &NamingConfig::default(),
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("NOT NULL in the catalog"));
    }

    #[test]
    fn test_unique_checked_in_both_directions() {
        let naming = NamingConfig::default();
        let mut constraints = ConstraintColumns::new();
        constraints.insert("email".to_string(), vec!["users_email_key".to_string()]);

        let declared_unique = ColumnDeclaration::new(ColumnType::Text).unique();
        assert!(check_unique("users", "email", &declared_unique, &constraints, &naming).is_empty());

        let missing = check_unique("users", "email", &declared_unique, &ConstraintColumns::new(), &naming);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].message.contains("users_email_key"));

        let not_declared = ColumnDeclaration::new(ColumnType::Text);
        let extra = check_unique("users", "email", &not_declared, &constraints, &naming);
        assert_eq!(extra.len(), 1);
        assert!(extra[0].message.contains("not declared unique"));
    }

    #[test]
    fn test_primary_key_presence_and_naming() {
        let naming = NamingConfig::default();
        let declaration = ColumnDeclaration::new(ColumnType::Serial).primary_key();

        let mut constraints = ConstraintColumns::new();
        constraints.insert("id".to_string(), vec!["users_pkey".to_string()]);
        assert!(check_primary_key("users", "id", &declaration, &constraints, &naming).is_empty());

        let missing =
            check_primary_key("users", "id", &declaration, &ConstraintColumns::new(), &naming);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].message.contains("users_pkey"));

        let mut misnamed = ConstraintColumns::new();
        misnamed.insert("id".to_string(), vec!["pk_users".to_string()]);
        let errors = check_primary_key("users", "id", &declaration, &misnamed, &naming);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("expected 'users_pkey'"));
    }

    #[test]
    fn test_enum_set_equality_reports_both_directions() {
        let declared = vec!["ACTIVE".to_string(), "RETIRED".to_string()];
        let catalog = vec!["ACTIVE".to_string(), "SUSPENDED".to_string()];

        let errors = check_enum_values("users", "state", &declared, &catalog);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.message.contains("missing value 'RETIRED'")));
        assert!(errors.iter().any(|e| e.message.contains("extra catalog value 'SUSPENDED'")));
    }

    #[test]
    fn test_foreign_key_delete_rule() {
        use wildebeest_schema::OnDelete;
        let naming = NamingConfig::default();
        let association = BelongsTo::new("User", "user_id").on_delete(OnDelete::Cascade);

        let keys = vec![CatalogForeignKey {
            constraint_name: "posts_user_id_fkey".to_string(),
            column: "user_id".to_string(),
            foreign_table: "users".to_string(),
            delete_rule: "CASCADE".to_string(),
        }];
        assert!(check_foreign_key("posts", &association, "users", &keys, &naming).is_empty());

        let wrong_rule = vec![CatalogForeignKey {
            delete_rule: "NO ACTION".to_string(),
            ..keys[0].clone()
        }];
        let errors = check_foreign_key("posts", &association, "users", &wrong_rule, &naming);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("'NO ACTION'"));

        let missing = check_foreign_key("posts", &association, "users", &[], &naming);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].message.contains("posts_user_id_fkey"));
    }
}
