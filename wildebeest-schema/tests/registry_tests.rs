//! Tests for the model registry module

use wildebeest_schema::{
    BelongsTo, ColumnDeclaration, ColumnType, ModelDeclaration, ModelRegistry, OnDelete,
    SchemaError,
};

/// Helper function to create a minimal declaration with a serial primary key
fn create_basic_model(entity: &str, table: &str) -> ModelDeclaration {
    ModelDeclaration::new(entity, table)
        .column("id", ColumnDeclaration::new(ColumnType::Serial).primary_key())
}

#[test]
fn test_resolve_basic_models() {
    let user = create_basic_model("User", "users").has_many("Post");
    let post = create_basic_model("Post", "posts")
        .column("user_id", ColumnDeclaration::new(ColumnType::Integer))
        .belongs_to(BelongsTo::new("User", "user_id"));

    let registry = ModelRegistry::resolve([user, post]).unwrap();
    assert_eq!(registry.len(), 2);
    assert!(registry.get("User").is_some());
    assert!(registry.get("Missing").is_none());
}

#[test]
fn test_resolve_rejects_unknown_entity() {
    let post = create_basic_model("Post", "posts")
        .column("user_id", ColumnDeclaration::new(ColumnType::Integer))
        .belongs_to(BelongsTo::new("User", "user_id"));

    let result = ModelRegistry::resolve([post]);
    match result {
        Err(SchemaError::UnknownEntity {
            entity,
            referenced_by,
        }) => {
            assert_eq!(entity, "User");
            assert_eq!(referenced_by, "Post");
        }
        other => panic!("expected UnknownEntity, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_resolve_rejects_unknown_through_entity() {
    let user = create_basic_model("User", "users").belongs_to_many("Role", "UserRole");
    let role = create_basic_model("Role", "roles").belongs_to_many("User", "UserRole");

    let result = ModelRegistry::resolve([user, role]);
    assert!(matches!(
        result,
        Err(SchemaError::UnknownEntity { ref entity, .. }) if entity == "UserRole"
    ));
}

#[test]
fn test_resolve_rejects_duplicate_entity() {
    let first = create_basic_model("User", "users");
    let second = create_basic_model("User", "users_v2");

    let result = ModelRegistry::resolve([first, second]);
    assert!(matches!(result, Err(SchemaError::DuplicateEntity(ref e)) if e == "User"));
}

#[test]
fn test_find_by_table() {
    let user = create_basic_model("User", "users");
    let registry = ModelRegistry::resolve([user]).unwrap();

    assert_eq!(registry.find_by_table("users").unwrap().entity, "User");
    assert!(registry.find_by_table("posts").is_none());
}

#[test]
fn test_require_reports_referrer() {
    let user = create_basic_model("User", "users");
    let registry = ModelRegistry::resolve([user]).unwrap();

    let err = registry.require("Account", "SyncCheck").unwrap_err();
    assert!(err.to_string().contains("Account"));
    assert!(err.to_string().contains("SyncCheck"));
}

#[test]
fn test_reciprocal_counting() {
    let user = create_basic_model("User", "users")
        .has_many("Post")
        .has_one("Profile");

    assert_eq!(user.reciprocals_toward("Post"), (0, 1));
    assert_eq!(user.reciprocals_toward("Profile"), (1, 0));
    assert_eq!(user.reciprocals_toward("Comment"), (0, 0));
}

#[test]
fn test_belongs_to_lookup_by_column() {
    let post = create_basic_model("Post", "posts")
        .column("author_id", ColumnDeclaration::new(ColumnType::Integer))
        .belongs_to(BelongsTo::new("User", "author_id").on_delete(OnDelete::SetNull));

    let user = create_basic_model("User", "users").has_many("Post");

    let registry = ModelRegistry::resolve([post, user]).unwrap();
    let post = registry.get("Post").unwrap();

    let assoc = post.belongs_to_on_column("author_id").unwrap();
    assert_eq!(assoc.entity, "User");
    assert_eq!(assoc.on_delete.as_sql(), "SET NULL");
    assert!(post.belongs_to_on_column("id").is_none());
}

#[test]
fn test_declaration_round_trips_through_json() {
    let post = create_basic_model("Post", "posts")
        .column(
            "state",
            ColumnDeclaration::new(ColumnType::Enum {
                values: vec!["DRAFT".to_string(), "PUBLISHED".to_string()],
            })
            .default_value(serde_json::json!("DRAFT")),
        )
        .belongs_to(BelongsTo::new("Post", "parent_id").exempt_reciprocal());

    let json = serde_json::to_string(&post).unwrap();
    let back: ModelDeclaration = serde_json::from_str(&json).unwrap();

    assert_eq!(back.entity, "Post");
    let state = &back.columns["state"];
    assert_eq!(
        state.column_type.enum_values().unwrap(),
        &["DRAFT".to_string(), "PUBLISHED".to_string()]
    );
    assert!(back.associations.belongs_to[0].exempt_reciprocal);
}
