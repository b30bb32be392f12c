//! Wildebeest Schema - declared database schema definitions
//!
//! This crate holds the value objects an embedding application uses to
//! declare its schema: per-entity table and column definitions, association
//! metadata, and index declarations, plus the typed registry that resolves
//! entity references once at startup.
//!
//! The declarations carry no behavior of their own. The `wildebeest` engine
//! consumes them read-only to drive migrations and to diff the declared
//! schema against the live database catalog.
//!
//! # Example
//!
//! ```rust
//! use wildebeest_schema::{
//!     BelongsTo, ColumnDeclaration, ColumnType, ModelDeclaration, ModelRegistry, OnDelete,
//! };
//!
//! let user = ModelDeclaration::new("User", "users")
//!     .column("id", ColumnDeclaration::new(ColumnType::Serial).primary_key())
//!     .column("email", ColumnDeclaration::new(ColumnType::Text).unique())
//!     .has_many("Post");
//!
//! let post = ModelDeclaration::new("Post", "posts")
//!     .column("id", ColumnDeclaration::new(ColumnType::Serial).primary_key())
//!     .column("user_id", ColumnDeclaration::new(ColumnType::Integer))
//!     .belongs_to(BelongsTo::new("User", "user_id").on_delete(OnDelete::Cascade));
//!
//! let registry = ModelRegistry::resolve([user, post]).unwrap();
//! assert!(registry.get("User").is_some());
//! ```

use thiserror::Error;

pub mod registry;
pub mod types;

pub use registry::ModelRegistry;
pub use types::*;

/// Schema declaration errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Duplicate entity declared: {0}")]
    DuplicateEntity(String),

    #[error("Unknown entity '{entity}' referenced by '{referenced_by}'")]
    UnknownEntity {
        entity: String,
        referenced_by: String,
    },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
