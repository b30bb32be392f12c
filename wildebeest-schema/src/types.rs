//! Declared schema type definitions

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Model declaration for one logical entity
///
/// Supplied by the embedding application and consumed read-only by the
/// migration runner and the schema-sync checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDeclaration {
    /// Logical entity name (registry key)
    pub entity: String,

    /// Database table name
    pub table: String,

    /// Column declarations, in declaration order
    #[serde(default)]
    pub columns: IndexMap<String, ColumnDeclaration>,

    /// Association declarations
    #[serde(default)]
    pub associations: Associations,

    /// Multi-column index declarations
    #[serde(default)]
    pub indexes: Vec<IndexDeclaration>,

    /// Marks a many-to-many join entity (expected to carry >= 2 belongs_to)
    #[serde(default)]
    pub join_table: bool,
}

impl ModelDeclaration {
    /// Create an empty declaration for an entity backed by `table`
    pub fn new(entity: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            columns: IndexMap::new(),
            associations: Associations::default(),
            indexes: Vec::new(),
            join_table: false,
        }
    }

    /// Add a column declaration
    pub fn column(mut self, name: impl Into<String>, column: ColumnDeclaration) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    /// Add an index declaration
    pub fn index(mut self, index: IndexDeclaration) -> Self {
        self.indexes.push(index);
        self
    }

    /// Mark this entity as a many-to-many join table
    pub fn join_table(mut self) -> Self {
        self.join_table = true;
        self
    }

    /// Add a belongs_to association
    pub fn belongs_to(mut self, association: BelongsTo) -> Self {
        self.associations.belongs_to.push(association);
        self
    }

    /// Add a has_one association
    pub fn has_one(mut self, entity: impl Into<String>) -> Self {
        self.associations.has_one.push(HasOne {
            entity: entity.into(),
        });
        self
    }

    /// Add a has_many association
    pub fn has_many(mut self, entity: impl Into<String>) -> Self {
        self.associations.has_many.push(HasMany {
            entity: entity.into(),
        });
        self
    }

    /// Add a belongs_to_many association
    pub fn belongs_to_many(
        mut self,
        entity: impl Into<String>,
        through: impl Into<String>,
    ) -> Self {
        self.associations.belongs_to_many.push(BelongsToMany {
            entity: entity.into(),
            through: through.into(),
        });
        self
    }

    /// Find the belongs_to association declared on `column`, if any
    pub fn belongs_to_on_column(&self, column: &str) -> Option<&BelongsTo> {
        self.associations
            .belongs_to
            .iter()
            .find(|assoc| assoc.column == column)
    }

    /// Count the reciprocal declarations this model carries toward `entity`
    ///
    /// Returns `(has_one_count, has_many_count)`.
    pub fn reciprocals_toward(&self, entity: &str) -> (usize, usize) {
        let has_one = self
            .associations
            .has_one
            .iter()
            .filter(|a| a.entity == entity)
            .count();
        let has_many = self
            .associations
            .has_many
            .iter()
            .filter(|a| a.entity == entity)
            .count();
        (has_one, has_many)
    }

    /// Whether this model declares a belongs_to_many toward `entity`
    pub fn declares_belongs_to_many(&self, entity: &str) -> bool {
        self.associations
            .belongs_to_many
            .iter()
            .any(|a| a.entity == entity)
    }
}

/// Column declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDeclaration {
    /// Declared column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Whether NULL is allowed
    #[serde(default)]
    pub allow_null: bool,

    /// Declared default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ColumnDefault>,

    /// Unique constraint
    #[serde(default)]
    pub unique: bool,

    /// Primary key flag
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDeclaration {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            allow_null: false,
            default: None,
            unique: false,
            primary_key: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Set a literal default value
    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = Some(ColumnDefault::Literal(value));
        self
    }

    /// Set a function-valued default (computed at insert time, not in the catalog)
    pub fn default_fn(mut self, description: impl Into<String>) -> Self {
        self.default = Some(ColumnDefault::Function(description.into()));
        self
    }

    /// Whether the column is auto-incremented by a database sequence
    pub fn is_auto_increment(&self) -> bool {
        matches!(self.column_type, ColumnType::Serial | ColumnType::BigSerial)
    }
}

/// Declared column types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Float,
    Text,
    VarChar(u32),
    Uuid,
    Timestamp,
    Date,
    Json,
    JsonB,
    Serial,
    BigSerial,
    Enum { values: Vec<String> },
}

impl ColumnType {
    /// Base type name for messages
    pub fn base_name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::VarChar(_) => "varchar",
            ColumnType::Uuid => "uuid",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Date => "date",
            ColumnType::Json => "json",
            ColumnType::JsonB => "jsonb",
            ColumnType::Serial => "serial",
            ColumnType::BigSerial => "bigserial",
            ColumnType::Enum { .. } => "enum",
        }
    }

    /// Enum value set, when the column is enum-typed
    pub fn enum_values(&self) -> Option<&[String]> {
        match self {
            ColumnType::Enum { values } => Some(values),
            _ => None,
        }
    }
}

/// Declared default value
///
/// Function defaults are computed by the application at write time; they have
/// no catalog counterpart and compare as absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnDefault {
    Literal(serde_json::Value),
    Function(String),
}

/// Association declarations for one model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Associations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub belongs_to: Vec<BelongsTo>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has_one: Vec<HasOne>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has_many: Vec<HasMany>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub belongs_to_many: Vec<BelongsToMany>,
}

/// Belongs-to association: this model's table carries the join column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BelongsTo {
    /// Associated entity name
    pub entity: String,

    /// Join column on this model's table
    pub column: String,

    /// Foreign-key delete rule expected in the catalog
    #[serde(default)]
    pub on_delete: OnDelete,

    /// Skip the reciprocal-association requirement for this association
    #[serde(default)]
    pub exempt_reciprocal: bool,
}

impl BelongsTo {
    pub fn new(entity: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            column: column.into(),
            on_delete: OnDelete::default(),
            exempt_reciprocal: false,
        }
    }

    pub fn on_delete(mut self, rule: OnDelete) -> Self {
        self.on_delete = rule;
        self
    }

    pub fn exempt_reciprocal(mut self) -> Self {
        self.exempt_reciprocal = true;
        self
    }
}

/// Has-one association
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasOne {
    pub entity: String,
}

/// Has-many association
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasMany {
    pub entity: String,
}

/// Many-to-many association through a join entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BelongsToMany {
    pub entity: String,
    pub through: String,
}

/// Foreign-key delete rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    Cascade,
    SetNull,
    Restrict,
    #[default]
    NoAction,
}

impl OnDelete {
    /// Catalog form of the rule, as reported by referential_constraints.delete_rule
    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::NoAction => "NO ACTION",
        }
    }
}

/// Multi-column index declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDeclaration {
    pub columns: Vec<String>,

    #[serde(default)]
    pub unique: bool,

    /// Override for the generated index name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IndexDeclaration {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            name: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
