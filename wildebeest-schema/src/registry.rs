//! Typed model registry
//!
//! Association targets are referenced by entity name in declarations. The
//! registry resolves every reference once at construction time so that a
//! dangling name surfaces as a typed error instead of a check-time failure.

use crate::types::ModelDeclaration;
use crate::{Result, SchemaError};
use indexmap::IndexMap;

/// Registry of resolved model declarations, keyed by entity name
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelDeclaration>,
}

impl ModelRegistry {
    /// Resolve a set of declarations into a registry
    ///
    /// Fails on duplicate entity names and on any association referencing an
    /// entity that is not part of the set.
    pub fn resolve<I>(declarations: I) -> Result<Self>
    where
        I: IntoIterator<Item = ModelDeclaration>,
    {
        let mut models: IndexMap<String, ModelDeclaration> = IndexMap::new();

        for declaration in declarations {
            if models.contains_key(&declaration.entity) {
                return Err(SchemaError::DuplicateEntity(declaration.entity));
            }
            models.insert(declaration.entity.clone(), declaration);
        }

        // Every association target must resolve before any checker runs
        for model in models.values() {
            for reference in model_references(model) {
                if !models.contains_key(reference) {
                    return Err(SchemaError::UnknownEntity {
                        entity: reference.to_string(),
                        referenced_by: model.entity.clone(),
                    });
                }
            }
        }

        Ok(Self { models })
    }

    /// Look up a declaration by entity name
    pub fn get(&self, entity: &str) -> Option<&ModelDeclaration> {
        self.models.get(entity)
    }

    /// Look up a declaration by entity name, failing with a typed error
    pub fn require(&self, entity: &str, referenced_by: &str) -> Result<&ModelDeclaration> {
        self.models.get(entity).ok_or_else(|| SchemaError::UnknownEntity {
            entity: entity.to_string(),
            referenced_by: referenced_by.to_string(),
        })
    }

    /// Find a declaration by database table name
    pub fn find_by_table(&self, table: &str) -> Option<&ModelDeclaration> {
        self.models.values().find(|m| m.table == table)
    }

    /// All declarations, in registration order
    pub fn models(&self) -> impl Iterator<Item = &ModelDeclaration> {
        self.models.values()
    }

    /// All declared database table names
    pub fn table_names(&self) -> Vec<&str> {
        self.models.values().map(|m| m.table.as_str()).collect()
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// All entity names a declaration refers to
fn model_references(model: &ModelDeclaration) -> impl Iterator<Item = &str> {
    let assoc = &model.associations;
    assoc
        .belongs_to
        .iter()
        .map(|a| a.entity.as_str())
        .chain(assoc.has_one.iter().map(|a| a.entity.as_str()))
        .chain(assoc.has_many.iter().map(|a| a.entity.as_str()))
        .chain(
            assoc
                .belongs_to_many
                .iter()
                .flat_map(|a| [a.entity.as_str(), a.through.as_str()]),
        )
}
