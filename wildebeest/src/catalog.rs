//! Migration catalog
//!
//! Indexes the migrations an application declares into a dense, ordered
//! sequence. Later stages resolve migrations by sequence number, so density
//! is a hard precondition: a gap or duplicate in the numbering aborts
//! startup before any lock is attempted.

use crate::error::{Error, Result};
use crate::query::TransactionHelpers;
use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Identifier pattern: four-digit zero-padded sequence, dash, name
static MIGRATION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-([\w-]+)$").expect("invalid migration id pattern"));

/// One declared migration
///
/// Both directions receive helpers bound to the migration's own transaction;
/// success commits every effect of that direction, any error rolls all of it
/// back.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Identifier matching `NNNN-name`, e.g. `0007-add-account-flags`
    fn id(&self) -> &str;

    /// Apply the migration
    async fn up(&self, db: &mut TransactionHelpers) -> Result<()>;

    /// Revert the migration
    async fn down(&self, db: &mut TransactionHelpers) -> Result<()>;
}

/// Parse a migration identifier into (sequence, name)
pub fn parse_migration_id(id: &str) -> Option<(u32, &str)> {
    let captures = MIGRATION_ID.captures(id)?;
    let sequence: u32 = captures.get(1)?.as_str().parse().ok()?;
    let name = captures.get(2)?.as_str();
    Some((sequence, name))
}

/// Ordered, gap-free index of declared migrations
pub struct MigrationCatalog {
    migrations: IndexMap<u32, Arc<dyn Migration>>,
    bottom: u32,
}

impl MigrationCatalog {
    /// Index a set of migrations, enforcing dense numbering from `bottom_sequence`
    pub fn index(
        migrations: Vec<Arc<dyn Migration>>,
        bottom_sequence: u32,
    ) -> Result<Self> {
        let mut by_sequence: Vec<(u32, Arc<dyn Migration>)> = Vec::with_capacity(migrations.len());

        for migration in migrations {
            let id = migration.id().to_string();
            let (sequence, _name) = parse_migration_id(&id).ok_or_else(|| {
                Error::catalog(format!(
                    "Migration id '{}' does not match the NNNN-name pattern",
                    id
                ))
            })?;

            if by_sequence.iter().any(|(s, _)| *s == sequence) {
                return Err(Error::catalog(format!(
                    "Duplicate migration sequence number {:04}",
                    sequence
                )));
            }

            by_sequence.push((sequence, migration));
        }

        by_sequence.sort_by_key(|(sequence, _)| *sequence);

        for (position, (sequence, migration)) in by_sequence.iter().enumerate() {
            let expected = bottom_sequence + position as u32;
            if *sequence != expected {
                return Err(Error::catalog(format!(
                    "Migration numbering is not contiguous: expected {:04}, found {:04} ('{}')",
                    expected,
                    sequence,
                    migration.id()
                )));
            }
        }

        Ok(Self {
            migrations: by_sequence.into_iter().collect(),
            bottom: bottom_sequence,
        })
    }

    /// Look up a migration by sequence number
    pub fn get(&self, sequence: u32) -> Option<&Arc<dyn Migration>> {
        self.migrations.get(&sequence)
    }

    /// Migrations in ascending sequence order
    pub fn forward(&self) -> impl Iterator<Item = (u32, &Arc<dyn Migration>)> {
        self.migrations.iter().map(|(s, m)| (*s, m))
    }

    /// Migrations in descending sequence order
    pub fn reverse(&self) -> impl Iterator<Item = (u32, &Arc<dyn Migration>)> {
        self.migrations.iter().rev().map(|(s, m)| (*s, m))
    }

    /// Lowest declared sequence number
    pub fn bottom(&self) -> u32 {
        self.bottom
    }

    /// Highest declared sequence number, if any migrations exist
    pub fn head(&self) -> Option<u32> {
        self.migrations.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}
