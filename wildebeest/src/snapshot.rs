//! Bootstrap snapshots
//!
//! A snapshot is a named SQL script restoring a known-good schema state,
//! including the migration-history and lock tables with the lock row
//! unlocked. Genesis bootstrap restores one before the first migration
//! runs; its absence is a startup failure, not a check-time surprise.

use crate::error::{Error, Result};
use indexmap::IndexMap;

/// Registry of restorable schema snapshots, keyed by name
#[derive(Debug, Clone, Default)]
pub struct SnapshotRegistry {
    snapshots: IndexMap<String, String>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a snapshot script under a name
    pub fn register(&mut self, name: impl Into<String>, sql: impl Into<String>) {
        let name = name.into();
        if self.snapshots.insert(name.clone(), sql.into()).is_some() {
            log::warn!("snapshot '{}' registered twice, keeping the newer script", name);
        }
    }

    /// Look up a snapshot script
    pub fn get(&self, name: &str) -> Option<&str> {
        self.snapshots.get(name).map(String::as_str)
    }

    /// Look up a snapshot script, failing fast when missing
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::SnapshotMissing(name.to_string()))
    }

    /// Registered snapshot names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.snapshots.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_missing_snapshot_fails() {
        let registry = SnapshotRegistry::new();
        let err = registry.require("genesis").unwrap_err();
        assert!(matches!(err, Error::SnapshotMissing(ref name) if name == "genesis"));
    }

    #[test]
    fn test_register_and_require() {
        let mut registry = SnapshotRegistry::new();
        registry.register("genesis", "CREATE TABLE wildebeest_lock (is_locked BOOLEAN)");
        assert!(registry.require("genesis").unwrap().contains("wildebeest_lock"));
    }
}
