//! Wildebeest façade
//!
//! The explicitly constructed coordinator that wires catalog, lock, runner,
//! snapshots, and sync checker together. Nothing in the engine lives in
//! module-level state: several instances with different pools, model sets,
//! or configurations can coexist in one process, and tests run isolated.

use crate::catalog::{Migration, MigrationCatalog};
use crate::config::WildebeestConfig;
use crate::error::Result;
use crate::lock::MigrationLock;
use crate::runner::{MigrationRecord, MigrationRunner};
use crate::snapshot::SnapshotRegistry;
use crate::sync::{DriftError, SchemaSyncChecker};
use sqlx::PgPool;
use std::sync::Arc;
use wildebeest_schema::{ModelDeclaration, ModelRegistry};

/// The migration coordination engine
pub struct Wildebeest {
    config: Arc<WildebeestConfig>,
    pool: PgPool,
    registry: Arc<ModelRegistry>,
    catalog: Arc<MigrationCatalog>,
    lock: Arc<MigrationLock>,
    checker: Arc<SchemaSyncChecker>,
    runner: MigrationRunner,
}

impl Wildebeest {
    pub fn builder() -> WildebeestBuilder {
        WildebeestBuilder::new()
    }

    /// Bring the instance to a ready state
    ///
    /// Optionally clears a stale lock, bootstraps genesis on first run (or
    /// waits for another instance to), and migrates to the catalog head.
    pub async fn boot(&self) -> Result<()> {
        log::info!(
            "booting wildebeest ({} models, {} migrations, env {})",
            self.registry.len(),
            self.catalog.len(),
            self.config.environment.as_str()
        );

        if self.config.runner.force_unlock_on_boot {
            self.lock.force_unlock().await?;
        }

        self.runner.setup().await?;
        self.runner.migrate().await
    }

    /// Migrate forward to the catalog head
    pub async fn migrate(&self) -> Result<()> {
        self.runner.migrate().await
    }

    /// Migrate forward until the watermark reaches `target`
    pub async fn migrate_up_to(&self, target: u32) -> Result<()> {
        self.runner.up_to(target).await
    }

    /// Roll back until the watermark reaches `target`
    pub async fn migrate_down_to(&self, target: u32) -> Result<()> {
        self.runner.down_to(target).await
    }

    /// Drop the schema and re-bootstrap from genesis (test environments)
    pub async fn wipe(&self) -> Result<()> {
        self.runner.wipe().await
    }

    /// Round-trip migration self-test
    pub async fn self_test(&self) -> Result<()> {
        self.runner.test().await
    }

    /// Run the drift detector once, returning every mismatch
    pub async fn check_sync(&self) -> Vec<DriftError> {
        self.checker.check_all().await
    }

    /// Whether the live schema matches the declarations exactly
    pub async fn is_synced(&self) -> bool {
        self.checker.is_synced().await
    }

    /// Release the migration lock regardless of holder
    pub async fn force_unlock(&self) -> Result<()> {
        self.lock.force_unlock().await
    }

    /// Sequence number of the newest applied migration
    pub async fn watermark(&self) -> Result<Option<u32>> {
        self.runner.watermark().await
    }

    /// Applied migration records, newest first
    pub async fn history(&self) -> Result<Vec<MigrationRecord>> {
        self.runner.history().await
    }

    pub fn config(&self) -> &WildebeestConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Builder assembling a [`Wildebeest`] instance
#[derive(Default)]
pub struct WildebeestBuilder {
    config: WildebeestConfig,
    models: Vec<ModelDeclaration>,
    migrations: Vec<Arc<dyn Migration>>,
    snapshots: SnapshotRegistry,
}

impl WildebeestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: WildebeestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(mut self, model: ModelDeclaration) -> Self {
        self.models.push(model);
        self
    }

    pub fn models<I>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = ModelDeclaration>,
    {
        self.models.extend(models);
        self
    }

    pub fn migration(mut self, migration: Arc<dyn Migration>) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn migrations<I>(mut self, migrations: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Migration>>,
    {
        self.migrations.extend(migrations);
        self
    }

    pub fn snapshot(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.snapshots.register(name, sql);
        self
    }

    /// Resolve declarations and index migrations against the given pool
    ///
    /// All fatal startup conditions surface here, before any lock is
    /// attempted: unknown entity references, non-contiguous migration
    /// numbering, and a missing genesis snapshot.
    pub fn build(self, pool: PgPool) -> Result<Wildebeest> {
        let config = Arc::new(self.config);

        let registry = Arc::new(ModelRegistry::resolve(self.models)?);
        let catalog = Arc::new(MigrationCatalog::index(
            self.migrations,
            config.runner.bottom_sequence,
        )?);
        let snapshots = Arc::new(self.snapshots);
        snapshots.require(&config.runner.genesis_snapshot)?;

        let lock = Arc::new(MigrationLock::postgres(pool.clone(), &config.lock));

        let internal_tables = vec![
            config.runner.migrations_table.clone(),
            config.lock.table.clone(),
        ];
        let checker = Arc::new(SchemaSyncChecker::new(
            pool.clone(),
            registry.clone(),
            config.naming.clone(),
            config.sync.clone(),
            internal_tables,
        ));

        let runner = MigrationRunner::new(
            pool.clone(),
            catalog.clone(),
            lock.clone(),
            snapshots.clone(),
            config.runner.clone(),
            config.batch.clone(),
            config.sync.clone(),
            Some(checker.clone()),
        );

        Ok(Wildebeest {
            config,
            pool,
            registry,
            catalog,
            lock,
            checker,
            runner,
        })
    }
}
