//! Migration runner
//!
//! Orchestrates genesis bootstrap, forward migration, targeted rollback,
//! teardown, and the round-trip self-test. Every mutating flow runs inside
//! [`MigrationLock::run_with_lock`]; the migration-history table is only
//! ever written by the lock holder.

use crate::catalog::MigrationCatalog;
use crate::config::{BatchConfig, RunnerConfig, SyncConfig};
use crate::error::{Error, Result};
use crate::lock::MigrationLock;
use crate::query::TransactionHelpers;
use crate::snapshot::SnapshotRegistry;
use crate::sync::SchemaSyncChecker;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// One row of the migration-history table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    /// Applied migration's sequence number
    pub sequence: i32,
    /// Full migration identifier, e.g. `0003-add-account-flags`
    pub name: String,
    /// Monotonic group id shared by migrations applied in one run
    pub batch: i32,
    pub created_at: DateTime<Utc>,
}

/// Migration sequence numbers to apply when moving the watermark up to `target`
pub(crate) fn pending_up(catalog: &MigrationCatalog, watermark: Option<u32>, target: u32) -> Vec<u32> {
    catalog
        .forward()
        .map(|(sequence, _)| sequence)
        .filter(|sequence| watermark.map(|w| *sequence > w).unwrap_or(true) && *sequence <= target)
        .collect()
}

/// Migration sequence numbers to roll back when moving the watermark down to `target`
pub(crate) fn pending_down(
    catalog: &MigrationCatalog,
    watermark: Option<u32>,
    target: u32,
) -> Vec<u32> {
    let Some(watermark) = watermark else {
        return Vec::new();
    };
    catalog
        .reverse()
        .map(|(sequence, _)| sequence)
        .filter(|sequence| *sequence <= watermark && *sequence > target)
        .collect()
}

/// The migration orchestrator
pub struct MigrationRunner {
    pool: PgPool,
    catalog: Arc<MigrationCatalog>,
    lock: Arc<MigrationLock>,
    snapshots: Arc<SnapshotRegistry>,
    config: RunnerConfig,
    batch: BatchConfig,
    sync: SyncConfig,
    checker: Option<Arc<SchemaSyncChecker>>,
}

impl MigrationRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        catalog: Arc<MigrationCatalog>,
        lock: Arc<MigrationLock>,
        snapshots: Arc<SnapshotRegistry>,
        config: RunnerConfig,
        batch: BatchConfig,
        sync: SyncConfig,
        checker: Option<Arc<SchemaSyncChecker>>,
    ) -> Self {
        Self {
            pool,
            catalog,
            lock,
            snapshots,
            config,
            batch,
            sync,
            checker,
        }
    }

    /// Idempotent first-run bootstrap
    ///
    /// The designated bootstrapper restores the genesis snapshot and applies
    /// the first migration when the history table is missing. An instance in
    /// `wait_for_migration` mode never bootstraps; it polls until another
    /// instance has brought the schema to the catalog head.
    pub async fn setup(&self) -> Result<()> {
        // Fail fast before any lock when the snapshot is unavailable
        self.snapshots.require(&self.config.genesis_snapshot)?;

        if self.config.wait_for_migration {
            return self.wait_for_external_bootstrap().await;
        }

        if self.is_bootstrapped().await? {
            return Ok(());
        }

        log::info!(
            "migration history table missing, bootstrapping from snapshot '{}'",
            self.config.genesis_snapshot
        );

        let (_, elapsed) = self
            .lock
            .run_with_lock(async {
                // Another instance may have bootstrapped while this one was
                // waiting on the lock
                if self.is_bootstrapped().await? {
                    return Ok(());
                }
                self.restore_genesis().await?;
                if self.catalog.get(self.catalog.bottom()).is_some() {
                    let batch = self.next_batch_number().await?;
                    self.apply_one_up(self.catalog.bottom(), batch).await?;
                }
                Ok(())
            })
            .await?;

        log::info!("genesis bootstrap completed in {:?}", elapsed);
        self.after_unlock().await
    }

    /// Bring the schema to the catalog head
    ///
    /// Fast-path no-op when the newest history record already matches the
    /// head, so process start does not contend on the lock. A transiently
    /// failing run is re-invoked once before giving up.
    pub async fn migrate(&self) -> Result<()> {
        let Some(head) = self.catalog.head() else {
            return Ok(());
        };

        if self.watermark().await? == Some(head) {
            log::debug!("schema already at migration {:04}, nothing to do", head);
            return Ok(());
        }

        crate::error::with_retry(crate::error::RetryPolicy::once_more(), || {
            self.locked_up_to(head)
        })
        .await
    }

    /// Apply migrations forward until the watermark reaches `target`
    pub async fn up_to(&self, target: u32) -> Result<()> {
        self.validate_target(target)?;
        self.locked_up_to(target).await
    }

    /// Roll migrations back until the watermark reaches `target`
    pub async fn down_to(&self, target: u32) -> Result<()> {
        if target != self.catalog.bottom().saturating_sub(1) {
            self.validate_target(target)?;
        }

        let (_, elapsed) = self
            .lock
            .run_with_lock(self.apply_down_to(target))
            .await?;
        log::info!("rolled back to {:04} in {:?}", target, elapsed);
        self.after_unlock().await
    }

    /// Drop every schema object and re-bootstrap from genesis
    ///
    /// Destructive; intended for test environments only.
    pub async fn wipe(&self) -> Result<()> {
        self.snapshots.require(&self.config.genesis_snapshot)?;

        let (_, elapsed) = self
            .lock
            .run_with_lock(async {
                self.teardown_schema().await?;
                self.restore_genesis().await?;
                if self.catalog.get(self.catalog.bottom()).is_some() {
                    let batch = self.next_batch_number().await?;
                    self.apply_one_up(self.catalog.bottom(), batch).await?;
                }
                Ok(())
            })
            .await?;

        log::info!("schema wiped and re-bootstrapped in {:?}", elapsed);
        self.after_unlock().await
    }

    /// Round-trip self-test
    ///
    /// wipe, migrate to head, roll back to just above the bottom, migrate to
    /// head again. Both directions of every migration above the bottom are
    /// exercised; a settle delay between phases lets the database quiesce.
    pub async fn test(&self) -> Result<()> {
        let settle = Duration::from_millis(self.config.settle_delay_ms);

        self.wipe().await?;
        self.migrate().await?;
        sleep(settle).await;
        self.down_to(self.catalog.bottom() + 1).await?;
        sleep(settle).await;
        self.migrate().await?;

        log::info!("migration self-test completed");
        Ok(())
    }

    /// The newest applied migration's sequence number
    pub async fn watermark(&self) -> Result<Option<u32>> {
        if !self.is_bootstrapped().await? {
            return Ok(None);
        }
        Ok(self.latest_record().await?.map(|r| r.sequence as u32))
    }

    /// Full migration history, newest first
    pub async fn history(&self) -> Result<Vec<MigrationRecord>> {
        if !self.is_bootstrapped().await? {
            return Ok(Vec::new());
        }

        let records = sqlx::query_as::<_, MigrationRecord>(&format!(
            "SELECT sequence, name, batch, created_at FROM \"{}\" ORDER BY sequence DESC",
            self.config.migrations_table
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn locked_up_to(&self, target: u32) -> Result<()> {
        let (applied, elapsed) = self.lock.run_with_lock(self.apply_up_to(target)).await?;
        if applied > 0 {
            log::info!("applied {} migration(s) in {:?}", applied, elapsed);
        }
        self.after_unlock().await
    }

    async fn apply_up_to(&self, target: u32) -> Result<u32> {
        let watermark = self.watermark().await?;
        let pending = pending_up(&self.catalog, watermark, target);
        if pending.is_empty() {
            return Ok(0);
        }

        let batch = self.next_batch_number().await?;
        let mut applied = 0;
        for sequence in pending {
            self.apply_one_up(sequence, batch).await?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Apply one migration inside its own transaction
    ///
    /// The sequence as a whole is not transactional: a failure here stops
    /// further application, but migrations already committed stay committed.
    async fn apply_one_up(&self, sequence: u32, batch: i32) -> Result<()> {
        let migration = self
            .catalog
            .get(sequence)
            .ok_or_else(|| Error::catalog(format!("No migration with sequence {:04}", sequence)))?
            .clone();

        log::info!("applying migration {}", migration.id());

        let mut helpers = TransactionHelpers::begin_with(&self.pool, self.batch.clone()).await?;
        if let Err(e) = migration.up(&mut helpers).await {
            helpers.rollback().await?;
            return Err(Error::migration(migration.id(), e.to_string()));
        }

        self.record_applied(&mut helpers, sequence, migration.id(), batch)
            .await?;
        helpers.commit().await
    }

    async fn apply_down_to(&self, target: u32) -> Result<u32> {
        let watermark = self.watermark().await?;
        let pending = pending_down(&self.catalog, watermark, target);

        let mut rolled_back = 0;
        for sequence in pending {
            self.apply_one_down(sequence).await?;
            rolled_back += 1;
        }
        Ok(rolled_back)
    }

    async fn apply_one_down(&self, sequence: u32) -> Result<()> {
        let migration = self
            .catalog
            .get(sequence)
            .ok_or_else(|| Error::catalog(format!("No migration with sequence {:04}", sequence)))?
            .clone();

        log::info!("rolling back migration {}", migration.id());

        let mut helpers = TransactionHelpers::begin_with(&self.pool, self.batch.clone()).await?;
        if let Err(e) = migration.down(&mut helpers).await {
            helpers.rollback().await?;
            return Err(Error::migration(migration.id(), e.to_string()));
        }

        // Cascade: every record at or above this sequence goes, so a partial
        // rollback never leaves orphaned "future" records behind
        helpers
            .execute(
                &format!(
                    "DELETE FROM \"{}\" WHERE sequence >= $1",
                    self.config.migrations_table
                ),
                vec![crate::database::SqlValue::Int(sequence as i32)],
            )
            .await?;
        helpers.commit().await
    }

    async fn record_applied(
        &self,
        helpers: &mut TransactionHelpers,
        sequence: u32,
        name: &str,
        batch: i32,
    ) -> Result<()> {
        helpers
            .execute(
                &format!(
                    "INSERT INTO \"{}\" (sequence, name, batch, created_at) VALUES ($1, $2, $3, NOW())",
                    self.config.migrations_table
                ),
                vec![
                    crate::database::SqlValue::Int(sequence as i32),
                    crate::database::SqlValue::String(name.to_string()),
                    crate::database::SqlValue::Int(batch),
                ],
            )
            .await?;
        Ok(())
    }

    async fn next_batch_number(&self) -> Result<i32> {
        if !self.is_bootstrapped().await? {
            return Ok(1);
        }

        let row = sqlx::query(&format!(
            "SELECT COALESCE(MAX(batch), 0) AS max_batch FROM \"{}\"",
            self.config.migrations_table
        ))
        .fetch_one(&self.pool)
        .await?;
        let max: i32 = row.try_get("max_batch")?;
        Ok(max + 1)
    }

    async fn latest_record(&self) -> Result<Option<MigrationRecord>> {
        let record = sqlx::query_as::<_, MigrationRecord>(&format!(
            "SELECT sequence, name, batch, created_at FROM \"{}\" ORDER BY sequence DESC LIMIT 1",
            self.config.migrations_table
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn is_bootstrapped(&self) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            ) AS present",
        )
        .bind(&self.config.migrations_table)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>("present")?)
    }

    async fn restore_genesis(&self) -> Result<()> {
        let sql = self.snapshots.require(&self.config.genesis_snapshot)?;

        let mut helpers = TransactionHelpers::begin_with(&self.pool, self.batch.clone()).await?;
        helpers.raw(sql).await?;
        helpers.commit().await?;

        log::info!(
            "restored bootstrap snapshot '{}'",
            self.config.genesis_snapshot
        );
        Ok(())
    }

    async fn teardown_schema(&self) -> Result<()> {
        let mut helpers = TransactionHelpers::begin_with(&self.pool, self.batch.clone()).await?;
        helpers
            .raw("DROP SCHEMA public CASCADE; CREATE SCHEMA public")
            .await?;
        helpers.commit().await
    }

    async fn wait_for_external_bootstrap(&self) -> Result<()> {
        let interval = Duration::from_millis(self.config.bootstrap_poll_ms);
        let head = self.catalog.head();

        for attempt in 1..=self.config.bootstrap_poll_attempts {
            if self.is_bootstrapped().await? {
                let watermark = self.watermark().await?;
                if head.is_none() || watermark == head {
                    return Ok(());
                }
            }

            log::info!(
                "waiting for another instance to finish migrating ({}/{})",
                attempt,
                self.config.bootstrap_poll_attempts
            );
            sleep(interval).await;
        }

        Err(Error::timeout(format!(
            "schema was not migrated externally within {} poll attempts",
            self.config.bootstrap_poll_attempts
        )))
    }

    fn validate_target(&self, target: u32) -> Result<()> {
        let head = self
            .catalog
            .head()
            .ok_or_else(|| Error::catalog("No migrations are declared"))?;
        if target < self.catalog.bottom() || target > head {
            return Err(Error::validation(format!(
                "Migration target {:04} outside declared range {:04}..{:04}",
                target,
                self.catalog.bottom(),
                head
            )));
        }
        Ok(())
    }

    /// Post-unlock hook: verify the declared schema against the catalog
    ///
    /// Drift is fatal in strict mode and advisory otherwise; the asymmetry
    /// is deliberate and environment-driven.
    async fn after_unlock(&self) -> Result<()> {
        let Some(checker) = &self.checker else {
            return Ok(());
        };

        let errors = checker.check_all().await;
        if errors.is_empty() {
            return Ok(());
        }

        if self.sync.strict {
            let details = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::SchemaOutOfSync {
                count: errors.len(),
                details,
            });
        }

        for error in &errors {
            log::warn!("schema drift: {}", error);
        }
        Ok(())
    }
}
