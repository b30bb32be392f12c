//! Migration lock
//!
//! A single-row mutex persisted in the database. Every schema mutation in
//! the system runs through [`MigrationLock::run_with_lock`]; transaction
//! isolation alone is not enough because DDL is not always covered by MVCC
//! snapshots, so the lock row is the one serialization point shared by all
//! processes.

use crate::config::LockConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Storage backend for the lock row
///
/// The production backend rides on PostgreSQL row locking; tests substitute
/// an in-memory implementation to exercise the coordination logic.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Lock table exists and contains exactly one row
    async fn is_setup(&self) -> Result<bool>;

    /// Atomically flip the row from unlocked to locked
    ///
    /// Returns true iff this caller performed the flip. Must be a single
    /// atomic read-modify-write visible across processes.
    async fn try_acquire(&self) -> Result<bool>;

    /// Set the row back to unlocked where currently locked
    ///
    /// Returns true iff exactly one row was affected.
    async fn release(&self) -> Result<bool>;
}

/// PostgreSQL lock backend: one row, flipped under `FOR UPDATE`
pub struct PostgresLockBackend {
    pool: PgPool,
    table: String,
}

impl PostgresLockBackend {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    async fn table_exists(&self) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            ) AS present",
        )
        .bind(&self.table)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<bool, _>("present")?)
    }
}

#[async_trait]
impl LockBackend for PostgresLockBackend {
    async fn is_setup(&self) -> Result<bool> {
        if !self.table_exists().await? {
            return Ok(false);
        }

        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM \"{}\"", self.table))
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;

        Ok(count == 1)
    }

    async fn try_acquire(&self) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Row-level exclusive lock on the unlocked row. A competing holder
        // makes the predicate match nothing once its flip commits, so losing
        // the race reads as "no row" rather than a double acquire.
        let row = sqlx::query(&format!(
            "SELECT is_locked FROM \"{}\" WHERE is_locked = FALSE FOR UPDATE",
            self.table
        ))
        .fetch_optional(&mut *tx)
        .await?;

        if row.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(&format!(
            "UPDATE \"{}\" SET is_locked = TRUE WHERE is_locked = FALSE",
            self.table
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn release(&self) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE \"{}\" SET is_locked = FALSE WHERE is_locked = TRUE",
            self.table
        ))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Proof of acquisition returned by [`MigrationLock::acquire`]
#[derive(Debug)]
pub struct LockHandle {
    persistent: bool,
}

impl LockHandle {
    fn persistent() -> Self {
        Self { persistent: true }
    }

    fn transient() -> Self {
        Self { persistent: false }
    }

    /// Whether this handle is backed by the lock row
    ///
    /// A transient handle exists only before genesis bootstrap, when there
    /// is no lock table to flip yet.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

/// The migration mutex
pub struct MigrationLock {
    backend: Arc<dyn LockBackend>,
    base_delay: Duration,
    max_attempts: u32,
}

impl MigrationLock {
    pub fn new(backend: Arc<dyn LockBackend>, config: &LockConfig) -> Self {
        Self {
            backend,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Lock backed by a PostgreSQL pool
    pub fn postgres(pool: PgPool, config: &LockConfig) -> Self {
        Self::new(
            Arc::new(PostgresLockBackend::new(pool, config.table.clone())),
            config,
        )
    }

    /// Whether the lock row has been bootstrapped
    pub async fn is_setup(&self) -> Result<bool> {
        self.backend.is_setup().await
    }

    /// Attempt a single acquisition
    ///
    /// Before bootstrap there is no row to lock; a transient in-memory
    /// handle is returned so genesis can proceed. Otherwise `None` means
    /// another process holds the lock.
    pub async fn acquire(&self) -> Result<Option<LockHandle>> {
        if !self.backend.is_setup().await? {
            log::debug!("lock table not bootstrapped yet, issuing transient handle");
            return Ok(Some(LockHandle::transient()));
        }

        if self.backend.try_acquire().await? {
            Ok(Some(LockHandle::persistent()))
        } else {
            Ok(None)
        }
    }

    /// Release the lock held by this process
    pub async fn release(&self) -> Result<bool> {
        self.backend.release().await
    }

    /// Administrative escape hatch: release regardless of holder
    ///
    /// A hard kill that bypasses signal handling leaves a stale locked row
    /// behind; this clears it.
    pub async fn force_unlock(&self) -> Result<()> {
        match self.backend.release().await? {
            true => log::warn!("migration lock force-unlocked"),
            false => log::debug!("force unlock found no locked row"),
        }
        Ok(())
    }

    /// Full-jitter backoff delay for acquisition attempt `attempt` (1-based)
    ///
    /// Drawn from `uniform(0, 2^attempt * base_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let wait = rand::thread_rng().gen_range(0..=ceiling);
        Duration::from_millis(wait)
    }

    /// Acquire the lock with bounded retries, run `action`, release
    ///
    /// The lock is released on every exit path out of the action, including
    /// errors. Exceeding the attempt ceiling is fatal, not retryable, and
    /// leaves the lock unlocked. Returns the action's value and the elapsed
    /// wall-clock time of the locked section.
    pub async fn run_with_lock<Fut, T>(&self, action: Fut) -> Result<(T, Duration)>
    where
        Fut: Future<Output = Result<T>>,
    {
        // Released automatically if the process is interrupted while the
        // acquisition is pending or the lock is held
        let _guard = SignalReleaseGuard::install(self.backend.clone());

        let mut handle = None;
        for attempt in 1..=self.max_attempts {
            if let Some(acquired) = self.acquire().await? {
                handle = Some(acquired);
                break;
            }

            if attempt == self.max_attempts {
                return Err(Error::UnableToAcquireLock {
                    attempts: self.max_attempts,
                });
            }

            let delay = self.backoff_delay(attempt);
            log::debug!(
                "migration lock busy, attempt {}/{}, retrying in {:?}",
                attempt,
                self.max_attempts,
                delay
            );
            sleep(delay).await;
        }

        let handle = handle.ok_or(Error::UnableToAcquireLock {
            attempts: self.max_attempts,
        })?;

        let started = Instant::now();
        let result = action.await;

        if handle.is_persistent() {
            match self.backend.release().await {
                Ok(true) => {}
                Ok(false) => log::warn!("lock release affected no rows"),
                Err(e) => log::error!("failed to release migration lock: {}", e),
            }
        }

        let value = result?;
        Ok((value, started.elapsed()))
    }
}

/// Best-effort lock release on process termination
///
/// Listens for interrupt/termination signals for as long as the guard
/// lives. A crashed holder that skips signal handling entirely still leaves
/// a stale lock, which is what `force_unlock` is for.
struct SignalReleaseGuard {
    task: tokio::task::JoinHandle<()>,
}

impl SignalReleaseGuard {
    fn install(backend: Arc<dyn LockBackend>) -> Self {
        Self::with_signal(backend, termination_signal())
    }

    fn with_signal<F>(backend: Arc<dyn LockBackend>, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            signal.await;
            log::warn!("termination signal received with migration lock pending; releasing");
            if let Err(e) = backend.release().await {
                log::error!("failed to release migration lock on termination: {}", e);
            }
        });

        Self { task }
    }
}

impl Drop for SignalReleaseGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            log::error!("failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// In-memory lock row for coordination tests
    struct InMemoryLockBackend {
        locked: Mutex<bool>,
        setup: bool,
    }

    impl InMemoryLockBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                locked: Mutex::new(false),
                setup: true,
            })
        }

        fn stale() -> Arc<Self> {
            Arc::new(Self {
                locked: Mutex::new(true),
                setup: true,
            })
        }

        fn unbootstrapped() -> Arc<Self> {
            Arc::new(Self {
                locked: Mutex::new(false),
                setup: false,
            })
        }
    }

    #[async_trait]
    impl LockBackend for InMemoryLockBackend {
        async fn is_setup(&self) -> Result<bool> {
            Ok(self.setup)
        }

        async fn try_acquire(&self) -> Result<bool> {
            let mut locked = self.locked.lock().await;
            if *locked {
                Ok(false)
            } else {
                *locked = true;
                Ok(true)
            }
        }

        async fn release(&self) -> Result<bool> {
            let mut locked = self.locked.lock().await;
            let was_locked = *locked;
            *locked = false;
            Ok(was_locked)
        }
    }

    fn lock_with(backend: Arc<InMemoryLockBackend>, base_ms: u64, attempts: u32) -> MigrationLock {
        MigrationLock::new(
            backend,
            &LockConfig {
                table: "test_lock".to_string(),
                base_delay_ms: base_ms,
                max_attempts: attempts,
            },
        )
    }

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let backend = InMemoryLockBackend::new();
        let active = Arc::new(AtomicU32::new(0));
        let max_active = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let backend = backend.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            tasks.push(tokio::spawn(async move {
                let lock = lock_with(backend, 2, 14);
                lock.run_with_lock(async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1, "lock-held intervals overlapped");
        assert!(!*backend.locked.lock().await, "lock left held after all runs");
    }

    #[tokio::test]
    async fn test_attempt_ceiling_is_fatal_and_leaves_lock_unlocked_by_holder() {
        let backend = InMemoryLockBackend::stale();
        let lock = lock_with(backend.clone(), 1, 3);

        let result = lock.run_with_lock(async { Ok(()) }).await;
        match result {
            Err(Error::UnableToAcquireLock { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected UnableToAcquireLock, got {:?}", other.map(|_| ())),
        }

        // The stale holder's row is untouched; this process added nothing
        assert!(*backend.locked.lock().await);
    }

    #[tokio::test]
    async fn test_release_on_action_error() {
        let backend = InMemoryLockBackend::new();
        let lock = lock_with(backend.clone(), 1, 3);

        let result: Result<((), Duration)> = lock
            .run_with_lock(async { Err(Error::migration("0002-bad", "boom")) })
            .await;
        assert!(result.is_err());

        // Error propagated only after the lock was released
        assert!(!*backend.locked.lock().await);
        let reacquired = lock.acquire().await.unwrap();
        assert!(reacquired.is_some());
    }

    #[tokio::test]
    async fn test_termination_signal_releases_held_lock() {
        let backend = InMemoryLockBackend::new();
        assert!(backend.try_acquire().await.unwrap());

        let (trigger, fired) = tokio::sync::oneshot::channel::<()>();
        let _guard = SignalReleaseGuard::with_signal(backend.clone(), async move {
            let _ = fired.await;
        });

        trigger.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !*backend.locked.lock().await {
                    break;
                }
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("lock row should revert to unlocked after termination");

        // Another process can now acquire
        let lock = lock_with(backend, 1, 2);
        assert!(lock.acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_force_unlock_recovers_stale_lock() {
        let backend = InMemoryLockBackend::stale();
        let lock = lock_with(backend.clone(), 1, 2);

        assert!(lock.acquire().await.unwrap().is_none());
        lock.force_unlock().await.unwrap();

        let handle = lock.acquire().await.unwrap().expect("acquire after force unlock");
        assert!(handle.is_persistent());
    }

    #[tokio::test]
    async fn test_unbootstrapped_yields_transient_handle() {
        let backend = InMemoryLockBackend::unbootstrapped();
        let lock = lock_with(backend.clone(), 1, 2);

        let handle = lock.acquire().await.unwrap().expect("transient handle");
        assert!(!handle.is_persistent());
    }

    #[tokio::test]
    async fn test_backoff_growth_bound() {
        let backend = InMemoryLockBackend::new();
        let lock = lock_with(backend, 50, 8);

        for attempt in 1..=8u32 {
            let bound = Duration::from_millis(50 * 2u64.pow(attempt));
            for _ in 0..200 {
                let delay = lock.backoff_delay(attempt);
                assert!(
                    delay <= bound,
                    "attempt {} produced {:?}, above bound {:?}",
                    attempt,
                    delay,
                    bound
                );
            }
        }
    }

    #[tokio::test]
    async fn test_run_with_lock_reports_elapsed() {
        let backend = InMemoryLockBackend::new();
        let lock = lock_with(backend, 1, 2);

        let ((), elapsed) = lock
            .run_with_lock(async {
                sleep(Duration::from_millis(20)).await;
                Ok(())
            })
            .await
            .unwrap();

        assert!(elapsed >= Duration::from_millis(20));
    }
}
