//! Wildebeest - migration coordination and schema-synchronization engine
//!
//! Sequences, locks, executes, and verifies PostgreSQL schema migrations:
//!
//! - **MigrationCatalog** indexes declared migrations into a dense, ordered
//!   sequence and rejects malformed or non-contiguous numbering.
//! - **MigrationLock** is a single-row database mutex; at most one process
//!   mutates schema at a time, with bounded jittered retries and
//!   best-effort release on process termination.
//! - **MigrationRunner** runs forward/targeted/teardown/self-test flows,
//!   always through the lock, bootstrapping an empty database from a named
//!   genesis snapshot.
//! - **SchemaSyncChecker** diffs the declared model schema (from
//!   `wildebeest-schema`) against the live catalog and reports every
//!   mismatch in one pass.
//! - **TransactionHelpers** give migration bodies typed, transaction-bound
//!   query and batch-scan primitives.
//!
//! # Example
//!
//! ```rust,no_run
//! use wildebeest::{Wildebeest, WildebeestConfig};
//! use wildebeest_schema::{ColumnDeclaration, ColumnType, ModelDeclaration};
//!
//! # async fn example() -> wildebeest::Result<()> {
//! let pool = wildebeest::database::connect("postgresql://localhost/app").await?;
//!
//! let engine = Wildebeest::builder()
//!     .config(WildebeestConfig::from_env()?)
//!     .model(
//!         ModelDeclaration::new("User", "users")
//!             .column("id", ColumnDeclaration::new(ColumnType::Serial).primary_key())
//!             .column("email", ColumnDeclaration::new(ColumnType::Text).unique()),
//!     )
//!     .snapshot("genesis", "CREATE TABLE wildebeest_migrations (sequence INTEGER NOT NULL UNIQUE, name TEXT NOT NULL, batch INTEGER NOT NULL, created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()); CREATE TABLE wildebeest_lock (is_locked BOOLEAN NOT NULL DEFAULT FALSE); INSERT INTO wildebeest_lock VALUES (FALSE);")
//!     .build(pool)?;
//!
//! engine.boot().await?;
//! assert!(engine.is_synced().await);
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod lock;
pub mod query;
pub mod runner;
pub mod snapshot;
pub mod sync;

pub use app::{Wildebeest, WildebeestBuilder};
pub use catalog::{parse_migration_id, Migration, MigrationCatalog};
pub use config::{Environment, WildebeestConfig};
pub use error::{Error, Result};
pub use lock::{LockBackend, LockHandle, MigrationLock, PostgresLockBackend};
pub use query::{BatchScan, TransactionHelpers};
pub use runner::{MigrationRecord, MigrationRunner};
pub use snapshot::SnapshotRegistry;
pub use sync::{DriftError, SchemaSyncChecker};
