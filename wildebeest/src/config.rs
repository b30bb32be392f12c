use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Environment type for configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Get environment from string
    pub fn from_str(env: &str) -> Self {
        match env.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// Get environment name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "dev",
            Environment::Production => "prod",
        }
    }

    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WildebeestConfig {
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub naming: NamingConfig,
}

/// Migration lock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock table name
    #[serde(default = "default_lock_table")]
    pub table: String,

    /// Base delay for acquisition backoff, in milliseconds
    #[serde(default = "default_lock_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Acquisition attempt ceiling; exceeding it is fatal
    #[serde(default = "default_lock_max_attempts")]
    pub max_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            table: default_lock_table(),
            base_delay_ms: default_lock_base_delay_ms(),
            max_attempts: default_lock_max_attempts(),
        }
    }
}

/// Migration runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Migration history table name
    #[serde(default = "default_migrations_table")]
    pub migrations_table: String,

    /// Name of the bootstrap snapshot restored on first run
    #[serde(default = "default_genesis_snapshot")]
    pub genesis_snapshot: String,

    /// Lowest migration sequence number
    #[serde(default = "default_bottom_sequence")]
    pub bottom_sequence: u32,

    /// Wait for another instance to bootstrap instead of doing it here
    #[serde(default)]
    pub wait_for_migration: bool,

    /// Release a stale lock unconditionally during boot
    #[serde(default)]
    pub force_unlock_on_boot: bool,

    /// Delay between the phases of the round-trip self-test, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Poll interval while waiting for an external bootstrap, in milliseconds
    #[serde(default = "default_bootstrap_poll_ms")]
    pub bootstrap_poll_ms: u64,

    /// Poll attempt ceiling while waiting for an external bootstrap
    #[serde(default = "default_bootstrap_poll_attempts")]
    pub bootstrap_poll_attempts: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            migrations_table: default_migrations_table(),
            genesis_snapshot: default_genesis_snapshot(),
            bottom_sequence: default_bottom_sequence(),
            wait_for_migration: false,
            force_unlock_on_boot: false,
            settle_delay_ms: default_settle_delay_ms(),
            bootstrap_poll_ms: default_bootstrap_poll_ms(),
            bootstrap_poll_attempts: default_bootstrap_poll_attempts(),
        }
    }
}

/// Schema-sync checker settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Raise a fatal error on drift after every locked run
    #[serde(default)]
    pub strict: bool,

    /// Catalog tables to skip in the extraneous-table check
    #[serde(default)]
    pub ignored_tables: Vec<String>,
}

/// Batch scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Default page size for batch scans
    #[serde(default = "default_batch_limit")]
    pub limit: u32,

    /// Log scan progress once elapsed time exceeds this many milliseconds
    #[serde(default = "default_slow_scan_ms")]
    pub slow_scan_threshold_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            limit: default_batch_limit(),
            slow_scan_threshold_ms: default_slow_scan_ms(),
        }
    }
}

/// Naming conventions for catalog object names
///
/// These templates mirror PostgreSQL's own generated names; override them
/// when the embedding application names constraints differently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Composite index name: `{table}` and `{columns}` placeholders
    #[serde(default = "default_index_template")]
    pub index: String,

    /// Unique constraint name: `{table}` and `{column}` placeholders
    #[serde(default = "default_unique_template")]
    pub unique: String,

    /// Primary key constraint name: `{table}` placeholder
    #[serde(default = "default_primary_key_template")]
    pub primary_key: String,

    /// Foreign key constraint name: `{table}` and `{column}` placeholders
    #[serde(default = "default_foreign_key_template")]
    pub foreign_key: String,

    /// Enum type name: `{table}` and `{column}` placeholders
    #[serde(default = "default_enum_template")]
    pub enum_type: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            index: default_index_template(),
            unique: default_unique_template(),
            primary_key: default_primary_key_template(),
            foreign_key: default_foreign_key_template(),
            enum_type: default_enum_template(),
        }
    }
}

impl NamingConfig {
    pub fn index_name(&self, table: &str, columns: &[String]) -> String {
        self.index
            .replace("{table}", table)
            .replace("{columns}", &columns.join("_"))
    }

    pub fn unique_name(&self, table: &str, column: &str) -> String {
        self.unique
            .replace("{table}", table)
            .replace("{column}", column)
    }

    pub fn primary_key_name(&self, table: &str) -> String {
        self.primary_key.replace("{table}", table)
    }

    pub fn foreign_key_name(&self, table: &str, column: &str) -> String {
        self.foreign_key
            .replace("{table}", table)
            .replace("{column}", column)
    }

    pub fn enum_type_name(&self, table: &str, column: &str) -> String {
        self.enum_type
            .replace("{table}", table)
            .replace("{column}", column)
    }
}

fn default_lock_table() -> String {
    "wildebeest_lock".to_string()
}

fn default_lock_base_delay_ms() -> u64 {
    50
}

fn default_lock_max_attempts() -> u32 {
    10
}

fn default_migrations_table() -> String {
    "wildebeest_migrations".to_string()
}

fn default_genesis_snapshot() -> String {
    "genesis".to_string()
}

fn default_bottom_sequence() -> u32 {
    1
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_bootstrap_poll_ms() -> u64 {
    1000
}

fn default_bootstrap_poll_attempts() -> u32 {
    120
}

fn default_batch_limit() -> u32 {
    1000
}

fn default_slow_scan_ms() -> u64 {
    10_000
}

fn default_index_template() -> String {
    "{table}_{columns}_index".to_string()
}

fn default_unique_template() -> String {
    "{table}_{column}_key".to_string()
}

fn default_primary_key_template() -> String {
    "{table}_pkey".to_string()
}

fn default_foreign_key_template() -> String {
    "{table}_{column}_fkey".to_string()
}

fn default_enum_template() -> String {
    "enum_{table}_{column}".to_string()
}

impl WildebeestConfig {
    /// Build a configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `WILDEBEEST_*` environment overrides to this configuration
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(env) = env::var("WILDEBEEST_ENV") {
            self.environment = Environment::from_str(&env);
        }

        if let Ok(strict) = env::var("WILDEBEEST_STRICT_SYNC") {
            self.sync.strict = parse_bool("WILDEBEEST_STRICT_SYNC", &strict)?;
        }

        if let Ok(force) = env::var("WILDEBEEST_FORCE_UNLOCK") {
            self.runner.force_unlock_on_boot = parse_bool("WILDEBEEST_FORCE_UNLOCK", &force)?;
        }

        if let Ok(wait) = env::var("WILDEBEEST_WAIT_FOR_MIGRATION") {
            self.runner.wait_for_migration = parse_bool("WILDEBEEST_WAIT_FOR_MIGRATION", &wait)?;
        }

        if let Ok(tables) = env::var("WILDEBEEST_IGNORED_TABLES") {
            self.sync.ignored_tables = tables
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }

        if let Ok(attempts) = env::var("WILDEBEEST_LOCK_MAX_ATTEMPTS") {
            self.lock.max_attempts = attempts.parse().map_err(|_| {
                Error::validation(format!(
                    "Invalid WILDEBEEST_LOCK_MAX_ATTEMPTS value: {}",
                    attempts
                ))
            })?;
        }

        if let Ok(delay) = env::var("WILDEBEEST_LOCK_BASE_DELAY_MS") {
            self.lock.base_delay_ms = delay.parse().map_err(|_| {
                Error::validation(format!(
                    "Invalid WILDEBEEST_LOCK_BASE_DELAY_MS value: {}",
                    delay
                ))
            })?;
        }

        if let Ok(snapshot) = env::var("WILDEBEEST_GENESIS_SNAPSHOT") {
            self.runner.genesis_snapshot = snapshot;
        }

        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::validation(format!(
            "Invalid boolean for {}: {}",
            name, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WildebeestConfig::default();
        assert_eq!(config.lock.table, "wildebeest_lock");
        assert_eq!(config.lock.max_attempts, 10);
        assert_eq!(config.runner.migrations_table, "wildebeest_migrations");
        assert_eq!(config.runner.bottom_sequence, 1);
        assert_eq!(config.batch.limit, 1000);
        assert!(!config.sync.strict);
    }

    #[test]
    fn test_naming_conventions() {
        let naming = NamingConfig::default();
        assert_eq!(
            naming.index_name("users", &["email".to_string(), "tenant_id".to_string()]),
            "users_email_tenant_id_index"
        );
        assert_eq!(naming.unique_name("users", "email"), "users_email_key");
        assert_eq!(naming.primary_key_name("users"), "users_pkey");
        assert_eq!(
            naming.foreign_key_name("posts", "user_id"),
            "posts_user_id_fkey"
        );
        assert_eq!(naming.enum_type_name("posts", "state"), "enum_posts_state");
    }

    #[test]
    fn test_environment_parsing() {
        assert!(Environment::from_str("production").is_production());
        assert!(Environment::from_str("prod").is_production());
        assert!(!Environment::from_str("dev").is_production());
        assert!(!Environment::from_str("anything-else").is_production());
    }

    #[test]
    fn test_config_deserializes_with_partial_sections() {
        let config: WildebeestConfig =
            serde_json::from_str(r#"{"sync": {"strict": true}}"#).unwrap();
        assert!(config.sync.strict);
        assert_eq!(config.lock.max_attempts, 10);
    }
}
