use thiserror::Error;

pub mod retry;

pub type Result<T> = std::result::Result<T, Error>;

// Re-export retry logic
pub use retry::{with_retry, RetryPolicy, RetryableError};

/// Main error type for the Wildebeest engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Bootstrap snapshot not found: {0}")]
    SnapshotMissing(String),

    #[error("Unable to acquire migration lock after {attempts} attempts")]
    UnableToAcquireLock { attempts: u32 },

    #[error("Migration '{name}' failed: {message}")]
    Migration { name: String, message: String },

    #[error("Schema out of sync: {count} drift error(s)\n{details}")]
    SchemaOutOfSync { count: usize, details: String },

    #[error("Schema declaration error: {0}")]
    Schema(#[from] wildebeest_schema::SchemaError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Database-specific errors
    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    #[error("Database query error: {0}")]
    DatabaseQuery(String),

    #[error("Database transaction error: {0}")]
    DatabaseTransaction(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    // Error with context chain
    #[error("{message}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::DatabaseConnection(err.to_string())
            }
            sqlx::Error::Io(e) => Self::DatabaseConnection(e.to_string()),
            other => Self::DatabaseQuery(other.to_string()),
        }
    }
}

impl Error {
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn migration(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Migration {
            name: name.into(),
            message: message.into(),
        }
    }

    // Database error constructors
    pub fn database_connection(msg: impl Into<String>) -> Self {
        Self::DatabaseConnection(msg.into())
    }

    pub fn database_query(msg: impl Into<String>) -> Self {
        Self::DatabaseQuery(msg.into())
    }

    pub fn database_transaction(msg: impl Into<String>) -> Self {
        Self::DatabaseTransaction(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    // Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::DatabaseConnection(_) | Error::Timeout(_) | Error::Io(_) => true,
            Error::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
