use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("RPC error calling {method}: {message}")]
    Rpc { method: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Coordination service error: {0}")]
    Registry(String),

    #[error("Lock {key} is held by another instance")]
    LockNotObtained { key: String },

    #[error("Lock error: {0}")]
    Lock(String),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "postgres")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store error: {0}")]
    Store(String),

    #[cfg(feature = "redis")]
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StatsError {
    pub fn rpc(method: impl Into<String>, message: impl Into<String>) -> Self {
        StatsError::Rpc {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn is_lock_not_obtained(&self) -> bool {
        matches!(self, StatsError::LockNotObtained { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StatsError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;
