//! Error types for the watch crate.

/// Result type alias using [`WatchError`].
pub type WatchResult<T> = Result<T, WatchError>;

/// Error returned by user-supplied ingestion hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while capturing or querying entries.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// SQLite error.
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Valkey/Redis command error.
    #[cfg(feature = "valkey")]
    #[error("valkey error: {0}")]
    Valkey(#[from] redis::RedisError),

    /// Could not obtain a pooled connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// Stored data could not be (de)serialised.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// Caller supplied a value the store cannot accept.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Backend reported something that should be impossible.
    #[error("storage error: {0}")]
    Storage(String),

    /// No backend compiled in for the configured storage.
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),
}

impl WatchError {
    /// Create a storage error.
    #[must_use]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}
