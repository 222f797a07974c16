use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("cache has not been initialized")]
    NotInitialized,

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("payload serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A multi-row write failed and was rolled back in full.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("setup error: {0}")]
    Setup(String),
}
