use thiserror::Error;

use super::BlobHandle;

pub type Result<T> = std::result::Result<T, BlobStoreError>;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// The payload could not be decoded or written.
    #[error("failed to write blob: {0}")]
    Write(String),

    #[error("blob not found: {0}")]
    NotFound(BlobHandle),

    /// The backend has no locally addressable location (e.g. in-memory).
    #[error("blob {0} has no local address")]
    NoLocalAddress(BlobHandle),

    #[error("invalid blob directory: {0}")]
    InvalidRoot(String),

    #[error("object storage error: {0}")]
    Storage(#[from] object_store::Error),
}

impl BlobStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobStoreError::NotFound(_))
    }
}
