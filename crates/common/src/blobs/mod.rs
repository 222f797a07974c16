//! Staged image payloads.
//!
//! Images attached to a queued mutation are written to object storage as
//! individual named files so the queue itself only carries short handles.
//! Two backends are supported: a local directory and an in-memory store.

mod error;
mod handle;
mod store;

pub use error::{BlobStoreError, Result};
pub use handle::BlobHandle;
pub use store::{BlobStore, BlobStoreConfig};
