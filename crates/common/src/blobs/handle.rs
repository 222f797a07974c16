use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable name of a staged blob.
///
/// Handles are generated by [`BlobStore::save`](super::BlobStore::save) and
/// are never reused, so a handle identifies exactly one staged payload for
/// its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHandle(String);

impl BlobHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlobHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlobHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BlobHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}
