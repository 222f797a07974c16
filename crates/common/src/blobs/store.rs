use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::Url;

use super::error::{BlobStoreError, Result};
use super::BlobHandle;

/// Prefix of every generated blob name.
const NAME_PREFIX: &str = "offline_img";

/// Extension used when the payload carries no usable mime type.
const DEFAULT_EXTENSION: &str = "jpg";

/// How many sequence numbers to try before giving up on a name collision.
const MAX_NAME_ATTEMPTS: usize = 16;

/// Backend selection for the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlobStoreConfig {
    /// Files under a local directory.
    Local { path: PathBuf },
    /// Process memory, lost on drop.
    Memory,
}

/// Named binary payload storage.
///
/// Payloads arrive in the transport encoding (base64, optionally with a
/// `data:<mime>;base64,` header) and are stored decoded. Reads hand the
/// payload back in the same transport encoding.
#[derive(Debug, Clone)]
pub struct BlobStore {
    inner: Arc<dyn ObjectStore>,
    /// Canonical directory for local stores, used for display URIs
    root: Option<PathBuf>,
    sequence: Arc<AtomicU64>,
}

impl BlobStore {
    pub fn new(config: BlobStoreConfig) -> Result<Self> {
        match &config {
            BlobStoreConfig::Local { path } => {
                std::fs::create_dir_all(path).map_err(|e| {
                    BlobStoreError::InvalidRoot(format!("{}: {}", path.display(), e))
                })?;
                let root = std::fs::canonicalize(path).map_err(|e| {
                    BlobStoreError::InvalidRoot(format!("{}: {}", path.display(), e))
                })?;
                let local = LocalFileSystem::new_with_prefix(&root)?;

                info!(path = %root.display(), "blob store initialized");
                Ok(Self {
                    inner: Arc::new(local),
                    root: Some(root),
                    sequence: Arc::new(AtomicU64::new(0)),
                })
            }
            BlobStoreConfig::Memory => Ok(Self::new_ephemeral()),
        }
    }

    /// Create a blob store backed by a local directory.
    pub fn new_local(path: &Path) -> Result<Self> {
        Self::new(BlobStoreConfig::Local {
            path: path.to_path_buf(),
        })
    }

    /// Create a blob store that only lives in memory.
    pub fn new_ephemeral() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            root: None,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Decode and persist an encoded payload, returning its new handle.
    ///
    /// Anything up to and including the first `,` is treated as a header
    /// and stripped before decoding.
    pub async fn save(&self, encoded: &str) -> Result<BlobHandle> {
        let (header, body) = match encoded.split_once(',') {
            Some((header, body)) => (Some(header), body),
            None => (None, encoded),
        };

        let data = base64::engine::general_purpose::STANDARD
            .decode(body.trim())
            .map_err(|e| BlobStoreError::Write(format!("invalid base64 payload: {}", e)))?;
        let extension = header.and_then(extension_for_header).unwrap_or(DEFAULT_EXTENSION);
        let size = data.len();
        let payload = PutPayload::from(Bytes::from(data));

        for _ in 0..MAX_NAME_ATTEMPTS {
            let handle = self.next_handle(extension);
            let location = ObjectPath::from(handle.as_str());

            match self
                .inner
                .put_opts(&location, payload.clone(), PutOptions::from(PutMode::Create))
                .await
            {
                Ok(_) => {
                    debug!(handle = %handle, size, "blob saved");
                    return Ok(handle);
                }
                Err(object_store::Error::AlreadyExists { .. }) => {
                    debug!(handle = %handle, "blob name taken, retrying");
                }
                Err(e) => return Err(BlobStoreError::Write(e.to_string())),
            }
        }

        Err(BlobStoreError::Write(
            "could not allocate a unique blob name".to_string(),
        ))
    }

    /// Read a payload back in transport encoding (plain base64).
    pub async fn read(&self, handle: &BlobHandle) -> Result<String> {
        let data = self.read_bytes(handle).await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(&data))
    }

    /// Read the decoded payload bytes.
    pub async fn read_bytes(&self, handle: &BlobHandle) -> Result<Bytes> {
        let location = ObjectPath::from(handle.as_str());
        match self.inner.get(&location).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => {
                Err(BlobStoreError::NotFound(handle.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a payload.
    ///
    /// Returns `false` if the handle was already gone; that case is logged,
    /// not raised.
    pub async fn delete(&self, handle: &BlobHandle) -> Result<bool> {
        // In-memory stores report success for absent keys, so check first
        if !self.exists(handle).await? {
            warn!(handle = %handle, "blob already removed");
            return Ok(false);
        }

        let location = ObjectPath::from(handle.as_str());
        match self.inner.delete(&location).await {
            Ok(()) => {
                debug!(handle = %handle, "blob deleted");
                Ok(true)
            }
            Err(object_store::Error::NotFound { .. }) => {
                warn!(handle = %handle, "blob already removed");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check whether a handle currently refers to a stored payload.
    pub async fn exists(&self, handle: &BlobHandle) -> Result<bool> {
        let location = ObjectPath::from(handle.as_str());
        match self.inner.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Map a handle to a URI a presentation layer can load directly.
    pub async fn resolve_display_uri(&self, handle: &BlobHandle) -> Result<Url> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| BlobStoreError::NoLocalAddress(handle.clone()))?;

        if !self.exists(handle).await? {
            return Err(BlobStoreError::NotFound(handle.clone()));
        }

        Url::from_file_path(root.join(handle.as_str()))
            .map_err(|_| BlobStoreError::NoLocalAddress(handle.clone()))
    }

    /// List every stored handle.
    pub async fn list(&self) -> Result<Vec<BlobHandle>> {
        let metas: Vec<_> = self.inner.list(None).try_collect().await?;
        let mut handles: Vec<BlobHandle> = metas
            .into_iter()
            .filter_map(|meta| meta.location.filename().map(BlobHandle::from))
            .collect();
        handles.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(handles)
    }

    fn next_handle(&self, extension: &str) -> BlobHandle {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        BlobHandle::new(format!(
            "{}_{}_{:04}.{}",
            NAME_PREFIX, millis, seq, extension
        ))
    }
}

/// Pick a file extension from a `data:<mime>;base64` header.
fn extension_for_header(header: &str) -> Option<&'static str> {
    let mime = header.strip_prefix("data:")?.split(';').next()?.trim();
    if !mime.starts_with("image/") {
        return None;
    }
    let extensions = mime_guess::get_mime_extensions_str(mime)?;
    if extensions.contains(&"jpg") {
        return Some("jpg");
    }
    extensions.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_URI: &str = "data:image/png;base64,aGVsbG8gd29ybGQ=";

    #[tokio::test]
    async fn test_save_and_read_round_trip() {
        let store = BlobStore::new_ephemeral();

        let handle = store.save(PNG_URI).await.unwrap();
        assert!(handle.as_str().starts_with("offline_img_"));
        assert!(handle.as_str().ends_with(".png"));

        let bytes = store.read_bytes(&handle).await.unwrap();
        assert_eq!(bytes.as_ref(), b"hello world");

        // Reads come back as clean base64 without the header
        assert_eq!(store.read(&handle).await.unwrap(), "aGVsbG8gd29ybGQ=");
    }

    #[tokio::test]
    async fn test_save_without_header_defaults_to_jpg() {
        let store = BlobStore::new_ephemeral();
        let handle = store.save("aGVsbG8=").await.unwrap();
        assert!(handle.as_str().ends_with(".jpg"));
        assert_eq!(store.read_bytes(&handle).await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_handles_are_unique() {
        let store = BlobStore::new_ephemeral();
        let a = store.save("aGVsbG8=").await.unwrap();
        let b = store.save("aGVsbG8=").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_write_error() {
        let store = BlobStore::new_ephemeral();
        let err = store.save("data:image/png;base64,!!!").await.unwrap_err();
        assert!(matches!(err, BlobStoreError::Write(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = BlobStore::new_ephemeral();
        let handle = store.save(PNG_URI).await.unwrap();

        assert!(store.delete(&handle).await.unwrap());
        assert!(store.read(&handle).await.unwrap_err().is_not_found());
        assert!(!store.delete(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_delete_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(BlobStoreConfig::Local {
            path: temp_dir.path().join("blobs"),
        })
        .unwrap();
        let handle = store.save(PNG_URI).await.unwrap();

        assert!(store.delete(&handle).await.unwrap());
        assert!(!store.exists(&handle).await.unwrap());
        assert!(!store.delete(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_store_display_uri() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new_local(&temp_dir.path().join("blobs")).unwrap();

        let handle = store.save(PNG_URI).await.unwrap();
        let uri = store.resolve_display_uri(&handle).await.unwrap();
        assert_eq!(uri.scheme(), "file");

        let path = uri.to_file_path().unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(path).unwrap(), b"hello world");

        store.delete(&handle).await.unwrap();
        assert!(store
            .resolve_display_uri(&handle)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_memory_store_has_no_display_uri() {
        let store = BlobStore::new_ephemeral();
        let handle = store.save(PNG_URI).await.unwrap();
        let err = store.resolve_display_uri(&handle).await.unwrap_err();
        assert!(matches!(err, BlobStoreError::NoLocalAddress(_)));
    }

    #[test]
    fn test_extension_for_header() {
        assert_eq!(extension_for_header("data:image/png;base64"), Some("png"));
        assert_eq!(extension_for_header("data:image/jpeg;base64"), Some("jpg"));
        assert_eq!(extension_for_header("data:text/plain;base64"), None);
        assert_eq!(extension_for_header("garbage"), None);
    }
}
