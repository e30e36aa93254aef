//! Storage backend abstraction for the existence ledger.
//!
//! The ledger only needs presence checks and small unconditional writes, so
//! the contract is a narrow slice of object storage.
//!
//! Two backends ship with the crate: [`MemoryBackend`] for tests and local
//! development, and [`FolderBackend`] which stores one file per key under a
//! root directory.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Storage backend trait for key/value object storage.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Writes an object, replacing any previous content.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Returns true if an object is stored under `path`, without reading it.
    async fn head(&self, path: &str) -> Result<bool>;
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        (**self).put(path, data).await
    }

    async fn head(&self, path: &str) -> Result<bool> {
        (**self).head(path).await
    }
}

/// In-memory storage backend for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(|_| poisoned())?.len())
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .insert(path.to_string(), data);
        Ok(())
    }

    async fn head(&self, path: &str) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .map_err(|_| poisoned())?
            .contains_key(path))
    }
}

/// Folder-based storage backend.
///
/// Each key maps to a file directly under `root`. Keys must be flat names:
/// separators and parent references are rejected so a key can never escape
/// the root folder.
#[derive(Debug, Clone)]
pub struct FolderBackend {
    root: PathBuf,
}

impl FolderBackend {
    /// Creates a backend rooted at `root`, creating the folder if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be created.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            Error::storage_with_source(format!("failed to create {}", root.display()), e)
        })?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key == "."
            || key.contains("..")
            || key.contains('/')
            || key.contains('\\')
        {
            return Err(Error::InvalidInput(format!("invalid storage key: {key:?}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageBackend for FolderBackend {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let file = self.object_path(path)?;
        tokio::fs::write(&file, &data)
            .await
            .map_err(|e| Error::storage_with_source(format!("failed to write {path}"), e))
    }

    async fn head(&self, path: &str) -> Result<bool> {
        let file = self.object_path(path)?;
        match tokio::fs::metadata(&file).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage_with_source(
                format!("failed to stat {path}"),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_put_then_head() {
        let backend = MemoryBackend::new();
        assert!(!backend.head("touched").await.expect("head"));

        backend
            .put("touched", Bytes::new())
            .await
            .expect("put should succeed");
        assert!(backend.head("touched").await.expect("head"));

        backend
            .put("touched", Bytes::from("again"))
            .await
            .expect("overwrite should succeed");
        assert_eq!(backend.len().expect("len"), 1);
    }

    #[tokio::test]
    async fn test_folder_backend_put_then_head() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("content");
        let backend = FolderBackend::new(&root).await.expect("create backend");

        assert!(!backend.head("bafy1").await.expect("head"));

        backend.put("bafy1", Bytes::new()).await.expect("put");
        assert!(backend.head("bafy1").await.expect("head"));
        assert!(root.join("bafy1").is_file());

        backend.put("bafy2-v2", Bytes::new()).await.expect("put");
        backend.put("bafy2-v2", Bytes::new()).await.expect("idempotent put");
        assert!(backend.head("bafy2-v2").await.expect("head"));
    }

    #[tokio::test]
    async fn test_folder_backend_rejects_escaping_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FolderBackend::new(dir.path()).await.expect("create backend");

        for key in ["", "../etc", "a/b", "a\\b", ".."] {
            let result = backend.head(key).await;
            assert!(
                matches!(result, Err(Error::InvalidInput(_))),
                "key {key:?} should be rejected"
            );
        }
    }
}
