//! Existence ledger used to deduplicate deployment notifications.
//!
//! The ledger answers one question: has this key been handled? Presence of a
//! key means "handled"; its value is never read. A touch writes an empty
//! object.
//!
//! `exists` followed by `touch` is not atomic. Two concurrent callers can
//! both observe absence; downstream consumers must tolerate the resulting
//! duplicate notification.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::storage::StorageBackend;

/// Suffix versioning world-sync ledger entries.
///
/// Bumping it makes every world scene look unhandled again without colliding
/// with entity keys written by the deployer.
pub const WORLD_SCENE_KEY_VERSION: &str = "v2";

/// Key in the existence ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey(String);

impl LedgerKey {
    /// Key for an entity handled by the deployer: the entity id itself.
    #[must_use]
    pub fn entity(entity_id: &str) -> Self {
        Self(entity_id.to_string())
    }

    /// Key for a scene handled by world sync: `{scene_id}-v2`.
    #[must_use]
    pub fn world_scene(scene_id: &str) -> Self {
        Self(format!("{scene_id}-{WORLD_SCENE_KEY_VERSION}"))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for LedgerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key presence ledger.
#[async_trait]
pub trait ExistenceLedger: Send + Sync + 'static {
    /// Returns true if the key has been touched.
    async fn exists(&self, key: &LedgerKey) -> Result<bool>;

    /// Marks the key as present. Idempotent.
    async fn touch(&self, key: &LedgerKey) -> Result<()>;
}

#[async_trait]
impl<T: ExistenceLedger + ?Sized> ExistenceLedger for Arc<T> {
    async fn exists(&self, key: &LedgerKey) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn touch(&self, key: &LedgerKey) -> Result<()> {
        (**self).touch(key).await
    }
}

/// [`ExistenceLedger`] over any [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct StorageLedger<B> {
    backend: B,
}

impl<B: StorageBackend> StorageLedger<B> {
    /// Creates a ledger writing to `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: StorageBackend> ExistenceLedger for StorageLedger<B> {
    async fn exists(&self, key: &LedgerKey) -> Result<bool> {
        self.backend.head(key.as_str()).await
    }

    async fn touch(&self, key: &LedgerKey) -> Result<()> {
        self.backend.put(key.as_str(), Bytes::new()).await
    }
}
