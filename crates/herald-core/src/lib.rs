//! # herald-core
//!
//! Shared primitives for the herald deployment notification bridge.
//!
//! - **Entities**: wire types for entities and deployment notifications
//! - **Existence Ledger**: key presence tracking used for deduplication
//! - **Storage**: in-memory and folder-based backends for the ledger
//! - **Rect Filter**: parcel rectangle used to restrict scene deployments
//! - **Errors**: shared error type and retry classification
//!
//! ## Example
//!
//! ```rust
//! use herald_core::prelude::*;
//!
//! let rect: RectFilter = "0,0,15,15".parse().unwrap();
//! let entity = Entity::new("bafy123", EntityType::Scene).with_pointers(["10,10"]);
//!
//! let pointers = entity.pointers.as_deref().unwrap_or_default();
//! assert!(rect.any_inside(pointers.iter().map(String::as_str)));
//! assert_eq!(LedgerKey::world_scene("bafy123").as_str(), "bafy123-v2");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod entity;
pub mod error;
pub mod ledger;
pub mod observability;
pub mod rect;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::entity::{DeploymentNotification, Entity, EntityType, MarkAsDeployed};
    pub use crate::error::{Error, Result};
    pub use crate::ledger::{ExistenceLedger, LedgerKey, StorageLedger};
    pub use crate::rect::{Parcel, RectFilter};
    pub use crate::storage::{FolderBackend, MemoryBackend, StorageBackend};
}

pub use entity::{DeploymentNotification, Entity, EntityType, MarkAsDeployed};
pub use error::{Error, Result};
pub use ledger::{ExistenceLedger, LedgerKey, StorageLedger};
pub use observability::{LogFormat, init_logging};
pub use rect::RectFilter;
pub use storage::{FolderBackend, MemoryBackend, StorageBackend};
