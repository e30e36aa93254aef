//! Entity and deployment notification wire types.
//!
//! An [`Entity`] is the immutable record the synchronization feed hands to
//! the deployer. A [`DeploymentNotification`] is what subscribers receive: the
//! entity verbatim plus the content servers it can be fetched from. Unknown
//! entity fields are preserved so notifications re-emit exactly what arrived.

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Kind of content an entity describes.
///
/// Serialized as its lowercase name. Types the bridge does not route are kept
/// as [`EntityType::Other`] with their original spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    /// A parcel scene; the only type carrying coordinate pointers.
    Scene,
    /// A wearable item.
    Wearable,
    /// An emote.
    Emote,
    /// Any other entity type (profiles, stores, outfits, ...).
    Other(String),
}

impl EntityType {
    /// Returns the wire name of the entity type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Scene => "scene",
            Self::Wearable => "wearable",
            Self::Emote => "emote",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for EntityType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "scene" => Self::Scene,
            "wearable" => Self::Wearable,
            "emote" => Self::Emote,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        match value {
            EntityType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content entity announced by the synchronization feed or the world index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Content-addressed identifier, unique per entity version.
    pub entity_id: String,

    /// Entity kind. World index entries do not carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,

    /// Coordinate tokens (`"x,y"`), present for scenes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointers: Option<Vec<String>>,

    /// Authorization proof, passed through untouched.
    #[serde(default)]
    pub auth_chain: Vec<serde_json::Value>,

    /// Any other fields the feed supplied.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Entity {
    /// Creates an entity with the given id and type and no pointers.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, entity_type: impl Into<EntityType>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: Some(entity_type.into()),
            pointers: None,
            auth_chain: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Creates an untyped entity, as reconstructed from the world index.
    #[must_use]
    pub fn untyped(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: None,
            pointers: None,
            auth_chain: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Sets the coordinate pointers.
    #[must_use]
    pub fn with_pointers<I, S>(mut self, pointers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pointers = Some(pointers.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if the entity is of the given type.
    #[must_use]
    pub fn is_type(&self, entity_type: &EntityType) -> bool {
        self.entity_type.as_ref() == Some(entity_type)
    }

    /// Returns the entity type name for logs, `"unknown"` when absent.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.entity_type.as_ref().map_or("unknown", EntityType::as_str)
    }
}

/// Payload delivered to downstream topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentNotification {
    /// The deployed entity.
    pub entity: Entity,
    /// Content servers the entity can be downloaded from.
    pub content_server_urls: Vec<String>,
}

impl DeploymentNotification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(entity: Entity, content_server_urls: Vec<String>) -> Self {
        Self {
            entity,
            content_server_urls,
        }
    }

    /// Serializes the notification to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity contains values JSON cannot encode.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Acknowledgment callback supplied by the feed alongside an entity.
///
/// Consuming [`MarkAsDeployed::mark`] tells the feed the entity was handled and
/// must not be redelivered. Taking `self` by value means a handle can be
/// invoked at most once.
pub struct MarkAsDeployed(Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>);

impl MarkAsDeployed {
    /// Wraps an async acknowledgment callback.
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(Box::new(move || Box::pin(callback())))
    }

    /// Returns a handle that does nothing when invoked.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|| async {})
    }

    /// Invokes the callback.
    pub async fn mark(self) {
        (self.0)().await;
    }
}

impl fmt::Debug for MarkAsDeployed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MarkAsDeployed(<callback>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn entity_type_roundtrips_known_and_unknown_names() {
        assert_eq!(EntityType::from("scene"), EntityType::Scene);
        assert_eq!(EntityType::from("emote"), EntityType::Emote);
        assert_eq!(
            EntityType::from("profile"),
            EntityType::Other("profile".to_string())
        );
        assert_eq!(String::from(EntityType::Other("store".into())), "store");
        assert_eq!(String::from(EntityType::Wearable), "wearable");
    }

    #[test]
    fn entity_deserializes_feed_payload_and_keeps_extra_fields() {
        let json = r#"{
            "entityId": "bafy123",
            "entityType": "scene",
            "pointers": ["10,10", "10,11"],
            "authChain": [{"type": "SIGNER", "payload": "0xabc", "signature": ""}],
            "entityTimestamp": 1700000000000
        }"#;

        let entity: Entity = serde_json::from_str(json).expect("parse");
        assert_eq!(entity.entity_id, "bafy123");
        assert!(entity.is_type(&EntityType::Scene));
        assert_eq!(entity.pointers.as_deref().map(<[String]>::len), Some(2));
        assert_eq!(entity.auth_chain.len(), 1);
        assert_eq!(
            entity.extra.get("entityTimestamp"),
            Some(&serde_json::json!(1_700_000_000_000_u64))
        );
    }

    #[test]
    fn notification_wire_shape() {
        let notification = DeploymentNotification::new(
            Entity::untyped("bafyworld"),
            vec!["https://worlds.example".to_string()],
        );

        let value: serde_json::Value =
            serde_json::from_str(&notification.to_json().expect("json")).expect("parse");
        assert_eq!(
            value,
            serde_json::json!({
                "entity": { "entityId": "bafyworld", "authChain": [] },
                "contentServerUrls": ["https://worlds.example"]
            })
        );
    }

    #[tokio::test]
    async fn mark_as_deployed_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let ack = MarkAsDeployed::new(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        ack.mark().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        MarkAsDeployed::noop().mark().await;
    }
}
