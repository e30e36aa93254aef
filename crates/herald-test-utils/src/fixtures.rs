//! Entity fixtures and acknowledgment probes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use herald_core::{Entity, EntityType, MarkAsDeployed};

/// Content server list used by fixtures.
pub const CONTENT_SERVER: &str = "https://peer.example.org/content";

/// Creates a scene entity with the given pointers.
pub fn scene<I, S>(entity_id: &str, pointers: I) -> Entity
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Entity::new(entity_id, EntityType::Scene).with_pointers(pointers)
}

/// Creates a scene entity without pointers.
pub fn scene_without_pointers(entity_id: &str) -> Entity {
    Entity::new(entity_id, EntityType::Scene)
}

/// Creates a wearable entity.
pub fn wearable(entity_id: &str) -> Entity {
    Entity::new(entity_id, EntityType::Wearable).with_pointers(["urn:wearable:1"])
}

/// Creates an emote entity.
pub fn emote(entity_id: &str) -> Entity {
    Entity::new(entity_id, EntityType::Emote).with_pointers(["urn:emote:1"])
}

/// Creates a profile entity, which no topic accepts.
pub fn profile(entity_id: &str) -> Entity {
    Entity::new(entity_id, "profile").with_pointers(["0xabc"])
}

/// Returns the fixture content server list.
pub fn content_servers() -> Vec<String> {
    vec![CONTENT_SERVER.to_string()]
}

/// Counts invocations of the acknowledgment handles it hands out.
#[derive(Debug, Clone, Default)]
pub struct AckProbe {
    count: Arc<AtomicUsize>,
}

impl AckProbe {
    /// Creates a probe with a zero count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle that increments the count when marked.
    pub fn handle(&self) -> MarkAsDeployed {
        let count = Arc::clone(&self.count);
        MarkAsDeployed::new(move || async move {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Returns the number of acknowledgments observed.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}
