//! Publisher double with failure injection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use herald_bridge::{PublishReceipt, Publisher};
use herald_core::{DeploymentNotification, Error, Result};

#[derive(Debug, Clone)]
enum Failure {
    Status(u16),
    Message(String),
}

impl Failure {
    fn to_error(&self, topic: &str) -> Error {
        match self {
            Self::Status(status) => Error::http(*status, format!("publish to {topic} rejected")),
            Self::Message(message) => Error::publish(message.clone()),
        }
    }
}

/// [`Publisher`] that records notifications in publish order.
#[derive(Debug, Clone)]
pub struct RecordingPublisher {
    topic: String,
    published: Arc<Mutex<Vec<DeploymentNotification>>>,
    failure: Arc<Mutex<Option<Failure>>>,
    failing_ids: Arc<Mutex<HashSet<String>>>,
}

impl RecordingPublisher {
    /// Creates a publisher for `topic` that always succeeds.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            published: Arc::default(),
            failure: Arc::default(),
            failing_ids: Arc::default(),
        }
    }

    /// Makes every publish fail with an HTTP error of `status`.
    pub fn fail_with_status(&self, status: u16) {
        *self.failure.lock().expect("lock") = Some(Failure::Status(status));
    }

    /// Makes every publish fail with a transport error carrying `message`.
    pub fn fail_with_message(&self, message: impl Into<String>) {
        *self.failure.lock().expect("lock") = Some(Failure::Message(message.into()));
    }

    /// Makes publishes of one entity fail with a 500.
    pub fn fail_entity(&self, entity_id: impl Into<String>) {
        self.failing_ids.lock().expect("lock").insert(entity_id.into());
    }

    /// Clears injected failures.
    pub fn recover(&self) {
        *self.failure.lock().expect("lock") = None;
        self.failing_ids.lock().expect("lock").clear();
    }

    /// Returns published notifications.
    pub fn published(&self) -> Vec<DeploymentNotification> {
        self.published.lock().expect("lock").clone()
    }

    /// Returns ids of published entities.
    pub fn published_ids(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|notification| notification.entity.entity_id)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, notification: &DeploymentNotification) -> Result<PublishReceipt> {
        if let Some(failure) = self.failure.lock().expect("lock").as_ref() {
            return Err(failure.to_error(&self.topic));
        }
        if self
            .failing_ids
            .lock()
            .expect("lock")
            .contains(&notification.entity.entity_id)
        {
            return Err(Failure::Status(500).to_error(&self.topic));
        }

        let mut published = self.published.lock().expect("lock");
        published.push(notification.clone());
        Ok(PublishReceipt {
            message_id: format!("{}-{}", self.topic, published.len()),
            sequence_number: None,
        })
    }
}
