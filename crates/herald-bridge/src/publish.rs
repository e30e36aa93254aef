//! Notification publishing to pub/sub topics.
//!
//! Every deployment notification is serialized as a JSON object
//! `{"entity": ..., "contentServerUrls": [...]}` and sent as the message body.
//!
//! ## Implementations
//!
//! - [`PubSubPublisher`]: HTTP client for the Pub/Sub REST API
//!   (`POST {endpoint}/v1/{topic}:publish`)
//! - [`InMemoryPublisher`]: keeps messages in memory, for tests and local runs
//!
//! ## Error Mapping
//!
//! Non-success responses become [`Error::Http`], whose message embeds
//! `status: NNN`. The deployer relies on that token to decide whether a
//! failed deployment is worth retrying.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use herald_core::{DeploymentNotification, Error, Result};

use crate::metrics;

/// Provider response for a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Provider-assigned message id.
    pub message_id: String,
    /// Sequence number, for providers with ordered topics.
    pub sequence_number: Option<String>,
}

/// Publishes deployment notifications to a single topic.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Returns the topic this publisher writes to.
    fn topic(&self) -> &str;

    /// Publishes one notification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the provider rejects the message and
    /// [`Error::Publish`] when no response was received.
    async fn publish(&self, notification: &DeploymentNotification) -> Result<PublishReceipt>;
}

/// Configuration for [`PubSubPublisher`].
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// Base URL of the Pub/Sub API.
    pub endpoint: String,
    /// Full topic path (`projects/{project}/topics/{topic}`).
    pub topic: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl PubSubConfig {
    /// Default Pub/Sub API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://pubsub.googleapis.com";

    /// Creates a configuration for `topic` against the default endpoint.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            topic: topic.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the API endpoint (emulators, local fakes).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Returns the publish URL for the configured topic.
    #[must_use]
    pub fn publish_url(&self) -> String {
        format!(
            "{}/v1/{}:publish",
            self.endpoint.trim_end_matches('/'),
            self.topic
        )
    }
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Debug, Serialize)]
struct PubsubMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Pub/Sub REST publisher.
pub struct PubSubPublisher {
    config: PubSubConfig,
    client: reqwest::Client,
    #[cfg(feature = "gcp")]
    token_provider: Option<Arc<dyn gcp_auth::TokenProvider>>,
}

impl std::fmt::Debug for PubSubPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubPublisher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PubSubPublisher {
    /// Creates an unauthenticated publisher.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is empty or the HTTP client cannot be built.
    pub fn new(config: PubSubConfig) -> Result<Self> {
        if config.topic.is_empty() {
            return Err(Error::configuration("topic cannot be empty"));
        }
        if config.endpoint.is_empty() {
            return Err(Error::configuration("endpoint cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            #[cfg(feature = "gcp")]
            token_provider: None,
        })
    }

    /// Creates a publisher authenticated with ambient GCP credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no credentials
    /// can be discovered.
    #[cfg(feature = "gcp")]
    pub async fn with_gcp_auth(config: PubSubConfig) -> Result<Self> {
        let mut publisher = Self::new(config)?;
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| Error::configuration(format!("Failed to initialize GCP auth: {e}")))?;
        publisher.token_provider = Some(provider);
        Ok(publisher)
    }

    #[cfg(feature = "gcp")]
    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let Some(provider) = &self.token_provider else {
            return Ok(request);
        };
        let scopes = &["https://www.googleapis.com/auth/pubsub"];
        let token = provider
            .token(scopes)
            .await
            .map_err(|e| Error::publish(format!("Failed to get GCP access token: {e}")))?;
        Ok(request.bearer_auth(token.as_str()))
    }

    #[cfg(not(feature = "gcp"))]
    #[allow(clippy::unused_async)]
    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        Ok(request)
    }
}

#[async_trait]
impl Publisher for PubSubPublisher {
    fn topic(&self) -> &str {
        &self.config.topic
    }

    async fn publish(&self, notification: &DeploymentNotification) -> Result<PublishReceipt> {
        let body = notification.to_json()?;
        let request = PublishRequest {
            messages: vec![PubsubMessage {
                data: base64::engine::general_purpose::STANDARD.encode(body),
            }],
        };

        let builder = self.client.post(self.config.publish_url()).json(&request);
        let response = self
            .authorize(builder)
            .await?
            .send()
            .await
            .map_err(|e| Error::publish(format!("Failed to send publish request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::http(
                status.as_u16(),
                format!("publish to {} rejected: {body}", self.config.topic),
            ));
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| Error::serialization(format!("Failed to parse publish response: {e}")))?;
        let message_id = parsed.message_ids.into_iter().next().ok_or_else(|| {
            Error::serialization("publish response did not contain a message id")
        })?;

        metrics::record_notification_published(&self.config.topic);
        tracing::info!(
            topic = %self.config.topic,
            message_id = %message_id,
            entity_id = %notification.entity.entity_id,
            "Notification sent"
        );

        Ok(PublishReceipt {
            message_id,
            sequence_number: None,
        })
    }
}

/// A notification captured by [`InMemoryPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Message id assigned on publish.
    pub message_id: String,
    /// The notification that was published.
    pub notification: DeploymentNotification,
}

/// In-memory [`Publisher`].
///
/// Assigns ULID message ids and a monotonically increasing sequence number.
#[derive(Debug, Clone)]
pub struct InMemoryPublisher {
    topic: String,
    messages: Arc<RwLock<Vec<PublishedMessage>>>,
}

impl InMemoryPublisher {
    /// Creates an empty publisher for `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            messages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Returns a snapshot of published messages in publish order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn messages(&self) -> Result<Vec<PublishedMessage>> {
        let messages = self.messages.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(messages.clone())
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, notification: &DeploymentNotification) -> Result<PublishReceipt> {
        let mut messages = self.messages.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let message_id = Ulid::new().to_string();
        messages.push(PublishedMessage {
            message_id: message_id.clone(),
            notification: notification.clone(),
        });
        let sequence_number = messages.len().to_string();
        drop(messages);

        metrics::record_notification_published(&self.topic);
        tracing::debug!(topic = %self.topic, message_id = %message_id, "Notification stored");

        Ok(PublishReceipt {
            message_id,
            sequence_number: Some(sequence_number),
        })
    }
}
