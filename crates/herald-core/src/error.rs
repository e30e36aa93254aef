//! Error types and result aliases for herald.
//!
//! Errors carry enough context to be logged verbatim. Transport failures keep
//! the HTTP status inside the rendered message (`status: NNN`) because the
//! deployment pipeline decides retryability from the message text alone.

use std::sync::LazyLock;

use regex::Regex;

/// The result type used throughout herald.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in herald operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The service was configured incorrectly.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// Publishing a notification failed before a response was received.
    #[error("publish error: {message}")]
    Publish {
        /// Description of the publish failure.
        message: String,
    },

    /// Fetching a remote resource failed before a response was read.
    #[error("fetch error: {message}")]
    Fetch {
        /// Description of the fetch failure.
        message: String,
    },

    /// A remote endpoint answered with a non-success HTTP status.
    #[error("http error (status: {status}): {message}")]
    Http {
        /// HTTP status code returned by the remote endpoint.
        status: u16,
        /// Response body or description.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new publish error.
    #[must_use]
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }

    /// Creates a new fetch error.
    #[must_use]
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    /// Creates a new HTTP status error.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Returns true if retrying the failed operation may succeed.
    ///
    /// See [`is_retryable`].
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        is_retryable(&self.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

static CLIENT_ERROR_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"status: 4\d{2}").expect("client error regex is valid"));

/// Classifies an error message as retryable or permanent.
///
/// A message that embeds a 4xx status (`status: 404`) describes a request that
/// will never succeed and is permanent. Everything else (5xx, network,
/// storage, messages without any status token) is treated as transient.
#[must_use]
pub fn is_retryable(message: &str) -> bool {
    !CLIENT_ERROR_STATUS.is_match(message)
}
