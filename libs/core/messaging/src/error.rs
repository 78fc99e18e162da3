//! Error types for publishing, consuming and processing.

use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a broker adapter.
///
/// Adapters map their transport errors onto these variants so the pipeline
/// can decide between retrying, stopping quietly and giving up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Transport failure or timeout; worth retrying
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The session is draining or closed
    #[error("broker connection is draining or closed")]
    ConnectionClosed,

    /// The requested stream or consumer does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The broker answered but refused the request
    #[error("broker rejected request: {0}")]
    Rejected(String),
}

impl BrokerError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Input rejected before anything is sent to the broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message id is missing")]
    MissingId,

    #[error("message subject is empty")]
    EmptySubject,

    #[error("invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: &'static str },

    #[error("message data is missing")]
    MissingData,

    #[error("stream name is empty")]
    EmptyStreamName,

    #[error("consumer name is empty")]
    EmptyConsumerName,

    #[error("consumer has no subject filters")]
    NoSubjectFilters,

    #[error("{field} must be at least 1")]
    OutOfRange { field: &'static str },
}

/// Error returned by [`Publisher::publish`](crate::Publisher::publish).
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker connection is draining or closed")]
    ConnectionClosed,

    #[error("publish failed after {attempts} attempt(s): {cause}")]
    Failed {
        attempts: u32,
        #[source]
        cause: BrokerError,
    },
}

/// Error returned by [`PullLoop::run`](crate::PullLoop::run).
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("consumer failed after {attempts} attempt(s): {cause}")]
    Failed {
        attempts: u32,
        #[source]
        cause: BrokerError,
    },
}

/// Error raised by a deduplication store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction recorded the same message first
    #[error("message {0} was already recorded as processed")]
    Duplicate(Uuid),

    #[error("store error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Error that can occur while handling a delivered message.
///
/// Never escapes the pull loop; every variant ends in a nak or a term.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The handler reported a failure
    #[error("handler error: {message}")]
    Handler {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The payload is not a valid envelope for the handler's data type
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The payload parsed but is not a usable envelope (e.g. nil id)
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessingError {
    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            source: None,
        }
    }

    /// Create a handler error with a source.
    pub fn handler_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Handler {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Handler { .. } => "handler",
            ProcessingError::Payload(_) => "payload",
            ProcessingError::InvalidEnvelope(_) => "invalid_envelope",
            ProcessingError::Store(StoreError::Duplicate(_)) => "duplicate",
            ProcessingError::Store(_) => "store",
        }
    }
}
