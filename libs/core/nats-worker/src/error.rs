//! Error types for NATS worker.

use messaging::BrokerError;
use thiserror::Error;

/// Error that can occur while setting up or tearing down a NATS session.
#[derive(Debug, Error)]
pub enum NatsError {
    /// Every connect attempt failed
    #[error("failed to connect to NATS after {attempts} attempt(s): {cause}")]
    Connect { attempts: u32, cause: String },

    /// A configured server URL could not be parsed
    #[error("invalid NATS server address '{server}': {details}")]
    InvalidServer { server: String, details: String },

    /// JetStream error
    #[error("JetStream error: {0}")]
    JetStream(#[from] BrokerError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] core_config::ConfigError),

    /// Draining the connection failed
    #[error("failed to drain NATS connection: {0}")]
    Drain(String),
}

/// Map an async-nats error onto a [`BrokerError`] by its rendered message.
///
/// The client exposes a different error kind per operation; the rendered
/// text carries the JetStream error code or description in every case.
pub(crate) fn classify(error: impl std::fmt::Display) -> BrokerError {
    let message = error.to_string();
    let lower = message.to_lowercase();

    // 10014 consumer not found, 10059 stream not found
    if lower.contains("not found") || message.contains("10014") || message.contains("10059") {
        return BrokerError::NotFound(message);
    }

    const TRANSIENT: [&str; 6] = [
        "timed out",
        "timeout",
        "no responders",
        "disconnected",
        "connection",
        "broken pipe",
    ];
    if TRANSIENT.iter().any(|needle| lower.contains(needle)) {
        return BrokerError::Unavailable(message);
    }

    BrokerError::Rejected(message)
}
