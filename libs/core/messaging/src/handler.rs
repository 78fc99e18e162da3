//! Handler trait for delivered messages.

use async_trait::async_trait;
use std::future::Future;

use crate::envelope::{MessageEnvelope, MessageInfo};
use crate::error::ProcessingError;

/// Message handler trait.
///
/// Implement this to define what happens to each delivered message. The pull
/// loop acknowledges the message when `handle` returns `Ok`; handlers never
/// ack themselves. An `Err` becomes a delayed redelivery, or a terminal
/// rejection once the delivery limit is reached.
///
/// # Example
///
/// ```rust,ignore
/// use messaging::{MessageEnvelope, MessageHandler, MessageInfo, ProcessingError};
/// use async_trait::async_trait;
///
/// struct InvoiceMailer {
///     mailer: Arc<dyn Mailer>,
/// }
///
/// #[async_trait]
/// impl MessageHandler<InvoiceIssued> for InvoiceMailer {
///     async fn handle(
///         &self,
///         envelope: &MessageEnvelope<InvoiceIssued>,
///         info: &MessageInfo,
///     ) -> Result<(), ProcessingError> {
///         self.mailer
///             .send(&envelope.data.email, &envelope.data.pdf_url)
///             .await
///             .map_err(|e| ProcessingError::handler_with_source("mail delivery failed", e))
///     }
///
///     fn name(&self) -> &'static str {
///         "invoice_mailer"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler<T: Send + Sync>: Send + Sync {
    async fn handle(
        &self,
        envelope: &MessageEnvelope<T>,
        info: &MessageInfo,
    ) -> Result<(), ProcessingError>;

    /// Used for logging and metrics labels.
    fn name(&self) -> &'static str;
}

/// A handler built from an async closure.
///
/// The closure receives owned copies of the envelope and info.
pub struct FnHandler<F> {
    name: &'static str,
    f: F,
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<T, F, Fut>(name: &'static str, f: F) -> FnHandler<F>
where
    F: Fn(MessageEnvelope<T>, MessageInfo) -> Fut,
    Fut: Future<Output = Result<(), ProcessingError>>,
{
    FnHandler { name, f }
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for FnHandler<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(MessageEnvelope<T>, MessageInfo) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProcessingError>> + Send,
{
    async fn handle(
        &self,
        envelope: &MessageEnvelope<T>,
        info: &MessageInfo,
    ) -> Result<(), ProcessingError> {
        (self.f)(envelope.clone(), info.clone()).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// A no-op handler for testing.
#[derive(Debug, Clone, Default)]
pub struct NoOpHandler;

#[async_trait]
impl<T: Send + Sync> MessageHandler<T> for NoOpHandler {
    async fn handle(
        &self,
        _envelope: &MessageEnvelope<T>,
        _info: &MessageInfo,
    ) -> Result<(), ProcessingError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop_handler"
    }
}

/// A handler that always fails (for testing).
#[derive(Debug, Clone)]
pub struct FailingHandler {
    error_message: String,
}

impl FailingHandler {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
        }
    }
}

#[async_trait]
impl<T: Send + Sync> MessageHandler<T> for FailingHandler {
    async fn handle(
        &self,
        _envelope: &MessageEnvelope<T>,
        _info: &MessageInfo,
    ) -> Result<(), ProcessingError> {
        Err(ProcessingError::handler(&self.error_message))
    }

    fn name(&self) -> &'static str {
        "failing_handler"
    }
}
