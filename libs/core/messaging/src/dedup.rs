//! Effectively-once processing on top of at-least-once delivery.
//!
//! [`DeduplicationGuard::process_once`] runs a handler inside a store
//! transaction and records the message id in the same transaction, so the
//! handler's writes and the processed record commit or roll back together:
//!
//! ```text
//! begin ─▶ processed? ─yes─▶ rollback ─▶ AlreadyProcessed
//!              │no
//!              ▼
//!          handler(tx) ─▶ record(tx) ─▶ commit ─▶ Processed(result)
//! ```
//!
//! An envelope with a nil id is refused before any transaction is opened.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::envelope::{MessageEnvelope, MessageInfo};
use crate::error::{ProcessingError, StoreError, ValidationError};
use crate::handler::MessageHandler;
use crate::metrics;

/// Marker that a message id has been fully processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub message_id: Uuid,
    pub subject: String,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedRecord {
    pub fn for_envelope<T>(envelope: &MessageEnvelope<T>) -> Self {
        Self {
            message_id: envelope.id,
            subject: envelope.subject.clone(),
            processed_at: Utc::now(),
        }
    }
}

/// Transactional storage for processed records.
///
/// `record_processed` must report a concurrent insert of the same id as
/// [`StoreError::Duplicate`].
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn is_processed(&self, tx: &mut Self::Tx, message_id: Uuid) -> Result<bool, StoreError>;

    async fn record_processed(
        &self,
        tx: &mut Self::Tx,
        record: ProcessedRecord,
    ) -> Result<(), StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;
}

/// A handler whose writes go through the deduplication transaction.
#[async_trait]
pub trait TransactionalHandler<T: Send + Sync, Tx: Send>: Send + Sync {
    type Output: Send;

    async fn handle(
        &self,
        envelope: &MessageEnvelope<T>,
        tx: &mut Tx,
    ) -> Result<Self::Output, ProcessingError>;

    fn name(&self) -> &'static str;
}

/// Result of [`DeduplicationGuard::process_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome<R> {
    /// A previous delivery was already committed; the handler did not run
    AlreadyProcessed,
    Processed(R),
}

impl<R> ProcessOutcome<R> {
    pub fn is_already_processed(&self) -> bool {
        matches!(self, ProcessOutcome::AlreadyProcessed)
    }
}

pub struct DeduplicationGuard<S> {
    store: Arc<S>,
}

impl<S> Clone for DeduplicationGuard<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: ProcessedStore> DeduplicationGuard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn process_once<T, H>(
        &self,
        envelope: &MessageEnvelope<T>,
        handler: &H,
    ) -> Result<ProcessOutcome<H::Output>, ProcessingError>
    where
        T: Send + Sync,
        H: TransactionalHandler<T, S::Tx>,
    {
        if !envelope.has_id() {
            return Err(ValidationError::MissingId.into());
        }

        let mut tx = self.store.begin().await?;

        let outcome = self.run_in_tx(envelope, handler, &mut tx).await;

        match outcome {
            Ok(ProcessOutcome::Processed(output)) => {
                self.store.commit(tx).await?;
                debug!(message_id = %envelope.id, handler = handler.name(), "Message processed");
                Ok(ProcessOutcome::Processed(output))
            }
            Ok(ProcessOutcome::AlreadyProcessed) => {
                self.rollback(tx, envelope.id).await;
                debug!(message_id = %envelope.id, "Message already processed, skipping");
                Ok(ProcessOutcome::AlreadyProcessed)
            }
            Err(err) => {
                self.rollback(tx, envelope.id).await;
                Err(err)
            }
        }
    }

    async fn run_in_tx<T, H>(
        &self,
        envelope: &MessageEnvelope<T>,
        handler: &H,
        tx: &mut S::Tx,
    ) -> Result<ProcessOutcome<H::Output>, ProcessingError>
    where
        T: Send + Sync,
        H: TransactionalHandler<T, S::Tx>,
    {
        if self.store.is_processed(tx, envelope.id).await? {
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let output = handler.handle(envelope, tx).await?;
        self.store
            .record_processed(tx, ProcessedRecord::for_envelope(envelope))
            .await?;

        Ok(ProcessOutcome::Processed(output))
    }

    async fn rollback(&self, tx: S::Tx, message_id: Uuid) {
        if let Err(err) = self.store.rollback(tx).await {
            warn!(message_id = %message_id, error = %err, "Rollback failed");
        }
    }
}

/// Adapts a [`TransactionalHandler`] to a [`MessageHandler`] for the pull loop.
///
/// Already-processed messages count as success so they are acked; the
/// handler's output is discarded.
pub struct DeduplicatingHandler<S, H> {
    guard: DeduplicationGuard<S>,
    inner: H,
}

impl<S, H> DeduplicatingHandler<S, H> {
    pub fn new(guard: DeduplicationGuard<S>, inner: H) -> Self {
        Self { guard, inner }
    }
}

#[async_trait]
impl<T, S, H> MessageHandler<T> for DeduplicatingHandler<S, H>
where
    T: Send + Sync,
    S: ProcessedStore,
    H: TransactionalHandler<T, S::Tx>,
{
    async fn handle(
        &self,
        envelope: &MessageEnvelope<T>,
        info: &MessageInfo,
    ) -> Result<(), ProcessingError> {
        match self.guard.process_once(envelope, &self.inner).await? {
            ProcessOutcome::AlreadyProcessed => {
                metrics::record_duplicate_skipped(self.inner.name());
                debug!(
                    message_id = %envelope.id,
                    delivery_count = info.delivery_count,
                    "Duplicate delivery acknowledged without processing"
                );
                Ok(())
            }
            ProcessOutcome::Processed(_) => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
