//! Delivery-reliability primitives for JetStream-style brokers.
//!
//! This library keeps the broker behind a handful of traits and builds the
//! reliability rules on top of them:
//! - **Publishing**: subject provisioning, expected-stream guard, message-id
//!   deduplication and bounded retry ([`Publisher`])
//! - **Consuming**: durable consumer reconciliation and a strictly sequential
//!   pull loop with ack / nak / term dispositions ([`PullLoop`])
//! - **Effectively-once**: processed-id records written in the handler's own
//!   transaction ([`DeduplicationGuard`])
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────────────┐     ┌─────────────┐
//! │    Your Code     │     │        messaging         │     │  Backends   │
//! │                  │     │                          │     │             │
//! │  MessageEnvelope │────▶│ Publisher ─▶ Provisioner │────▶│ nats-worker │
//! │  MessageHandler  │◀────│ PullLoop ─▶ Reconciler   │◀────│ (JetStream) │
//! │  Tx handler      │◀────│ DeduplicationGuard       │◀────│ database    │
//! └──────────────────┘     └──────────────────────────┘     └─────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use messaging::{ConsumerSpec, MessageEnvelope, Publisher, PullLoop};
//!
//! let publisher = Publisher::new(broker.clone());
//! let envelope = MessageEnvelope::new("orders.created", order, "checkout");
//! publisher.publish("ORDERS", &envelope).await?;
//!
//! let spec = ConsumerSpec::new("ORDERS", "billing", ["orders.>"]);
//! PullLoop::new(broker).run(&spec, &handler, stop_rx).await?;
//! ```

mod broker;
mod config;
mod dedup;
mod envelope;
mod error;
mod handler;
mod metrics;
mod provisioner;
mod publisher;
mod pull_loop;
mod reconciler;
mod retry;
mod subject;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::{
    ConnectionGuard, ConsumerAdmin, Delivery, DeliveryStream, MessagePublisher, PublishAck,
    PublishRequest, PullSubscriber, StreamAdmin,
};
pub use config::{
    BackoffStrategy, ConsumerDef, ConsumerOverrides, ConsumerSpec, DeliverPolicy, PullOptions,
    PullOverrides, ReplayPolicy, RetryPolicy,
};
pub use dedup::{
    DeduplicatingHandler, DeduplicationGuard, ProcessOutcome, ProcessedRecord, ProcessedStore,
    TransactionalHandler,
};
pub use envelope::{MessageEnvelope, MessageInfo};
pub use error::{
    BrokerError, ConsumeError, ProcessingError, PublishError, StoreError, ValidationError,
};
pub use handler::{handler_fn, FailingHandler, FnHandler, MessageHandler, NoOpHandler};
pub use metrics::DeliveryMetrics;
pub use provisioner::{ProvisionOutcome, SubjectProvisioner};
pub use publisher::{encode_envelope, Publisher};
pub use pull_loop::{FailureDisposition, PullLoop, RedeliveryPolicy};
pub use reconciler::{ConsumerReconciler, ReconcileOutcome};
pub use retry::{retry_with_backoff, RetryError};
pub use subject::{is_covered, subject_matches, validate_publish_subject};
