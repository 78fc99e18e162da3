//! NATS JetStream adapter for the `messaging` delivery pipeline.
//!
//! [`NatsSession`] implements every broker trait `messaging` needs, so the
//! generic publisher, reconciler and pull loop run unchanged on JetStream.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐     ┌─────────────────────┐     ┌────────────────┐
//! │   Publisher    │────▶│   NATS JetStream    │────▶│    PullLoop    │
//! │ (Nats-Msg-Id,  │     │  (Durable Stream,   │     │ (ack / nak /   │
//! │ expected strm) │     │   pull consumer)    │     │  term)         │
//! └────────────────┘     └─────────────────────┘     └────────────────┘
//!         ▲                                                   │
//!         │              ┌─────────────────────┐              ▼
//!         └──────────────│     NatsSession     │     ┌────────────────┐
//!                        │ (connect, guard,    │     │  Dedup guard   │
//!                        │  drain)             │     │ (your handler) │
//!                        └─────────────────────┘     └────────────────┘
//! ```
//!
//! # Key Features
//!
//! - **Subject provisioning**: publishing to a subject the stream does not
//!   cover yet extends the stream's subject list
//! - **Consumer reconciliation**: durable consumers are created or have their
//!   filters updated before every pull attempt
//! - **Bounded redelivery**: failed messages are nak'd with a delay and
//!   terminated on their last allowed delivery
//! - **Graceful shutdown**: draining flips the session unusable so loops stop
//!   without retrying
//!
//! # Example
//!
//! ```rust,ignore
//! use core_config::{FromEnv, NatsConfig};
//! use nats_worker::{NatsWorker, WorkerConfig};
//!
//! let worker = NatsWorker::connect(&NatsConfig::from_env()?, WorkerConfig::from_env()?).await?;
//! worker.run(&handler, stop_rx).await?;
//! ```

mod admin;
mod consumer;
mod error;
mod producer;
mod session;
mod worker;

pub use consumer::NatsDelivery;
pub use error::NatsError;
pub use session::NatsSession;
pub use worker::{NatsWorker, WorkerConfig};

// Re-export from messaging
pub use messaging::{
    ConsumerSpec, MessageEnvelope, MessageHandler, MessageInfo, ProcessingError, PublishAck,
};
