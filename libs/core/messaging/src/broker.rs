//! Narrow traits the pipeline uses to talk to a broker session.
//!
//! The `nats-worker` crate implements all of them for an async-nats session;
//! tests use in-memory fakes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

use crate::config::{ConsumerSpec, PullOptions};
use crate::envelope::MessageInfo;
use crate::error::BrokerError;

/// Reports whether the broker session may still be used.
///
/// Long-running operations consult it before and after every blocking call.
pub trait ConnectionGuard: Send + Sync {
    /// `false` once the session is draining or closed.
    fn is_usable(&self) -> bool;
}

/// Read and update a stream's subject filters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamAdmin: Send + Sync {
    async fn stream_subjects(&self, stream: &str) -> Result<Vec<String>, BrokerError>;

    /// Replace the stream's subject filters, keeping the rest of its config.
    async fn set_stream_subjects(
        &self,
        stream: &str,
        subjects: Vec<String>,
    ) -> Result<(), BrokerError>;
}

/// Look up, create and update durable pull consumers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerAdmin: Send + Sync {
    /// Current filter subjects of a consumer; [`BrokerError::NotFound`] if it does not exist.
    async fn consumer_filters(&self, stream: &str, consumer: &str)
        -> Result<Vec<String>, BrokerError>;

    async fn create_consumer(&self, spec: &ConsumerSpec) -> Result<(), BrokerError>;

    async fn update_consumer(&self, spec: &ConsumerSpec) -> Result<(), BrokerError>;
}

/// One message to append to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Stream the broker must route the message to; anything else is rejected
    pub expected_stream: String,
    pub subject: String,
    /// Broker-side deduplication key
    pub message_id: String,
    pub payload: Vec<u8>,
}

/// Broker acknowledgement of a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    /// The broker already held a message with the same id
    pub duplicate: bool,
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, request: PublishRequest) -> Result<PublishAck, BrokerError>;
}

/// A message handed out by a pull subscription.
///
/// Disposition methods consume the delivery, so each message gets at most one.
#[async_trait]
pub trait Delivery: Send + Sized + 'static {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    fn stream_sequence(&self) -> u64;

    /// 1 on first delivery
    fn delivery_count(&self) -> u64;

    fn info(&self) -> MessageInfo {
        MessageInfo {
            subject: self.subject().to_string(),
            stream_sequence: self.stream_sequence(),
            delivery_count: self.delivery_count(),
        }
    }

    async fn ack(self) -> Result<(), BrokerError>;

    /// Negative-acknowledge; the broker redelivers after `delay`.
    async fn nak(self, delay: Duration) -> Result<(), BrokerError>;

    /// Reject for good; the broker stops redelivering.
    async fn term(self) -> Result<(), BrokerError>;
}

pub type DeliveryStream<D> = BoxStream<'static, Result<D, BrokerError>>;

#[async_trait]
pub trait PullSubscriber: Send + Sync {
    type Delivery: Delivery;

    /// Open a pull subscription on an existing consumer.
    ///
    /// With `options.no_wait` the stream ends after a single bounded fetch.
    async fn subscribe(
        &self,
        spec: &ConsumerSpec,
        options: &PullOptions,
    ) -> Result<DeliveryStream<Self::Delivery>, BrokerError>;
}
