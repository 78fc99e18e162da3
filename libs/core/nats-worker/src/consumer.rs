//! Pull subscriptions and per-message dispositions.

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::{AckKind, Message};
use async_trait::async_trait;
use futures::StreamExt;
use messaging::{BrokerError, ConsumerSpec, Delivery, DeliveryStream, PullOptions, PullSubscriber};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::session::{NatsSession, SessionState};

#[async_trait]
impl PullSubscriber for NatsSession {
    type Delivery = NatsDelivery;

    async fn subscribe(
        &self,
        spec: &ConsumerSpec,
        options: &PullOptions,
    ) -> Result<DeliveryStream<NatsDelivery>, BrokerError> {
        let consumer: PullConsumer = self
            .stream(&spec.stream_name)
            .await?
            .get_consumer(&spec.consumer_name)
            .await
            .map_err(|e| self.state().broker_error(e))?;

        let state = self.state().clone();

        if options.no_wait {
            debug!(consumer = %spec.consumer_name, batch = options.batch_size, "Fetching one batch");
            let batch = consumer
                .fetch()
                .max_messages(options.batch_size)
                .max_bytes(options.max_bytes)
                .expires(options.expires)
                .messages()
                .await
                .map_err(|e| self.state().broker_error(e))?;
            Ok(batch.map(move |item| to_delivery(item, &state)).boxed())
        } else {
            let messages = consumer
                .stream()
                .max_messages_per_batch(options.batch_size)
                .max_bytes_per_batch(options.max_bytes)
                .expires(options.expires)
                .heartbeat(options.idle_heartbeat)
                .messages()
                .await
                .map_err(|e| self.state().broker_error(e))?;
            Ok(messages.map(move |item| to_delivery(item, &state)).boxed())
        }
    }
}

fn to_delivery<E: std::fmt::Display>(
    item: Result<Message, E>,
    state: &Arc<SessionState>,
) -> Result<NatsDelivery, BrokerError> {
    match item {
        Ok(message) => NatsDelivery::new(message, state.clone()),
        Err(e) => Err(state.broker_error(e)),
    }
}

/// A JetStream message awaiting its disposition.
pub struct NatsDelivery {
    message: Message,
    stream_sequence: u64,
    delivery_count: u64,
    state: Arc<SessionState>,
}

impl NatsDelivery {
    fn new(message: Message, state: Arc<SessionState>) -> Result<Self, BrokerError> {
        let (stream_sequence, delivery_count) = {
            let info = message
                .info()
                .map_err(|e| BrokerError::rejected(format!("message without JetStream metadata: {}", e)))?;
            (info.stream_sequence, info.delivered.max(1) as u64)
        };

        Ok(Self {
            message,
            stream_sequence,
            delivery_count,
            state,
        })
    }

    async fn settle(self, kind: AckKind) -> Result<(), BrokerError> {
        self.message
            .ack_with(kind)
            .await
            .map_err(|e| self.state.broker_error(e))
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn subject(&self) -> &str {
        self.message.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn stream_sequence(&self) -> u64 {
        self.stream_sequence
    }

    fn delivery_count(&self) -> u64 {
        self.delivery_count
    }

    async fn ack(self) -> Result<(), BrokerError> {
        self.settle(AckKind::Ack).await
    }

    async fn nak(self, delay: Duration) -> Result<(), BrokerError> {
        self.settle(AckKind::Nak(Some(delay))).await
    }

    async fn term(self) -> Result<(), BrokerError> {
        self.settle(AckKind::Term).await
    }
}
