//! Pull-and-dispatch loop for a durable consumer.
//!
//! One loop handles one consumer strictly sequentially:
//!
//! ```text
//! reconcile consumer ─▶ open pull subscription ─▶ for each message:
//!     parse envelope ─▶ handler ─▶ ack | nak(delay) | term
//! ```
//!
//! The whole sequence is retried a bounded number of times on broker
//! errors. A draining or closed connection, or the stop signal, ends the
//! loop quietly.

use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{ConnectionGuard, ConsumerAdmin, Delivery, PullSubscriber};
use crate::config::{ConsumerSpec, PullOptions, PullOverrides, RetryPolicy};
use crate::envelope::MessageEnvelope;
use crate::error::{BrokerError, ConsumeError, ProcessingError, ValidationError};
use crate::handler::MessageHandler;
use crate::metrics::DeliveryMetrics;
use crate::reconciler::ConsumerReconciler;
use crate::retry::{retry_with_backoff, RetryError};

/// How failed deliveries are disposed of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Delivery count at which a failing message is terminated instead of nak'd
    pub max_deliveries: u64,
    /// Redelivery delay requested with each nak
    pub nak_delay: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_deliveries: 3,
            nak_delay: Duration::from_millis(5000),
        }
    }
}

/// Disposition of a message whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Nak(Duration),
    Term,
}

impl RedeliveryPolicy {
    pub fn on_failure(&self, delivery_count: u64) -> FailureDisposition {
        if delivery_count >= self.max_deliveries {
            FailureDisposition::Term
        } else {
            FailureDisposition::Nak(self.nak_delay)
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Runs a handler against a durable pull consumer.
pub struct PullLoop<B> {
    broker: Arc<B>,
    reconciler: ConsumerReconciler<B>,
    pull_options: PullOptions,
    redelivery: RedeliveryPolicy,
    retry_policy: RetryPolicy,
}

impl<B> PullLoop<B>
where
    B: ConnectionGuard + ConsumerAdmin + PullSubscriber,
{
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            reconciler: ConsumerReconciler::new(broker.clone()),
            broker,
            pull_options: PullOptions::default(),
            redelivery: RedeliveryPolicy::default(),
            retry_policy: RetryPolicy::consume(),
        }
    }

    /// Layer pull overrides over the defaults.
    pub fn with_pull_overrides(mut self, overrides: &PullOverrides) -> Self {
        self.pull_options = overrides.resolve(PullOptions::default());
        self
    }

    pub fn with_redelivery_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery = policy;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn pull_options(&self) -> &PullOptions {
        &self.pull_options
    }

    /// Consume `spec` with `handler` until the subscription is drained, the
    /// stop signal fires, or the connection goes away.
    ///
    /// Setting the watched value to `true` requests a stop; it is honoured
    /// between messages and while waiting for the next one. A dropped sender
    /// never stops the loop.
    pub async fn run<T, H>(
        &self,
        spec: &ConsumerSpec,
        handler: &H,
        stop: watch::Receiver<bool>,
    ) -> Result<(), ConsumeError>
    where
        T: DeserializeOwned + Send + Sync,
        H: MessageHandler<T>,
    {
        spec.validate()?;

        info!(
            stream = %spec.stream_name,
            consumer = %spec.consumer_name,
            handler = handler.name(),
            "Starting pull loop"
        );

        let result = retry_with_backoff(
            &self.retry_policy,
            |attempt| {
                let stop = stop.clone();
                async move { self.run_attempt(spec, handler, stop, attempt).await }
            },
            |err: &BrokerError| !err.is_connection_closed(),
        )
        .await;

        match result {
            Ok(()) => {
                info!(consumer = %spec.consumer_name, "Pull loop finished");
                Ok(())
            }
            Err(RetryError::Aborted { .. }) => {
                info!(consumer = %spec.consumer_name, "Connection closed, pull loop stopped");
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(
                    consumer = %spec.consumer_name,
                    attempts,
                    error = %last,
                    "Pull loop gave up"
                );
                Err(ConsumeError::Failed {
                    attempts,
                    cause: last,
                })
            }
        }
    }

    async fn run_attempt<T, H>(
        &self,
        spec: &ConsumerSpec,
        handler: &H,
        mut stop: watch::Receiver<bool>,
        attempt: u32,
    ) -> Result<(), BrokerError>
    where
        T: DeserializeOwned + Send + Sync,
        H: MessageHandler<T>,
    {
        if !self.broker.is_usable() || stop_requested(&stop) {
            return Ok(());
        }

        self.reconciler.reconcile(spec).await?;

        let mut messages = self.broker.subscribe(spec, &self.pull_options).await?;
        let metrics = DeliveryMetrics::new(&spec.stream_name, &spec.consumer_name);
        debug!(consumer = %spec.consumer_name, attempt, "Pull subscription open");

        loop {
            if !self.broker.is_usable() || stop_requested(&stop) {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                next = messages.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => return Err(err),
                None => break,
            };

            if !self.broker.is_usable() || stop_requested(&stop) {
                debug!(
                    sequence = delivery.stream_sequence(),
                    "Stopping before processing; message left for redelivery"
                );
                break;
            }

            if let Flow::Stop = self.dispatch(delivery, handler, &metrics).await {
                break;
            }
        }

        if self.broker.is_usable() {
            debug!(consumer = %spec.consumer_name, "Pull subscription drained");
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }

    /// Handle one message and give it exactly one disposition.
    async fn dispatch<T, H>(
        &self,
        delivery: B::Delivery,
        handler: &H,
        metrics: &DeliveryMetrics,
    ) -> Flow
    where
        T: DeserializeOwned + Send + Sync,
        H: MessageHandler<T>,
    {
        let info = delivery.info();
        metrics.message_received();

        let started = Instant::now();
        let result = match serde_json::from_slice::<MessageEnvelope<T>>(delivery.payload()) {
            Ok(envelope) if !envelope.has_id() => {
                Err(ProcessingError::InvalidEnvelope(ValidationError::MissingId))
            }
            Ok(envelope) => {
                debug!(
                    subject = %info.subject,
                    message_id = %envelope.id,
                    sequence = info.stream_sequence,
                    delivery_count = info.delivery_count,
                    "Dispatching message"
                );
                handler.handle(&envelope, &info).await
            }
            Err(err) => Err(ProcessingError::from(err)),
        };

        let disposition = match result {
            Ok(()) => {
                metrics.handler_finished(started.elapsed(), "success");
                let acked = delivery.ack().await;
                if acked.is_ok() {
                    metrics.message_acked();
                }
                acked
            }
            Err(err) => {
                metrics.handler_finished(started.elapsed(), "failure");

                if !self.broker.is_usable() {
                    warn!(
                        sequence = info.stream_sequence,
                        error = %err,
                        "Handler failed while connection is closing; leaving message for redelivery"
                    );
                    return Flow::Stop;
                }

                match self.redelivery.on_failure(info.delivery_count) {
                    FailureDisposition::Term => {
                        error!(
                            subject = %info.subject,
                            sequence = info.stream_sequence,
                            delivery_count = info.delivery_count,
                            handler = handler.name(),
                            error = %err,
                            "Message failed on its final delivery, terminating"
                        );
                        metrics.message_terminated(err.kind());
                        delivery.term().await
                    }
                    FailureDisposition::Nak(delay) => {
                        warn!(
                            subject = %info.subject,
                            sequence = info.stream_sequence,
                            delivery_count = info.delivery_count,
                            handler = handler.name(),
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "Message failed, requesting redelivery"
                        );
                        metrics.message_nacked(err.kind());
                        delivery.nak(delay).await
                    }
                }
            }
        };

        match disposition {
            Ok(()) => Flow::Continue,
            Err(err) if err.is_connection_closed() => Flow::Stop,
            Err(err) => {
                // The broker redelivers after ack wait.
                warn!(sequence = info.stream_sequence, error = %err, "Failed to settle message");
                Flow::Continue
            }
        }
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

/// Resolves once a stop is requested; never resolves if the sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
