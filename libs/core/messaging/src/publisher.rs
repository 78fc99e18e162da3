//! Validated, retried publishing of envelopes to a stream.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::{ConnectionGuard, MessagePublisher, PublishAck, PublishRequest, StreamAdmin};
use crate::config::RetryPolicy;
use crate::envelope::MessageEnvelope;
use crate::error::{BrokerError, PublishError, ValidationError};
use crate::metrics;
use crate::provisioner::SubjectProvisioner;
use crate::retry::{retry_with_backoff, RetryError};
use crate::subject::validate_publish_subject;

/// Publishes envelopes to a stream, provisioning subjects and retrying
/// transport failures.
///
/// Each attempt provisions the subject and publishes with an expected-stream
/// guard. Only [`BrokerError::Unavailable`] is retried; a draining or closed
/// connection ends the call at once.
pub struct Publisher<B> {
    broker: Arc<B>,
    provisioner: SubjectProvisioner<B>,
    retry_policy: RetryPolicy,
}

impl<B> Publisher<B>
where
    B: ConnectionGuard + StreamAdmin + MessagePublisher,
{
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            provisioner: SubjectProvisioner::new(broker.clone()),
            broker,
            retry_policy: RetryPolicy::publish(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[instrument(skip(self, envelope), fields(subject = %envelope.subject, message_id = %envelope.id))]
    pub async fn publish<T: Serialize + Sync>(
        &self,
        stream: &str,
        envelope: &MessageEnvelope<T>,
    ) -> Result<PublishAck, PublishError> {
        let payload = encode_envelope(stream, envelope)?;

        if !self.broker.is_usable() {
            warn!(stream, "Connection not usable, refusing to publish");
            return Err(PublishError::ConnectionClosed);
        }

        let request = PublishRequest {
            expected_stream: stream.to_string(),
            subject: envelope.subject.clone(),
            message_id: envelope.id.to_string(),
            payload,
        };

        let result = retry_with_backoff(
            &self.retry_policy,
            |attempt| self.attempt(&request, attempt),
            BrokerError::is_transient,
        )
        .await;

        match result {
            Ok(ack) => {
                if ack.duplicate {
                    info!(stream, sequence = ack.sequence, "Broker reported duplicate message");
                } else {
                    debug!(stream, sequence = ack.sequence, "Message published");
                }
                Ok(ack)
            }
            Err(RetryError::Aborted {
                error: BrokerError::ConnectionClosed,
                ..
            }) => {
                warn!(stream, "Connection closed while publishing");
                Err(PublishError::ConnectionClosed)
            }
            Err(err) => {
                metrics::record_publish_failure(stream);
                let attempts = err.attempts();
                let cause = err.into_inner();
                error!(stream, attempts, error = %cause, "Publish failed");
                Err(PublishError::Failed { attempts, cause })
            }
        }
    }

    async fn attempt(&self, request: &PublishRequest, attempt: u32) -> Result<PublishAck, BrokerError> {
        if !self.broker.is_usable() {
            return Err(BrokerError::ConnectionClosed);
        }
        metrics::record_publish_attempt(&request.expected_stream);
        debug!(attempt, "Publishing");

        self.provisioner
            .ensure_subject(&request.expected_stream, &request.subject)
            .await?;
        self.broker.publish(request.clone()).await
    }
}

/// Validate an envelope and serialize it to its JSON wire form.
///
/// Runs before any broker call; failures are never retried.
pub fn encode_envelope<T: Serialize>(
    stream: &str,
    envelope: &MessageEnvelope<T>,
) -> Result<Vec<u8>, PublishError> {
    if stream.trim().is_empty() {
        return Err(ValidationError::EmptyStreamName.into());
    }
    if !envelope.has_id() {
        return Err(ValidationError::MissingId.into());
    }
    validate_publish_subject(&envelope.subject)?;

    let value = serde_json::to_value(envelope)?;
    if value.get("data").map_or(true, serde_json::Value::is_null) {
        return Err(ValidationError::MissingData.into());
    }
    Ok(serde_json::to_vec(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffStrategy;
    use crate::testing::InMemoryBroker;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn order() -> MessageEnvelope<serde_json::Value> {
        MessageEnvelope::new("orders.created", json!({"order_id": 7}), "checkout")
    }

    #[tokio::test]
    async fn test_publish_provisions_missing_subject_once() {
        let broker = Arc::new(InMemoryBroker::with_stream("ORDERS", ["invoices.>"]));
        let publisher = Publisher::new(broker.clone());

        let first = publisher.publish("ORDERS", &order()).await.unwrap();
        let second = publisher.publish("ORDERS", &order()).await.unwrap();

        assert_eq!(first.stream, "ORDERS");
        assert_eq!(second.sequence, first.sequence + 1);
        assert_eq!(broker.stream_update_count(), 1);
        assert_eq!(
            broker.subjects_of("ORDERS"),
            vec!["invoices.>".to_string(), "orders.created".to_string()]
        );
    }

    #[tokio::test]
    async fn test_publish_sends_envelope_id_as_message_id() {
        let broker = Arc::new(InMemoryBroker::with_stream("ORDERS", ["orders.>"]));
        let publisher = Publisher::new(broker.clone());
        let envelope = order();

        publisher.publish("ORDERS", &envelope).await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message_id, envelope.id.to_string());
        assert_eq!(published[0].expected_stream, "ORDERS");
        let decoded: MessageEnvelope<serde_json::Value> =
            serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[tokio::test]
    async fn test_validation_errors_make_no_broker_calls() {
        let broker = Arc::new(InMemoryBroker::with_stream("ORDERS", ["orders.>"]));
        let publisher = Publisher::new(broker.clone());

        let nil_id = order().with_id(Uuid::nil());
        assert!(matches!(
            publisher.publish("ORDERS", &nil_id).await,
            Err(PublishError::Validation(ValidationError::MissingId))
        ));

        let mut empty_subject = order();
        empty_subject.subject.clear();
        assert!(matches!(
            publisher.publish("ORDERS", &empty_subject).await,
            Err(PublishError::Validation(ValidationError::EmptySubject))
        ));

        let no_data = MessageEnvelope::new("orders.created", Option::<u32>::None, "checkout");
        assert!(matches!(
            publisher.publish("ORDERS", &no_data).await,
            Err(PublishError::Validation(ValidationError::MissingData))
        ));

        assert!(matches!(
            publisher.publish("", &order()).await,
            Err(PublishError::Validation(ValidationError::EmptyStreamName))
        ));

        assert_eq!(broker.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_then_succeed() {
        let broker = Arc::new(InMemoryBroker::with_stream("ORDERS", ["orders.>"]));
        broker.fail_next_publishes(2);
        let publisher = Publisher::new(broker.clone());

        let ack = publisher.publish("ORDERS", &order()).await.unwrap();
        assert_eq!(ack.sequence, 1);

        let times = broker.publish_attempt_times();
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts_and_cause() {
        let broker = Arc::new(InMemoryBroker::with_stream("ORDERS", ["orders.>"]));
        broker.fail_next_publishes(10);
        let publisher = Publisher::new(broker.clone());

        match publisher.publish("ORDERS", &order()).await {
            Err(PublishError::Failed { attempts, cause }) => {
                assert_eq!(attempts, 3);
                assert!(cause.is_transient());
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(broker.publish_attempt_times().len(), 3);
    }

    #[tokio::test]
    async fn test_closed_connection_short_circuits() {
        let broker = Arc::new(InMemoryBroker::with_stream("ORDERS", ["orders.>"]));
        broker.set_usable(false);
        let publisher = Publisher::new(broker.clone())
            .with_retry_policy(RetryPolicy::new(5, BackoffStrategy::Fixed(Duration::ZERO)));

        assert!(matches!(
            publisher.publish("ORDERS", &order()).await,
            Err(PublishError::ConnectionClosed)
        ));
        assert_eq!(broker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let broker = Arc::new(InMemoryBroker::with_stream("ORDERS", ["orders.>"]));
        let publisher = Publisher::new(broker.clone());

        let err = publisher.publish("MISSING", &order()).await.unwrap_err();
        match err {
            PublishError::Failed { attempts, cause } => {
                assert_eq!(attempts, 1);
                assert!(cause.is_not_found());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
