//! JetStream publishing with message-id and expected-stream headers.

use async_nats::jetstream::context::Publish;
use async_trait::async_trait;
use messaging::{BrokerError, MessagePublisher, PublishAck, PublishRequest};
use tracing::debug;

use crate::session::NatsSession;

#[async_trait]
impl MessagePublisher for NatsSession {
    async fn publish(&self, request: PublishRequest) -> Result<PublishAck, BrokerError> {
        let publish = Publish::build()
            .payload(request.payload.into())
            .message_id(&request.message_id)
            .expected_stream(&request.expected_stream);

        let ack = self
            .jetstream()
            .send_publish(request.subject.clone(), publish)
            .await
            .map_err(|e| self.state().broker_error(e))?
            .await
            .map_err(|e| self.state().broker_error(e))?;

        debug!(
            stream = %ack.stream,
            subject = %request.subject,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Published message"
        );

        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }
}
