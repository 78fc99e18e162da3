//! Stream and consumer administration over JetStream.

use async_nats::jetstream::consumer::{
    pull::Config as PullConfig, AckPolicy, DeliverPolicy as NatsDeliverPolicy,
    ReplayPolicy as NatsReplayPolicy,
};
use async_nats::jetstream::stream::Stream;
use async_trait::async_trait;
use messaging::{BrokerError, ConsumerAdmin, ConsumerSpec, DeliverPolicy, ReplayPolicy, StreamAdmin};
use time::OffsetDateTime;
use tracing::debug;

use crate::session::NatsSession;

impl NatsSession {
    pub(crate) async fn stream(&self, name: &str) -> Result<Stream, BrokerError> {
        self.jetstream()
            .get_stream(name)
            .await
            .map_err(|e| self.state().broker_error(e))
    }
}

#[async_trait]
impl StreamAdmin for NatsSession {
    async fn stream_subjects(&self, stream: &str) -> Result<Vec<String>, BrokerError> {
        let stream = self.stream(stream).await?;
        Ok(stream.cached_info().config.subjects.clone())
    }

    async fn set_stream_subjects(
        &self,
        stream: &str,
        subjects: Vec<String>,
    ) -> Result<(), BrokerError> {
        let current = self.stream(stream).await?;
        let mut config = current.cached_info().config.clone();
        config.subjects = subjects;

        self.jetstream()
            .update_stream(&config)
            .await
            .map_err(|e| self.state().broker_error(e))?;
        debug!(stream, subjects = ?config.subjects, "Stream subjects updated");
        Ok(())
    }
}

#[async_trait]
impl ConsumerAdmin for NatsSession {
    async fn consumer_filters(
        &self,
        stream: &str,
        consumer: &str,
    ) -> Result<Vec<String>, BrokerError> {
        let stream = self.stream(stream).await?;
        let consumer = stream
            .get_consumer::<PullConfig>(consumer)
            .await
            .map_err(|e| self.state().broker_error(e))?;

        let config = &consumer.cached_info().config;
        Ok(configured_filters(&config.filter_subject, &config.filter_subjects))
    }

    async fn create_consumer(&self, spec: &ConsumerSpec) -> Result<(), BrokerError> {
        let config = pull_config(spec)?;
        self.stream(&spec.stream_name)
            .await?
            .create_consumer(config)
            .await
            .map_err(|e| self.state().broker_error(e))?;
        Ok(())
    }

    async fn update_consumer(&self, spec: &ConsumerSpec) -> Result<(), BrokerError> {
        let config = pull_config(spec)?;
        self.stream(&spec.stream_name)
            .await?
            .update_consumer(config)
            .await
            .map_err(|e| self.state().broker_error(e))?;
        Ok(())
    }
}

/// The consumer's filters, whichever of the two config fields holds them.
fn configured_filters(single: &str, many: &[String]) -> Vec<String> {
    if many.is_empty() && !single.is_empty() {
        vec![single.to_string()]
    } else {
        many.to_vec()
    }
}

/// Durable pull consumer config for a spec.
///
/// A single filter goes into `filter_subject` so servers without
/// multi-filter support accept it.
pub(crate) fn pull_config(spec: &ConsumerSpec) -> Result<PullConfig, BrokerError> {
    let mut filters: Vec<String> = spec.subject_filters.iter().cloned().collect();
    let (filter_subject, filter_subjects) = if filters.len() == 1 {
        (filters.remove(0), Vec::new())
    } else {
        (String::new(), filters)
    };

    Ok(PullConfig {
        durable_name: Some(spec.consumer_name.clone()),
        name: Some(spec.consumer_name.clone()),
        deliver_policy: deliver_policy(spec.deliver_policy)?,
        ack_policy: AckPolicy::Explicit,
        ack_wait: spec.ack_wait,
        max_deliver: spec.max_deliver,
        filter_subject,
        filter_subjects,
        replay_policy: match spec.replay_policy {
            ReplayPolicy::Instant => NatsReplayPolicy::Instant,
            ReplayPolicy::Original => NatsReplayPolicy::Original,
        },
        max_waiting: spec.max_waiting,
        max_ack_pending: spec.max_ack_pending,
        num_replicas: spec.num_replicas,
        ..Default::default()
    })
}

fn deliver_policy(policy: DeliverPolicy) -> Result<NatsDeliverPolicy, BrokerError> {
    Ok(match policy {
        DeliverPolicy::All => NatsDeliverPolicy::All,
        DeliverPolicy::Last => NatsDeliverPolicy::Last,
        DeliverPolicy::New => NatsDeliverPolicy::New,
        DeliverPolicy::LastPerSubject => NatsDeliverPolicy::LastPerSubject,
        DeliverPolicy::ByStartSequence(start_sequence) => {
            NatsDeliverPolicy::ByStartSequence { start_sequence }
        }
        DeliverPolicy::ByStartTime(at) => {
            let nanos = at
                .timestamp_nanos_opt()
                .ok_or_else(|| BrokerError::rejected(format!("start time {} out of range", at)))?;
            let start_time = OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
                .map_err(|e| BrokerError::rejected(e.to_string()))?;
            NatsDeliverPolicy::ByStartTime { start_time }
        }
    })
}
