//! One-stream facade over session, publisher and pull loop.

use core_config::{ConfigError, ConsumerEnvConfig, FromEnv, NatsConfig};
use messaging::{
    ConsumeError, ConsumerOverrides, ConsumerSpec, DeduplicatingHandler, DeduplicationGuard,
    MessageEnvelope, MessageHandler, ProcessedStore, PublishAck, PublishError, Publisher,
    PullLoop, PullOverrides, RedeliveryPolicy, TransactionalHandler,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::error::NatsError;
use crate::session::NatsSession;

/// Stream and consumer a [`NatsWorker`] is bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    /// Subjects the consumer filters on
    pub subjects: Vec<String>,
    pub consumer: ConsumerOverrides,
    pub pull: PullOverrides,
    pub redelivery: RedeliveryPolicy,
}

impl WorkerConfig {
    pub fn new(
        stream_name: impl Into<String>,
        consumer_name: impl Into<String>,
        subjects: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            consumer_name: consumer_name.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            consumer: ConsumerOverrides::default(),
            pull: PullOverrides::default(),
            redelivery: RedeliveryPolicy::default(),
        }
    }

    pub fn with_consumer_overrides(mut self, overrides: ConsumerOverrides) -> Self {
        self.consumer = overrides;
        self
    }

    pub fn with_pull_overrides(mut self, overrides: PullOverrides) -> Self {
        self.pull = overrides;
        self
    }

    /// Default consumer policy with the configured overrides layered on top.
    pub fn consumer_spec(&self) -> ConsumerSpec {
        self.consumer.resolve(ConsumerSpec::new(
            self.stream_name.clone(),
            self.consumer_name.clone(),
            self.subjects.iter().cloned(),
        ))
    }
}

impl FromEnv for WorkerConfig {
    /// Requires `NATS_STREAM`, `NATS_CONSUMER` and `NATS_SUBJECTS`; the
    /// remaining consumer variables are optional overrides.
    fn from_env() -> Result<Self, ConfigError> {
        let env = ConsumerEnvConfig::from_env()?;

        let stream = env
            .stream
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("NATS_STREAM".to_string()))?;
        let consumer = env
            .consumer
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("NATS_CONSUMER".to_string()))?;
        if env.subjects.is_empty() {
            return Err(ConfigError::MissingEnvVar("NATS_SUBJECTS".to_string()));
        }

        let mut config = Self::new(stream, consumer, env.subjects.iter().cloned())
            .with_consumer_overrides(ConsumerOverrides::from(&env))
            .with_pull_overrides(PullOverrides::from(&env));
        if let Some(max_deliver) = env.max_deliver {
            config.redelivery.max_deliveries = max_deliver.max(1) as u64;
        }
        Ok(config)
    }
}

/// Publishes to and consumes from one stream over a shared NATS session.
///
/// # Example
///
/// ```rust,ignore
/// let worker = NatsWorker::connect(&NatsConfig::from_env()?, WorkerConfig::from_env()?).await?;
///
/// worker.publish(&MessageEnvelope::new("orders.created", order, "checkout")).await?;
///
/// let (stop_tx, stop_rx) = watch::channel(false);
/// worker.run_deduplicated(store, RecordOrder, stop_rx).await?;
/// worker.shutdown().await?;
/// ```
pub struct NatsWorker {
    session: Arc<NatsSession>,
    publisher: Publisher<NatsSession>,
    pull_loop: PullLoop<NatsSession>,
    config: WorkerConfig,
}

impl NatsWorker {
    pub async fn connect(nats: &NatsConfig, config: WorkerConfig) -> Result<Self, NatsError> {
        let session = NatsSession::connect(nats).await?;
        Ok(Self::new(session, config))
    }

    pub fn new(session: NatsSession, config: WorkerConfig) -> Self {
        let session = Arc::new(session);
        let pull_loop = PullLoop::new(session.clone())
            .with_pull_overrides(&config.pull)
            .with_redelivery_policy(config.redelivery.clone());

        Self {
            publisher: Publisher::new(session.clone()),
            pull_loop,
            session,
            config,
        }
    }

    pub fn session(&self) -> &NatsSession {
        &self.session
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Publish an envelope to the worker's stream.
    pub async fn publish<T: Serialize + Sync>(
        &self,
        envelope: &MessageEnvelope<T>,
    ) -> Result<PublishAck, PublishError> {
        self.publisher.publish(&self.config.stream_name, envelope).await
    }

    /// Consume with `handler` until drained, stopped or disconnected.
    pub async fn run<T, H>(&self, handler: &H, stop: watch::Receiver<bool>) -> Result<(), ConsumeError>
    where
        T: DeserializeOwned + Send + Sync,
        H: MessageHandler<T>,
    {
        self.pull_loop
            .run(&self.config.consumer_spec(), handler, stop)
            .await
    }

    /// Like [`NatsWorker::run`], but each message is processed at most once
    /// per id, in a transaction of `store`.
    pub async fn run_deduplicated<T, S, H>(
        &self,
        store: Arc<S>,
        handler: H,
        stop: watch::Receiver<bool>,
    ) -> Result<(), ConsumeError>
    where
        T: DeserializeOwned + Send + Sync,
        S: ProcessedStore,
        H: TransactionalHandler<T, S::Tx>,
    {
        let handler = DeduplicatingHandler::new(DeduplicationGuard::new(store), handler);
        self.run::<T, _>(&handler, stop).await
    }

    /// Drain the connection; running loops stop at their next check.
    pub async fn shutdown(&self) -> Result<(), NatsError> {
        info!(stream = %self.config.stream_name, "Shutting down NATS worker");
        self.session.drain().await
    }
}
