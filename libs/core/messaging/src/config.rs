//! Consumer, pull and retry configuration.
//!
//! Defaults live on the resolved types ([`ConsumerSpec`], [`PullOptions`]);
//! callers describe deviations with the `*Overrides` types, which are layered
//! over the defaults field by field with `resolve`.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::ValidationError;

/// Where a newly created consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliverPolicy {
    #[default]
    All,
    Last,
    New,
    LastPerSubject,
    ByStartSequence(u64),
    ByStartTime(DateTime<Utc>),
}

/// Pace at which stored messages are replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPolicy {
    #[default]
    Instant,
    Original,
}

/// Desired state of a durable pull consumer.
///
/// Acknowledgement is always explicit. `max_ack_pending == 1` (the default)
/// keeps delivery strictly ordered: the broker hands out the next message
/// only after the previous one has a disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub stream_name: String,
    /// Durable name; also used to look the consumer up
    pub consumer_name: String,
    pub subject_filters: BTreeSet<String>,
    pub deliver_policy: DeliverPolicy,
    pub max_deliver: i64,
    pub ack_wait: Duration,
    pub max_ack_pending: i64,
    pub replay_policy: ReplayPolicy,
    pub max_waiting: i64,
    pub num_replicas: usize,
}

impl ConsumerSpec {
    pub const DEFAULT_MAX_DELIVER: i64 = 3;
    pub const DEFAULT_ACK_WAIT: Duration = Duration::from_millis(30_000);
    pub const DEFAULT_MAX_ACK_PENDING: i64 = 1;
    pub const DEFAULT_MAX_WAITING: i64 = 512;
    pub const DEFAULT_NUM_REPLICAS: usize = 1;

    /// Build a spec with default policy for the given filters.
    pub fn new(
        stream_name: impl Into<String>,
        consumer_name: impl Into<String>,
        subject_filters: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            consumer_name: consumer_name.into(),
            subject_filters: subject_filters.into_iter().map(Into::into).collect(),
            deliver_policy: DeliverPolicy::default(),
            max_deliver: Self::DEFAULT_MAX_DELIVER,
            ack_wait: Self::DEFAULT_ACK_WAIT,
            max_ack_pending: Self::DEFAULT_MAX_ACK_PENDING,
            replay_policy: ReplayPolicy::default(),
            max_waiting: Self::DEFAULT_MAX_WAITING,
            num_replicas: Self::DEFAULT_NUM_REPLICAS,
        }
    }

    /// Create from consumer definition trait constants.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let spec = ConsumerSpec::from_def::<OrderEvents>();
    /// ```
    pub fn from_def<D: ConsumerDef>() -> Self {
        Self {
            max_deliver: D::MAX_DELIVER,
            ack_wait: Duration::from_millis(D::ACK_WAIT_MS),
            max_ack_pending: D::MAX_ACK_PENDING,
            ..Self::new(D::STREAM_NAME, D::CONSUMER_NAME, D::SUBJECTS.iter().copied())
        }
    }

    pub fn with_deliver_policy(mut self, policy: DeliverPolicy) -> Self {
        self.deliver_policy = policy;
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: i64) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_ack_pending(mut self, max_ack_pending: i64) -> Self {
        self.max_ack_pending = max_ack_pending;
        self
    }

    pub fn with_num_replicas(mut self, replicas: usize) -> Self {
        self.num_replicas = replicas;
        self
    }

    /// Whether `filters` (in any order, duplicates ignored) equal ours.
    pub fn filters_match<S: AsRef<str>>(&self, filters: &[S]) -> bool {
        let current: BTreeSet<&str> = filters.iter().map(|f| f.as_ref()).collect();
        current.len() == self.subject_filters.len()
            && self.subject_filters.iter().all(|f| current.contains(f.as_str()))
    }

    pub fn is_strictly_ordered(&self) -> bool {
        self.max_ack_pending == 1
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stream_name.trim().is_empty() {
            return Err(ValidationError::EmptyStreamName);
        }
        if self.consumer_name.trim().is_empty() {
            return Err(ValidationError::EmptyConsumerName);
        }
        if self.subject_filters.is_empty() {
            return Err(ValidationError::NoSubjectFilters);
        }
        if self.max_deliver < 1 {
            return Err(ValidationError::OutOfRange { field: "max_deliver" });
        }
        if self.max_ack_pending < 1 {
            return Err(ValidationError::OutOfRange {
                field: "max_ack_pending",
            });
        }
        Ok(())
    }
}

/// Consumer definition trait (for type-safe constants).
pub trait ConsumerDef {
    const STREAM_NAME: &'static str;
    const CONSUMER_NAME: &'static str;
    const SUBJECTS: &'static [&'static str];

    const MAX_DELIVER: i64 = ConsumerSpec::DEFAULT_MAX_DELIVER;
    const ACK_WAIT_MS: u64 = 30_000;
    const MAX_ACK_PENDING: i64 = ConsumerSpec::DEFAULT_MAX_ACK_PENDING;
}

/// Caller-supplied deviations from a [`ConsumerSpec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerOverrides {
    pub subject_filters: Option<BTreeSet<String>>,
    pub deliver_policy: Option<DeliverPolicy>,
    pub max_deliver: Option<i64>,
    pub ack_wait: Option<Duration>,
    pub max_ack_pending: Option<i64>,
    pub replay_policy: Option<ReplayPolicy>,
    pub max_waiting: Option<i64>,
    pub num_replicas: Option<usize>,
}

impl ConsumerOverrides {
    /// Layer these overrides over `defaults`; every set field wins.
    pub fn resolve(&self, defaults: ConsumerSpec) -> ConsumerSpec {
        ConsumerSpec {
            subject_filters: self
                .subject_filters
                .clone()
                .unwrap_or(defaults.subject_filters),
            deliver_policy: self.deliver_policy.unwrap_or(defaults.deliver_policy),
            max_deliver: self.max_deliver.unwrap_or(defaults.max_deliver),
            ack_wait: self.ack_wait.unwrap_or(defaults.ack_wait),
            max_ack_pending: self.max_ack_pending.unwrap_or(defaults.max_ack_pending),
            replay_policy: self.replay_policy.unwrap_or(defaults.replay_policy),
            max_waiting: self.max_waiting.unwrap_or(defaults.max_waiting),
            num_replicas: self.num_replicas.unwrap_or(defaults.num_replicas),
            ..defaults
        }
    }
}

/// Tuning for one pull subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOptions {
    pub batch_size: usize,
    /// Upper bound on how long a single pull request waits
    pub expires: Duration,
    /// Issue one bounded fetch instead of a continuous subscription
    pub no_wait: bool,
    pub max_bytes: usize,
    pub idle_heartbeat: Duration,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            expires: Duration::from_millis(10_000),
            no_wait: false,
            max_bytes: 1024 * 1024,
            idle_heartbeat: Duration::from_millis(500),
        }
    }
}

/// Caller-supplied deviations from [`PullOptions::default`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOverrides {
    pub batch_size: Option<usize>,
    pub expires: Option<Duration>,
    pub no_wait: Option<bool>,
    pub max_bytes: Option<usize>,
    pub idle_heartbeat: Option<Duration>,
}

impl PullOverrides {
    pub fn resolve(&self, defaults: PullOptions) -> PullOptions {
        PullOptions {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            expires: self.expires.unwrap_or(defaults.expires),
            no_wait: self.no_wait.unwrap_or(defaults.no_wait),
            max_bytes: self.max_bytes.unwrap_or(defaults.max_bytes),
            idle_heartbeat: self.idle_heartbeat.unwrap_or(defaults.idle_heartbeat),
        }
    }
}

#[cfg(feature = "config")]
impl From<&core_config::ConsumerEnvConfig> for ConsumerOverrides {
    fn from(env: &core_config::ConsumerEnvConfig) -> Self {
        Self {
            subject_filters: (!env.subjects.is_empty())
                .then(|| env.subjects.iter().cloned().collect()),
            max_deliver: env.max_deliver,
            ack_wait: env.ack_wait_ms.map(Duration::from_millis),
            max_ack_pending: env.max_ack_pending,
            ..Self::default()
        }
    }
}

#[cfg(feature = "config")]
impl From<&core_config::ConsumerEnvConfig> for PullOverrides {
    fn from(env: &core_config::ConsumerEnvConfig) -> Self {
        Self {
            batch_size: env.pull_batch,
            expires: env.pull_expires_ms.map(Duration::from_millis),
            ..Self::default()
        }
    }
}

/// Bounded retry configuration shared by the publish, consume and connect paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Backoff strategy
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// 3 attempts, 1s then 2s apart.
    pub fn publish() -> Self {
        Self::new(
            3,
            BackoffStrategy::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
            },
        )
    }

    /// 3 attempts, 1s apart.
    pub fn consume() -> Self {
        Self::new(3, BackoffStrategy::Fixed(Duration::from_secs(1)))
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::publish()
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),

    /// Exponential backoff (base * 2^retry_count, capped at max)
    Exponential { base: Duration, max: Duration },

    /// Linear backoff (base * (retry_count + 1), capped at max)
    Linear { base: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay for a given retry count.
    pub fn delay(&self, retry_count: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(d) => *d,
            BackoffStrategy::Exponential { base, max } => {
                let delay = base.saturating_mul(2u32.saturating_pow(retry_count));
                delay.min(*max)
            }
            BackoffStrategy::Linear { base, max } => {
                let delay = base.saturating_mul(retry_count.saturating_add(1));
                delay.min(*max)
            }
        }
    }
}
