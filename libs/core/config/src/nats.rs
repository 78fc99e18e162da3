use crate::{env_optional, env_or_default, env_parse, ConfigError, FromEnv};
use std::time::Duration;

/// NATS connection settings
///
/// `servers` may hold several seed URLs of the same cluster.
#[derive(Clone, Debug)]
pub struct NatsConfig {
    pub servers: Vec<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_name: Option<String>,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnects: usize,
    /// Attempts made by the initial connect before giving up
    pub connect_retries: u32,
}

impl NatsConfig {
    pub fn new(servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Seed URLs in the comma-separated form the client accepts
    pub fn server_list(&self) -> String {
        self.servers.join(",")
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            user: None,
            password: None,
            client_name: None,
            connect_timeout: Duration::from_millis(10_000),
            reconnect_delay: Duration::from_millis(500),
            max_reconnects: 5,
            connect_retries: 3,
        }
    }
}

impl FromEnv for NatsConfig {
    /// Environment variables:
    /// - `NATS_URL`: comma-separated seed URLs (default `nats://localhost:4222`)
    /// - `NATS_USER` / `NATS_PASSWORD`: optional credentials
    /// - `NATS_CLIENT_NAME`: optional connection name
    /// - `NATS_CONNECT_TIMEOUT_MS` (10000), `NATS_RECONNECT_DELAY_MS` (500)
    /// - `NATS_MAX_RECONNECTS` (5), `NATS_CONNECT_RETRIES` (3)
    fn from_env() -> Result<Self, ConfigError> {
        let servers = split_list(&env_or_default("NATS_URL", "nats://localhost:4222"));
        if servers.is_empty() {
            return Err(ConfigError::ParseError {
                key: "NATS_URL".to_string(),
                details: "no server URL given".to_string(),
            });
        }

        Ok(Self {
            servers,
            user: env_optional("NATS_USER")?,
            password: env_optional("NATS_PASSWORD")?,
            client_name: env_optional("NATS_CLIENT_NAME")?,
            connect_timeout: Duration::from_millis(env_parse("NATS_CONNECT_TIMEOUT_MS", 10_000)?),
            reconnect_delay: Duration::from_millis(env_parse("NATS_RECONNECT_DELAY_MS", 500)?),
            max_reconnects: env_parse("NATS_MAX_RECONNECTS", 5)?,
            connect_retries: env_parse("NATS_CONNECT_RETRIES", 3)?,
        })
    }
}

/// Consumer settings read from the environment
///
/// Every field is optional. Unset values leave the code-level defaults in
/// place when the config is layered over a consumer spec.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerEnvConfig {
    pub stream: Option<String>,
    pub consumer: Option<String>,
    pub subjects: Vec<String>,
    pub max_deliver: Option<i64>,
    pub ack_wait_ms: Option<u64>,
    pub max_ack_pending: Option<i64>,
    pub pull_batch: Option<usize>,
    pub pull_expires_ms: Option<u64>,
}

impl FromEnv for ConsumerEnvConfig {
    /// Environment variables: `NATS_STREAM`, `NATS_CONSUMER`,
    /// `NATS_SUBJECTS` (comma-separated), `NATS_MAX_DELIVER`,
    /// `NATS_ACK_WAIT_MS`, `NATS_MAX_ACK_PENDING`, `NATS_PULL_BATCH`,
    /// `NATS_PULL_EXPIRES_MS`.
    fn from_env() -> Result<Self, ConfigError> {
        let subjects = env_optional::<String>("NATS_SUBJECTS")?
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            stream: env_optional("NATS_STREAM")?,
            consumer: env_optional("NATS_CONSUMER")?,
            subjects,
            max_deliver: env_optional("NATS_MAX_DELIVER")?,
            ack_wait_ms: env_optional("NATS_ACK_WAIT_MS")?,
            max_ack_pending: env_optional("NATS_MAX_ACK_PENDING")?,
            pull_batch: env_optional("NATS_PULL_BATCH")?,
            pull_expires_ms: env_optional("NATS_PULL_EXPIRES_MS")?,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
