//! NATS connection lifecycle: connect with retry, usability guard, drain.

use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_nats::{Client, ConnectOptions, Event, ServerAddr};
use core_config::NatsConfig;
use messaging::{retry_with_backoff, BackoffStrategy, BrokerError, ConnectionGuard, RetryPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{classify, NatsError};

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Draining / closed flags shared with the client's event callback.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    draining: AtomicBool,
    closed: AtomicBool,
}

impl SessionState {
    pub(crate) fn is_usable(&self) -> bool {
        !self.draining.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Once the session is going away every failure reads as a closed connection.
    pub(crate) fn broker_error(&self, error: impl std::fmt::Display) -> BrokerError {
        if self.is_usable() {
            classify(error)
        } else {
            BrokerError::ConnectionClosed
        }
    }
}

/// A NATS client plus its JetStream context.
///
/// Cloning is cheap; clones share the connection and its usability state.
#[derive(Clone)]
pub struct NatsSession {
    client: Client,
    jetstream: jetstream::Context,
    state: Arc<SessionState>,
}

impl NatsSession {
    /// Connect to the configured servers.
    ///
    /// Makes up to `connect_retries` attempts, 1 s apart. Reconnects after a
    /// successful connect are handled by the client itself.
    pub async fn connect(config: &NatsConfig) -> Result<Self, NatsError> {
        let servers = parse_servers(config)?;
        let state = Arc::new(SessionState::default());
        let policy = RetryPolicy::new(
            config.connect_retries,
            BackoffStrategy::Fixed(CONNECT_RETRY_DELAY),
        );

        let client = retry_with_backoff(
            &policy,
            |attempt| {
                let options = connect_options(config, state.clone());
                let servers = servers.clone();
                async move {
                    debug!(attempt, "Connecting to NATS");
                    options
                        .connect(servers.as_slice())
                        .await
                        .map_err(|e| e.to_string())
                }
            },
            |_: &String| true,
        )
        .await
        .map_err(|err| {
            let attempts = err.attempts();
            let cause = err.into_inner();
            warn!(attempts, error = %cause, "Giving up connecting to NATS");
            NatsError::Connect { attempts, cause }
        })?;

        info!(servers = %config.server_list(), "Connected to NATS");

        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            state,
        })
    }

    /// Wrap an already connected client.
    ///
    /// Without the event callback installed by [`NatsSession::connect`] the
    /// session only learns about its own drain, not about a server-side close.
    pub fn from_client(client: Client) -> Self {
        Self {
            jetstream: jetstream::new(client.clone()),
            client,
            state: Arc::new(SessionState::default()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub(crate) fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Create the stream if it does not exist yet.
    ///
    /// An existing stream is left as is; its subjects are extended on demand
    /// by the publisher.
    pub async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<(), BrokerError> {
        self.jetstream
            .get_or_create_stream(StreamConfig {
                name: name.to_string(),
                subjects: subjects.to_vec(),
                ..Default::default()
            })
            .await
            .map_err(|e| self.state.broker_error(e))?;
        debug!(stream = name, "Stream ready");
        Ok(())
    }

    /// Stop accepting work and flush pending messages.
    ///
    /// The session reports itself unusable before the drain starts so running
    /// loops wind down instead of retrying.
    pub async fn drain(&self) -> Result<(), NatsError> {
        self.state.draining.store(true, Ordering::SeqCst);
        info!("Draining NATS connection");
        self.client
            .drain()
            .await
            .map_err(|e| NatsError::Drain(e.to_string()))
    }
}

impl ConnectionGuard for NatsSession {
    fn is_usable(&self) -> bool {
        self.state.is_usable()
    }
}

fn parse_servers(config: &NatsConfig) -> Result<Vec<ServerAddr>, NatsError> {
    config
        .servers
        .iter()
        .map(|server| {
            server
                .parse::<ServerAddr>()
                .map_err(|e| NatsError::InvalidServer {
                    server: server.clone(),
                    details: e.to_string(),
                })
        })
        .collect()
}

fn connect_options(config: &NatsConfig, state: Arc<SessionState>) -> ConnectOptions {
    let reconnect_delay = config.reconnect_delay;

    let mut options = ConnectOptions::new()
        .connection_timeout(config.connect_timeout)
        .max_reconnects(config.max_reconnects)
        .reconnect_delay_callback(move |_| reconnect_delay)
        .event_callback(move |event| {
            let state = state.clone();
            async move {
                match event {
                    Event::Closed => {
                        state.closed.store(true, Ordering::SeqCst);
                        warn!("NATS connection closed");
                    }
                    Event::Disconnected => warn!("NATS connection lost, reconnecting"),
                    Event::Connected => info!("NATS connection established"),
                    other => debug!(event = ?other, "NATS connection event"),
                }
            }
        });

    if let Some((user, password)) = config.credentials() {
        options = options.user_and_password(user.to_string(), password.to_string());
    }
    if let Some(name) = &config.client_name {
        options = options.name(name);
    }
    options
}
