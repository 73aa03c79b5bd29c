//! NATS client wrapper and connection management.
//!
//! The wrapper is cheaply cloneable and thread-safe: the underlying
//! `async-nats` client multiplexes one TCP connection, so every processor in
//! the pool shares the same connection, and mutation (ack/nack) is confined
//! to the delivery that owns it.

use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, ConnectOptions, jetstream};
use tokio::time::timeout;

use super::config::BrokerConfig;
use crate::{Error, Result, TRACING_TARGET_CONNECTION};

/// Base delay between reconnect attempts; grows linearly per attempt.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);
/// Longest pause between reconnect attempts.
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// NATS client wrapper with connection management.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    inner: Arc<BrokerClientInner>,
}

#[derive(Debug)]
struct BrokerClientInner {
    client: Client,
    jetstream: jetstream::Context,
    config: BrokerConfig,
}

impl BrokerClient {
    /// Create a new NATS client and connect.
    #[tracing::instrument(skip(config))]
    pub async fn connect(config: BrokerConfig) -> Result<Self> {
        config.validate().map_err(Error::invalid_config)?;

        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            url = %config.url,
            "connecting to NATS servers"
        );

        let mut connect_opts = ConnectOptions::new()
            .name(config.connection_name())
            .connection_timeout(config.connect_timeout())
            .reconnect_delay_callback(|attempts| {
                RECONNECT_BASE_DELAY
                    .saturating_mul(attempts.max(1).min(u32::MAX as usize) as u32)
                    .min(RECONNECT_MAX_DELAY)
            });

        if let Some(token) = &config.token {
            connect_opts = connect_opts.token(token.clone());
        }

        if let Some(budget) = config.reconnect_budget() {
            connect_opts = connect_opts.max_reconnects(budget);
        }

        let client = timeout(
            config.connect_timeout(),
            async_nats::connect_with_options(&config.url, connect_opts),
        )
        .await
        .map_err(|_| Error::Timeout {
            timeout: config.connect_timeout(),
        })?
        .map_err(|e| Error::Connection(Box::new(e)))?;

        let jetstream = jetstream::new(client.clone());

        let server_info = client.server_info();
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            server_host = %server_info.host,
            server_version = %server_info.version,
            server_id = %server_info.server_id,
            "successfully connected to NATS"
        );

        Ok(Self {
            inner: Arc::new(BrokerClientInner {
                client,
                jetstream,
                config,
            }),
        })
    }

    /// The underlying core NATS client.
    #[inline]
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// The JetStream context.
    #[inline]
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.inner.jetstream
    }

    /// The configuration the client was built from.
    #[inline]
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }
}
