//! Broker connection configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

const DEFAULT_URL: &str = "nats://127.0.0.1:4222";
const DEFAULT_CONNECTION_NAME: &str = "crane-worker";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RECONNECTS: usize = 10;

/// Connection settings for the worker's broker session.
///
/// One session carries the job queue, the control subject, and the log
/// subjects, so this is deliberately small: where the worker lands, how it
/// authenticates, and how stubborn the client should be about the link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct BrokerConfig {
    /// Broker URL; comma-separate to list a cluster's seed servers.
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-url", env = "NATS_URL", default_value = DEFAULT_URL)
    )]
    #[serde(default = "default_url")]
    pub url: String,

    /// Connection token, for deployments that require one.
    #[cfg_attr(
        feature = "config",
        arg(id = "nats_token", long = "nats-token", env = "NATS_TOKEN")
    )]
    #[serde(default)]
    pub token: Option<String>,

    /// Name this worker advertises to the broker.
    #[cfg_attr(
        feature = "config",
        arg(
            id = "nats_connection_name",
            long = "nats-connection-name",
            env = "NATS_CONNECTION_NAME"
        )
    )]
    #[serde(default)]
    pub connection_name: Option<String>,

    /// Budget for establishing the initial connection, in seconds.
    #[cfg_attr(
        feature = "config",
        arg(
            id = "nats_connect_timeout",
            long = "nats-connect-timeout",
            env = "NATS_CONNECT_TIMEOUT",
            default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS
        )
    )]
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Reconnect attempts before the link is declared lost; 0 keeps trying
    /// forever.
    #[cfg_attr(
        feature = "config",
        arg(
            id = "nats_max_reconnects",
            long = "nats-max-reconnects",
            env = "NATS_MAX_RECONNECTS",
            default_value_t = DEFAULT_MAX_RECONNECTS
        )
    )]
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: usize,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}
fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_max_reconnects() -> usize {
    DEFAULT_MAX_RECONNECTS
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: None,
            connection_name: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
        }
    }
}

impl BrokerConfig {
    /// Configuration pointing at a single server.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Individual server URLs, with surrounding whitespace trimmed.
    pub fn server_list(&self) -> impl Iterator<Item = &str> {
        self.url
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
    }

    /// Name advertised to the broker.
    #[inline]
    pub fn connection_name(&self) -> &str {
        self.connection_name
            .as_deref()
            .unwrap_or(DEFAULT_CONNECTION_NAME)
    }

    /// Budget for establishing the initial connection.
    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reconnect budget in the client's terms: `None` retries forever.
    #[inline]
    pub fn reconnect_budget(&self) -> Option<usize> {
        (self.max_reconnects > 0).then_some(self.max_reconnects)
    }

    /// Set the connection token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the advertised connection name.
    #[must_use]
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    /// Set the reconnect budget; 0 keeps trying forever.
    #[must_use]
    pub fn with_max_reconnects(mut self, max_reconnects: usize) -> Self {
        self.max_reconnects = max_reconnects;
        self
    }

    /// Validate the configuration and return any issues.
    pub fn validate(&self) -> Result<(), String> {
        if self.server_list().next().is_none() {
            return Err("broker URL must name at least one server".to_string());
        }

        for server in self.server_list() {
            if !server.starts_with("nats://") && !server.starts_with("tls://") {
                return Err(format!(
                    "broker URL '{server}' must use the nats:// or tls:// scheme"
                ));
            }
        }

        if self.connect_timeout_secs == 0 {
            return Err("broker connect timeout must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.connection_name(), "crane-worker");
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.reconnect_budget(), Some(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn server_list_splits_and_trims() {
        let config = BrokerConfig::new("nats://a:4222, tls://b:4222 ,nats://c:4222");
        let servers: Vec<_> = config.server_list().collect();
        assert_eq!(servers, vec!["nats://a:4222", "tls://b:4222", "nats://c:4222"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_reconnects_means_forever() {
        let config = BrokerConfig::default().with_max_reconnects(0);
        assert_eq!(config.reconnect_budget(), None);
    }

    #[test]
    fn builders_fill_optional_fields() {
        let config = BrokerConfig::new("nats://broker:4222")
            .with_token("s3cret")
            .with_connection_name("worker-7");

        assert_eq!(config.token.as_deref(), Some("s3cret"));
        assert_eq!(config.connection_name(), "worker-7");
    }

    #[test]
    fn validation_rejects_bad_urls() {
        assert!(BrokerConfig::new("").validate().is_err());
        assert!(BrokerConfig::new("   ,  ").validate().is_err());
        assert!(BrokerConfig::new("http://broker:4222").validate().is_err());
        assert!(
            BrokerConfig::new("nats://a:4222,ftp://b:21")
                .validate()
                .is_err()
        );

        let mut config = BrokerConfig::default();
        config.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
