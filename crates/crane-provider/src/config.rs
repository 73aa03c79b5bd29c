//! Flat string-keyed backend configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::{Error, Result, TRACING_TARGET_PROVIDER};

/// One configuration option a backend declares it understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigOption {
    /// Option key, lower-case.
    pub key: &'static str,
    /// Human-readable purpose, shown in help output and warnings.
    pub purpose: &'static str,
}

/// Flat string-keyed configuration for a provider backend.
///
/// Conventionally scraped from process environment variables carrying a
/// common prefix (`PROVIDER_CONFIG_*`); keys are stored lower-case.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    options: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from key/value pairs; keys are lower-cased.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            options: pairs
                .into_iter()
                .map(|(k, v)| (k.into().to_lowercase(), v.into()))
                .collect(),
        }
    }

    /// Scrape configuration from the process environment.
    ///
    /// Every variable starting with `prefix` is kept with the prefix
    /// stripped and the remainder lower-cased: `PROVIDER_CONFIG_SHELL=zsh`
    /// becomes `shell = "zsh"`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_pairs(std::env::vars().filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .map(|stripped| (stripped.to_string(), value))
        }))
    }

    /// Set an option, returning self for chaining.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into().to_lowercase(), value.into());
        self
    }

    /// Look up an option.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Look up an option, falling back to a default.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse an option as an integer.
    pub fn get_u32(&self, key: &str) -> Result<Option<u32>> {
        self.get(key)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| Error::config(format!("option '{key}' is not an integer: {raw}")))
            })
            .transpose()
    }

    /// Parse an option as a boolean (`true`/`false`, `1`/`0`).
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get(key)
            .map(|raw| match raw {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(Error::config(format!(
                    "option '{key}' is not a boolean: {other}"
                ))),
            })
            .transpose()
    }

    /// Parse an option as a whole number of seconds.
    pub fn get_duration_secs(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.get_u32(key)?.map(u64::from).map(Duration::from_secs))
    }

    /// Parse an option as a whole number of milliseconds.
    pub fn get_duration_ms(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.get_u32(key)?.map(u64::from).map(Duration::from_millis))
    }

    /// Iterate over all keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    /// Number of options set.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether no options are set.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Warn about keys the backend does not recognize and return them.
    pub fn warn_unknown(&self, backend: &str, recognized: &[ConfigOption]) -> Vec<String> {
        let unknown: Vec<String> = self
            .keys()
            .filter(|key| !recognized.iter().any(|option| option.key == *key))
            .map(str::to_string)
            .collect();

        for key in &unknown {
            tracing::warn!(
                target: TRACING_TARGET_PROVIDER,
                backend = backend,
                key = %key,
                "unrecognized provider configuration option"
            );
        }

        unknown
    }
}
