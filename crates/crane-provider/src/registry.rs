//! Plug-in registry for provider backends.
//!
//! Backends register under a short name with a display name, the
//! configuration options they recognize, and a constructor. Dispatch is a
//! lookup table plus the uniform [`Provider`] interface; nothing more.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{fake, local};
use crate::config::{ConfigOption, ProviderConfig};
use crate::provider::Provider;
use crate::{Error, Result, TRACING_TARGET_PROVIDER};

/// Constructor signature every backend registers.
pub type Constructor = fn(&ProviderConfig) -> Result<Arc<dyn Provider>>;

/// Registry entry for one backend.
#[derive(Clone)]
pub struct ProviderDescriptor {
    /// Short name the backend registers under (`"local"`, `"fake"`, …).
    pub name: &'static str,
    /// Human-readable backend name.
    pub display_name: &'static str,
    /// Configuration options the backend recognizes.
    pub options: &'static [ConfigOption],
    constructor: Constructor,
}

impl ProviderDescriptor {
    /// Create a descriptor.
    pub fn new(
        name: &'static str,
        display_name: &'static str,
        options: &'static [ConfigOption],
        constructor: Constructor,
    ) -> Self {
        Self {
            name,
            display_name,
            options,
            constructor,
        }
    }

    /// Construct the backend, surfacing unrecognized options as warnings.
    pub fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        config.warn_unknown(self.name, self.options);
        (self.constructor)(config)
    }
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("options", &self.options.len())
            .finish()
    }
}

/// Lookup table of provider backends, keyed by short name.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// Registry with the built-in backends registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(local::descriptor());
        registry.register(fake::descriptor());
        registry
    }

    /// Register a backend descriptor, replacing any previous entry.
    pub fn register(&mut self, descriptor: ProviderDescriptor) {
        self.providers.insert(descriptor.name, descriptor);
    }

    /// Look up a backend by short name.
    pub fn get(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(name)
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    /// Construct the named backend from its configuration.
    pub fn create(&self, name: &str, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        let descriptor = self.get(name).ok_or_else(|| {
            Error::config(format!(
                "unknown provider '{}', known providers: {}",
                name,
                self.names().join(", ")
            ))
        })?;

        tracing::info!(
            target: TRACING_TARGET_PROVIDER,
            provider = name,
            display_name = descriptor.display_name,
            options = config.len(),
            "creating provider backend"
        );

        descriptor.create(config)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_backends_are_registered() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(registry.names(), vec!["fake", "local"]);

        let local = registry.get("local").unwrap();
        assert!(!local.options.is_empty());
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let registry = ProviderRegistry::builtin();
        let err = registry
            .create("jupiterbrain", &ProviderConfig::new())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown provider 'jupiterbrain'"));
        assert!(message.contains("fake"));
        assert!(message.contains("local"));
    }

    #[test]
    fn creates_backend_from_config() {
        let registry = ProviderRegistry::builtin();
        let provider = registry
            .create("fake", &ProviderConfig::new().with_option("exit_code", "0"))
            .unwrap();
        assert_eq!(provider.name(), "fake");
    }
}
