//! Maps provider names to the factories that construct them.
//!
//! The registry is built once at startup, usually through [`ProviderRegistry::builtin()`],
//! and then shared between all concurrently handled challenges.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use itertools::Itertools;
use log::debug;
use thiserror::Error;

use crate::provider::{
    alidns, cloudflare, desec, hetzner, linode, ovh, route53, Provider, ProviderConfig,
    ProviderError,
};

/// Constructs a live provider from its configuration
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown DNS provider: {name} (available: {})", .available.join(", "))]
    UnknownProvider {
        name: String,
        available: Vec<String>,
    },
    #[error("failed to create {name} provider: {source}")]
    Construction {
        name: String,
        #[source]
        source: ProviderError,
    },
}

#[derive(Default)]
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, ProviderFactory>>,
}

impl ProviderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        ProviderRegistry::default()
    }

    /// A registry containing every provider compiled into this crate
    pub fn builtin() -> Self {
        let registry = ProviderRegistry::new();
        registry.register("alidns", alidns::from_config);
        registry.register("cloudflare", cloudflare::from_config);
        registry.register("desec", desec::from_config);
        registry.register("hetzner", hetzner::from_config);
        registry.register("linode", linode::from_config);
        registry.register("ovh", ovh::from_config);
        registry.register("route53", route53::from_config);
        registry
    }

    /// Register a factory under `name`. An existing registration with the same name is replaced.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> + Send + Sync + 'static,
    {
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if factories.insert(name.to_string(), Arc::new(factory)).is_some() {
            debug!("Replaced existing registration for provider {}", name);
        }
    }

    /// Construct the provider registered as `name`
    pub fn create(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Box<dyn Provider>, RegistryError> {
        // Release the lock before calling into the factory
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned();

        match factory {
            Some(factory) => factory(config).map_err(|source| RegistryError::Construction {
                name: name.to_string(),
                source,
            }),
            None => Err(RegistryError::UnknownProvider {
                name: name.to_string(),
                available: self.names(),
            }),
        }
    }

    /// Sorted names of all registered providers
    pub fn names(&self) -> Vec<String> {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .sorted()
            .collect()
    }
}
