//! Per-issuer solver configuration, as embedded in every challenge request.
//!
//! ```json
//! {
//!   "provider": "cloudflare",
//!   "secretRef": { "name": "cloudflare-credentials", "namespace": "cert-manager" },
//!   "zone": "example.com",
//!   "ttl": 600
//! }
//! ```
//! `provider` and `secretRef.name` are mandatory, everything else is optional.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::zone::normalize_zone;

/// Record TTL in seconds
pub type TTL = u32;

/// TTL applied to challenge records when the configuration doesn't specify a positive one
pub const DEFAULT_TTL: TTL = 300;

/// Time budget for one complete present/clean-up operation
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverConfig {
    /// Name of the DNS provider, as registered in the [`crate::registry::ProviderRegistry`]
    #[serde(default)]
    pub provider: String,
    /// Secret holding the provider credentials
    #[serde(default)]
    pub secret_ref: SecretRef,
    /// Overrides the zone supplied with the challenge
    #[serde(default)]
    pub zone: Option<String>,
    /// Record TTL in seconds. Missing or non-positive values select [`DEFAULT_TTL`]
    #[serde(default)]
    pub ttl: Option<i64>,
}

/// Reference to a secret in the credential store
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SecretRef {
    #[serde(default)]
    pub name: String,
    /// Defaults to the namespace of the challenge
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no configuration provided")]
    Missing,
    #[error("failed to unmarshal config: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("provider is required in config")]
    MissingProvider,
    #[error("secretRef.name is required in config")]
    MissingSecretName,
}

impl SolverConfig {
    /// Parse and validate the configuration embedded in a challenge
    pub fn from_json(config: Option<&serde_json::Value>) -> Result<SolverConfig, ConfigError> {
        let config = match config {
            None | Some(serde_json::Value::Null) => return Err(ConfigError::Missing),
            Some(c) => SolverConfig::deserialize(c)?,
        };
        if config.provider.is_empty() {
            return Err(ConfigError::MissingProvider);
        }
        if config.secret_ref.name.is_empty() {
            return Err(ConfigError::MissingSecretName);
        }
        Ok(config)
    }

    /// Zone to operate on: the configured override if set, the challenge zone otherwise.
    /// Always returned without trailing dot.
    pub fn effective_zone(&self, challenge_zone: &str) -> String {
        let zone = match self.zone.as_deref() {
            Some(z) if !z.is_empty() => z,
            _ => challenge_zone,
        };
        normalize_zone(zone).to_string()
    }

    pub fn effective_ttl(&self) -> TTL {
        match self.ttl {
            Some(ttl) if ttl > 0 => TTL::try_from(ttl).unwrap_or(TTL::MAX),
            _ => DEFAULT_TTL,
        }
    }

    /// Namespace to load the credential secret from
    pub fn secret_namespace<'a>(&'a self, challenge_namespace: &'a str) -> &'a str {
        match self.secret_ref.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => challenge_namespace,
        }
    }
}
