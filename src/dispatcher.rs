//! Entry points for challenge requests coming from the certificate controller.
//!
//! The [`Dispatcher`] turns a [`ChallengeRequest`] into a provider, zone, record name and TTL and runs
//! the reconciliation for it. Every call is independent: configuration, credentials and the provider
//! instance live only for the duration of one operation.

use std::{sync::Arc, time::Duration};

use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;
use tokio::{task, time};

use crate::{
    config::{ConfigError, SolverConfig, TTL, OPERATION_TIMEOUT},
    credentials::{CredentialError, SecretStore},
    provider::{Deadline, Provider, ProviderConfig},
    reconcile::{self, ReconcileError},
    registry::{ProviderRegistry, RegistryError},
    zone::relative_name,
};

/// Name under which issuers reference this solver
pub const SOLVER_NAME: &str = "acme-txt-solver";

/// A single present or clean-up request for a DNS-01 challenge
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChallengeRequest {
    #[serde(default)]
    pub uid: String,
    /// Fully-qualified name of the TXT record, possibly with trailing dot
    #[serde(rename = "resolvedFQDN")]
    pub fqdn: String,
    /// Zone the record belongs to, possibly with trailing dot
    #[serde(rename = "resolvedZone")]
    pub zone: String,
    /// Expected TXT value
    pub key: String,
    /// Namespace of the resource that requested the challenge
    #[serde(rename = "resourceNamespace", default)]
    pub namespace: String,
    /// Per-issuer solver configuration, see [`SolverConfig`]
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("failed to load config: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load credentials: {0}")]
    Credentials(#[from] CredentialError),
    #[error("failed to get provider: {0}")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("operation did not complete within {0:?}")]
    Timeout(Duration),
    #[error("operation aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Present,
    CleanUp,
}

/// Handles challenge requests against the providers of a [`ProviderRegistry`]
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    secrets: Arc<dyn SecretStore>,
    timeout: Duration,
}

/// Everything resolved for one operation
struct Target {
    provider: Box<dyn Provider>,
    zone: String,
    name: String,
    ttl: TTL,
}

impl Dispatcher {
    pub fn new(registry: Arc<ProviderRegistry>, secrets: Arc<dyn SecretStore>) -> Self {
        Dispatcher {
            registry,
            secrets,
            timeout: OPERATION_TIMEOUT,
        }
    }

    /// Override the time budget of a single operation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Solver name used to match issuer configurations
    pub fn name(&self) -> &'static str {
        SOLVER_NAME
    }

    /// Create the TXT record for a challenge.
    /// Other values under the same name (e.g. for a wildcard and its base domain) are kept.
    pub async fn present(&self, request: &ChallengeRequest) -> Result<(), SolverError> {
        info!(
            "Present called: fqdn={} zone={} key={}",
            request.fqdn, request.zone, request.key
        );
        self.run(request, Operation::Present).await
    }

    /// Remove the TXT value of a finished challenge, leaving all other values in place
    pub async fn clean_up(&self, request: &ChallengeRequest) -> Result<(), SolverError> {
        info!(
            "CleanUp called: fqdn={} zone={} key={}",
            request.fqdn, request.zone, request.key
        );
        self.run(request, Operation::CleanUp).await
    }

    async fn run(&self, request: &ChallengeRequest, op: Operation) -> Result<(), SolverError> {
        // Configuration errors must surface before any I/O
        let config = SolverConfig::from_json(request.config.as_ref())?;

        // Shared by every request of the operation, the provider stops making calls once it passes
        let deadline = Deadline::after(self.timeout);
        let dispatcher = self.clone();
        let request = request.clone();
        let job = task::spawn_blocking(move || {
            let target = dispatcher.resolve(&request, &config, deadline)?;
            let provider = target.provider.as_ref();
            match op {
                Operation::Present => reconcile::present(
                    provider,
                    &target.zone,
                    &target.name,
                    &request.key,
                    target.ttl,
                    deadline,
                )?,
                Operation::CleanUp => reconcile::clean_up(
                    provider,
                    &target.zone,
                    &target.name,
                    &request.key,
                    target.ttl,
                    deadline,
                )?,
            }
            Ok::<(), SolverError>(())
        });

        // Requests in flight are aborted at the deadline, nothing is rolled back
        match time::timeout_at(time::Instant::from_std(deadline.instant()), job).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SolverError::Aborted(e.to_string())),
            Err(_) => Err(SolverError::Timeout(self.timeout)),
        }
    }

    /// Load credentials and build the provider, zone, record name and TTL for a request
    fn resolve(
        &self,
        request: &ChallengeRequest,
        config: &SolverConfig,
        deadline: Deadline,
    ) -> Result<Target, SolverError> {
        let namespace = config.secret_namespace(&request.namespace);
        debug!(
            "Loading credentials for provider {} from secret {}/{}",
            config.provider, namespace, config.secret_ref.name
        );
        let credentials = self.secrets.load(namespace, &config.secret_ref.name)?;

        let provider = self.registry.create(
            &config.provider,
            &ProviderConfig {
                credentials,
                deadline,
            },
        )?;

        let zone = config.effective_zone(&request.zone);
        let name = relative_name(&request.fqdn, &zone);
        let ttl = config.effective_ttl();
        debug!(
            "Resolved TXT record: name={} zone={} ttl={}",
            name, zone, ttl
        );

        Ok(Target {
            provider,
            zone,
            name,
            ttl,
        })
    }
}
