//! DNS providers that store the TXT records answering a challenge.
//!
//! Each vendor adapter implements the [`Provider`] trait and is constructed from a [`ProviderConfig`]
//! through its `from_config()` function. The following adapters are available:
//! - [`alidns`]: Alibaba Cloud DNS
//! - [`cloudflare`]: Cloudflare
//! - [`desec`]: deSEC
//! - [`hetzner`]: Hetzner DNS
//! - [`linode`]: Linode (Akamai) Domains
//! - [`ovh`]: OVHcloud
//! - [`route53`]: AWS Route 53

pub mod alidns;
pub mod cloudflare;
pub mod desec;
pub mod hetzner;
pub mod linode;
pub mod ovh;
pub mod route53;

mod rest;
#[cfg(test)]
pub(crate) mod memory;
mod store;

#[cfg(test)]
use mockall::automock;

use std::{
    collections::HashMap,
    fmt::Display,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::config::{TTL, OPERATION_TIMEOUT};

/// A provider is any DNS service provider, such as Cloudflare, Route 53, etc...
///
/// All operations take the zone without a trailing dot and record names relative to that zone,
/// with the apex written as [`crate::zone::APEX`].
/// Each operation returns the records that were read or affected.
#[cfg_attr(test, automock)]
pub trait Provider {
    /// Get all records currently registered with the provider for a zone
    fn get_records(&self, zone: &str) -> Result<Vec<DnsRecord>, ProviderError>;

    /// Replace records by name and type.
    /// For every (name, type) pair in `records`, the provider afterwards holds exactly the given values.
    /// Records with other names or types are left untouched.
    fn set_records(&self, zone: &str, records: &[DnsRecord])
        -> Result<Vec<DnsRecord>, ProviderError>;

    /// Add records without touching existing ones
    fn append_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError>;

    /// Delete all records matching the name, type and value of the given records. TTLs are ignored.
    /// Records that don't exist are not an error, they are simply missing from the result.
    fn delete_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError>;
}

/// Error returned by a provider action
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderError {
    /// A credential field required by the provider is missing or empty
    #[error("{provider}: {field} is required")]
    MissingCredential {
        provider: &'static str,
        field: &'static str,
    },
    #[error("zone {0} not found")]
    ZoneNotFound(String),
    /// The provider API rejected a request or returned garbage
    #[error("{0}")]
    Api(String),
    #[error("{0}")]
    Internal(String),
    /// The operation ran out of time, no further requests are made
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl From<String> for ProviderError {
    fn from(s: String) -> Self {
        ProviderError::Internal(s)
    }
}

/// Everything a provider needs to be constructed.
/// Credentials come exclusively from here, adapters never read ambient credentials from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Flat credential mapping, as loaded from a secret
    pub credentials: HashMap<String, String>,
    /// Point in time after which the provider must not start any more API requests
    pub deadline: Deadline,
}

impl ProviderConfig {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        ProviderConfig {
            credentials,
            deadline: Deadline::after(OPERATION_TIMEOUT),
        }
    }

    /// Returns the non-empty credential `field`, or a [`ProviderError::MissingCredential`] naming it
    pub fn require(&self, provider: &'static str, field: &'static str) -> Result<&str, ProviderError> {
        self.optional(field)
            .ok_or(ProviderError::MissingCredential { provider, field })
    }

    /// Returns the credential `field` if it is present and non-empty
    pub fn optional(&self, field: &str) -> Option<&str> {
        self.credentials
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// End of the time budget of one present or clean-up operation.
///
/// All requests of an operation share the budget: each one may only use the time that is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left until the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Returns the remaining time, or [`ProviderError::DeadlineExceeded`] if there is none
    pub fn check(&self) -> Result<Duration, ProviderError> {
        match self.remaining() {
            left if left.is_zero() => Err(ProviderError::DeadlineExceeded),
            left => Ok(left),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsRecord {
    /// Name relative to the zone
    pub name: String,
    pub content: RecordContent,
    pub ttl: Option<TTL>,
}

impl DnsRecord {
    pub fn txt(name: &str, value: &str, ttl: Option<TTL>) -> Self {
        DnsRecord {
            name: name.to_owned(),
            content: RecordContent::Txt(value.to_owned()),
            ttl,
        }
    }

    /// Returns the TXT value of this record, if it is one
    pub fn txt_value(&self) -> Option<&str> {
        match &self.content {
            RecordContent::Txt(txt) => Some(txt.as_str()),
            RecordContent::Other { .. } => None,
        }
    }

    /// Whether both records refer to the same name, type and value
    pub fn same_entry(&self, other: &DnsRecord) -> bool {
        self.name == other.name && self.content == other.content
    }
}

impl Display for DnsRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordContent {
    Txt(String),
    /// Any other record type. Not managed, but reported so that providers can return complete zones
    Other { kind: String, data: String },
}

impl RecordContent {
    /// The record type, such as `TXT`
    pub fn kind(&self) -> &str {
        match self {
            RecordContent::Txt(_) => "TXT",
            RecordContent::Other { kind, .. } => kind.as_str(),
        }
    }

    /// The record data as stored by the provider
    pub fn data(&self) -> &str {
        match self {
            RecordContent::Txt(txt) => txt.as_str(),
            RecordContent::Other { data, .. } => data.as_str(),
        }
    }

    /// Build record content from a provider's type string and data
    pub fn from_parts(kind: &str, data: &str) -> Self {
        if kind.eq_ignore_ascii_case("TXT") {
            RecordContent::Txt(data.to_owned())
        } else {
            RecordContent::Other {
                kind: kind.to_ascii_uppercase(),
                data: data.to_owned(),
            }
        }
    }
}

impl Display for RecordContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.data())
    }
}
