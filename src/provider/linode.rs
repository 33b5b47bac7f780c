//! Linode (Akamai) domains provider.
//!
//! API documentation: <https://techdocs.akamai.com/linode-api/reference/get-domains>

use log::debug;
use reqwest::blocking::RequestBuilder;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    rest,
    store::{PerRecord, RecordStore, StoredRecord},
    Deadline, DnsRecord, Provider, ProviderConfig, ProviderError, RecordContent,
};
use crate::{config::TTL, zone::APEX};

const PROVIDER: &str = "linode";
const LINODE_API_BASE: &str = "https://api.linode.com/v4";
const LINODE_PAGE_SIZE: u32 = 500;

/// Create a Linode provider. Requires an `api_token` (personal access token with domains scope).
pub fn from_config(config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    let token = config.require(PROVIDER, "api_token")?;
    Ok(Box::new(PerRecord(LinodeProvider::new(
        token,
        config.deadline,
    )?)))
}

pub struct LinodeProvider {
    client: rest::Http,
    base_url: String,
    token: String,
}

impl LinodeProvider {
    pub fn new(token: &str, deadline: Deadline) -> Result<Self, ProviderError> {
        Ok(LinodeProvider {
            client: rest::client(deadline)?,
            base_url: LINODE_API_BASE.to_string(),
            token: token.to_string(),
        })
    }

    /// Talk to a different API endpoint
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    // Collect all pages of a listing. `request` builds the request for the given page.
    fn paged<T: DeserializeOwned>(
        &self,
        what: &str,
        request: impl Fn(u32) -> Result<RequestBuilder, ProviderError>,
    ) -> Result<Vec<T>, ProviderError> {
        let mut page = 1;
        let mut items = Vec::new();
        loop {
            let response: Page<T> = rest::json(
                request(page)?
                    .bearer_auth(&self.token)
                    .query(&[("page", page), ("page_size", LINODE_PAGE_SIZE)]),
                what,
            )?;
            items.extend(response.data);
            if response.page >= response.pages {
                return Ok(items);
            }
            page += 1;
        }
    }
}

impl RecordStore for LinodeProvider {
    fn zone_id(&self, zone: &str) -> Result<String, ProviderError> {
        let filter = serde_json::json!({ "domain": zone }).to_string();
        let domains: Vec<Domain> = self.paged("list domains", |_| {
            Ok(self
                .client
                .get(format!("{}/domains", self.base_url))?
                .header("X-Filter", filter.as_str()))
        })?;
        let id = domains
            .into_iter()
            .find(|d| d.domain.eq_ignore_ascii_case(zone))
            .map(|d| d.id.to_string())
            .ok_or_else(|| ProviderError::ZoneNotFound(zone.to_string()))?;
        debug!("Found Linode domain {} for {}", id, zone);
        Ok(id)
    }

    fn list(&self, zone_id: &str, _zone: &str) -> Result<Vec<StoredRecord>, ProviderError> {
        let records: Vec<Record> = self.paged("list records", |_| {
            self.client
                .get(format!("{}/domains/{}/records", self.base_url, zone_id))
        })?;
        Ok(records
            .into_iter()
            .map(|r| StoredRecord {
                id: r.id.to_string(),
                record: DnsRecord {
                    name: if r.name.is_empty() {
                        APEX.to_string()
                    } else {
                        r.name
                    },
                    content: RecordContent::from_parts(&r.kind, &r.target),
                    ttl: Some(r.ttl_sec).filter(|ttl| *ttl > 0),
                },
            })
            .collect())
    }

    fn create(&self, zone_id: &str, _zone: &str, record: &DnsRecord) -> Result<(), ProviderError> {
        let request = CreateRecordRequest {
            kind: record.content.kind(),
            name: if record.name == APEX { "" } else { record.name.as_str() },
            target: record.content.data(),
            ttl_sec: record.ttl,
        };
        rest::send(
            self.client
                .post(format!("{}/domains/{}/records", self.base_url, zone_id))?
                .bearer_auth(&self.token)
                .json(&request),
            "create record",
        )?;
        Ok(())
    }

    fn update(
        &self,
        zone_id: &str,
        _zone: &str,
        stored: &StoredRecord,
        record: &DnsRecord,
    ) -> Result<(), ProviderError> {
        rest::send(
            self.client
                .put(format!(
                    "{}/domains/{}/records/{}",
                    self.base_url, zone_id, stored.id
                ))?
                .bearer_auth(&self.token)
                .json(&UpdateRecordRequest {
                    ttl_sec: record.ttl,
                }),
            "update record",
        )?;
        Ok(())
    }

    fn remove(
        &self,
        zone_id: &str,
        _zone: &str,
        record: &StoredRecord,
    ) -> Result<(), ProviderError> {
        rest::send_allow_missing(
            self.client
                .delete(format!(
                    "{}/domains/{}/records/{}",
                    self.base_url, zone_id, record.id
                ))?
                .bearer_auth(&self.token),
            "delete record",
        )?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    page: u32,
    pages: u32,
}

#[derive(Debug, Deserialize)]
struct Domain {
    id: u64,
    domain: String,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: u64,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    target: String,
    #[serde(default)]
    ttl_sec: TTL,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_sec: Option<TTL>,
}

#[derive(Debug, Serialize)]
struct UpdateRecordRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_sec: Option<TTL>,
}
