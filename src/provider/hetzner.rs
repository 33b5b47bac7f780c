//! Hetzner DNS provider.
//!
//! API documentation: <https://dns.hetzner.com/api-docs>

use log::debug;
use serde::{Deserialize, Serialize};

use super::{
    rest,
    store::{PerRecord, RecordStore, StoredRecord},
    Deadline, DnsRecord, Provider, ProviderConfig, ProviderError, RecordContent,
};
use crate::config::TTL;

const PROVIDER: &str = "hetzner";
const HETZNER_API_BASE: &str = "https://dns.hetzner.com/api/v1";

/// Create a Hetzner provider. Requires an `api_token`.
pub fn from_config(config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    let token = config.require(PROVIDER, "api_token")?;
    Ok(Box::new(PerRecord(HetznerProvider::new(
        token,
        config.deadline,
    )?)))
}

pub struct HetznerProvider {
    client: rest::Http,
    base_url: String,
    token: String,
}

impl HetznerProvider {
    pub fn new(token: &str, deadline: Deadline) -> Result<Self, ProviderError> {
        Ok(HetznerProvider {
            client: rest::client(deadline)?,
            base_url: HETZNER_API_BASE.to_string(),
            token: token.to_string(),
        })
    }

    /// Talk to a different API endpoint
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

impl RecordStore for HetznerProvider {
    fn zone_id(&self, zone: &str) -> Result<String, ProviderError> {
        let request = self
            .client
            .get(format!("{}/zones", self.base_url))?
            .query(&[("name", zone)])
            .header("Auth-API-Token", &self.token);
        let zones: ZonesResponse = match rest::send_allow_missing(request, "list zones")? {
            Some(response) => response.json().map_err(|e| {
                ProviderError::Api(format!("failed to parse zones response: {}", e))
            })?,
            None => return Err(ProviderError::ZoneNotFound(zone.to_string())),
        };

        let zone_id = zones
            .zones
            .into_iter()
            .find(|z| z.name == zone)
            .map(|z| z.id)
            .ok_or_else(|| ProviderError::ZoneNotFound(zone.to_string()))?;
        debug!("Found Hetzner zone {} for {}", zone_id, zone);
        Ok(zone_id)
    }

    fn list(&self, zone_id: &str, _zone: &str) -> Result<Vec<StoredRecord>, ProviderError> {
        let records: RecordsResponse = rest::json(
            self.client
                .get(format!("{}/records", self.base_url))?
                .query(&[("zone_id", zone_id)])
                .header("Auth-API-Token", &self.token),
            "list records",
        )?;
        Ok(records
            .records
            .into_iter()
            .map(|r| StoredRecord {
                record: DnsRecord {
                    content: match RecordContent::from_parts(&r.kind, &r.value) {
                        RecordContent::Txt(txt) => RecordContent::Txt(rest::unquote_txt(&txt)),
                        other => other,
                    },
                    name: r.name,
                    ttl: r.ttl,
                },
                id: r.id,
            })
            .collect())
    }

    fn create(&self, zone_id: &str, _zone: &str, record: &DnsRecord) -> Result<(), ProviderError> {
        let request = CreateRecordRequest {
            zone_id,
            name: &record.name,
            kind: record.content.kind(),
            value: record.content.data(),
            ttl: record.ttl,
        };
        rest::send(
            self.client
                .post(format!("{}/records", self.base_url))?
                .header("Auth-API-Token", &self.token)
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
        let request = CreateRecordRequest {
            zone_id,
            name: &record.name,
            kind: record.content.kind(),
            value: record.content.data(),
            ttl: record.ttl,
        };
        rest::send(
            self.client
                .put(format!("{}/records/{}", self.base_url, stored.id))?
                .header("Auth-API-Token", &self.token)
                .json(&request),
            "update record",
        )?;
        Ok(())
    }

    fn remove(
        &self,
        _zone_id: &str,
        _zone: &str,
        record: &StoredRecord,
    ) -> Result<(), ProviderError> {
        let response = rest::send_allow_missing(
            self.client
                .delete(format!("{}/records/{}", self.base_url, record.id))?
                .header("Auth-API-Token", &self.token),
            "delete record",
        )?;
        if response.is_none() {
            debug!("Record {} already deleted", record.id);
        }
        Ok(())
    }
}

// Hetzner API types

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    #[serde(default)]
    zones: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(default)]
    ttl: Option<TTL>,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    zone_id: &'a str,
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<TTL>,
}
