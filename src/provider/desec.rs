//! deSEC provider.
//!
//! deSEC manages whole record sets: all values of a (name, type) pair are written in one request,
//! and writing an empty set removes it. TXT values travel in quoted presentation format.
//! API documentation: <https://desec.readthedocs.io/en/latest/dns/rrsets.html>

use std::collections::BTreeMap;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::{
    rest, Deadline, DnsRecord, Provider, ProviderConfig, ProviderError, RecordContent,
};
use crate::{config::TTL, zone::APEX};

const PROVIDER: &str = "desec";
const DESEC_API_BASE: &str = "https://desec.io/api/v1";

/// Lowest TTL accepted by deSEC for regular accounts
pub const DESEC_MIN_TTL: TTL = 3600;

/// Create a deSEC provider. Requires an `api_token`.
pub fn from_config(config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    let token = config.require(PROVIDER, "api_token")?;
    Ok(Box::new(DesecProvider::new(token, config.deadline)?))
}

pub struct DesecProvider {
    client: rest::Http,
    base_url: String,
    token: String,
}

/// All values of one record set, keyed by (name, type)
type RRsets = BTreeMap<(String, String), Vec<DnsRecord>>;

impl DesecProvider {
    pub fn new(token: &str, deadline: Deadline) -> Result<Self, ProviderError> {
        Ok(DesecProvider {
            client: rest::client(deadline)?,
            base_url: DESEC_API_BASE.to_string(),
            token: token.to_string(),
        })
    }

    /// Talk to a different API endpoint
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn rrsets_url(&self, zone: &str) -> String {
        format!("{}/domains/{}/rrsets/", self.base_url, zone)
    }

    fn auth(&self) -> String {
        format!("Token {}", self.token)
    }

    /// Write the given record sets in a single bulk request. Sets without records are deleted.
    fn write(&self, zone: &str, rrsets: &RRsets) -> Result<(), ProviderError> {
        let body = rrsets
            .iter()
            .map(|((name, kind), records)| RRset {
                subname: subname(name).to_string(),
                kind: kind.to_owned(),
                ttl: Some(
                    records
                        .iter()
                        .filter_map(|r| r.ttl)
                        .max()
                        .unwrap_or(DESEC_MIN_TTL)
                        .max(DESEC_MIN_TTL),
                ),
                records: records.iter().map(|r| wire_value(&r.content)).collect(),
            })
            .collect::<Vec<_>>();
        trace!("Writing rrsets to zone {}: {:?}", zone, body);

        rest::send(
            self.client
                .patch(self.rrsets_url(zone))?
                .header("Authorization", self.auth())
                .json(&body),
            "write rrsets",
        )?;
        Ok(())
    }
}

impl Provider for DesecProvider {
    fn get_records(&self, zone: &str) -> Result<Vec<DnsRecord>, ProviderError> {
        let response = rest::send_allow_missing(
            self.client
                .get(self.rrsets_url(zone))?
                .header("Authorization", self.auth()),
            "list rrsets",
        )?
        .ok_or_else(|| ProviderError::ZoneNotFound(zone.to_string()))?;
        let rrsets: Vec<RRset> = response
            .json()
            .map_err(|e| ProviderError::Api(format!("failed to parse rrsets response: {}", e)))?;

        let records = rrsets
            .into_iter()
            .flat_map(|set| {
                let name = if set.subname.is_empty() {
                    APEX.to_string()
                } else {
                    set.subname
                };
                let (kind, ttl) = (set.kind, set.ttl);
                set.records.into_iter().map(move |value| DnsRecord {
                    name: name.clone(),
                    content: match RecordContent::from_parts(&kind, &value) {
                        RecordContent::Txt(txt) => RecordContent::Txt(rest::unquote_txt(&txt)),
                        other => other,
                    },
                    ttl,
                })
            })
            .collect::<Vec<_>>();
        trace!("Collected records in zone {}: {:?}", zone, records);
        Ok(records)
    }

    fn set_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        let mut rrsets = RRsets::new();
        for r in records {
            let values = rrsets.entry(key(r)).or_default();
            if !values.iter().any(|v| v.same_entry(r)) {
                values.push(r.clone());
            }
        }
        self.write(zone, &rrsets)?;
        debug!("Set {} rrset(s) in zone {}", rrsets.len(), zone);
        Ok(records.to_vec())
    }

    fn append_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        let existing = self.get_records(zone)?;
        let mut rrsets = RRsets::new();
        for r in records {
            rrsets.entry(key(r)).or_insert_with(|| {
                existing
                    .iter()
                    .filter(|e| key(e) == key(r))
                    .cloned()
                    .collect()
            });
        }
        for r in records {
            let values = rrsets.entry(key(r)).or_default();
            if !values.iter().any(|v| v.same_entry(r)) {
                values.push(r.clone());
            }
        }
        self.write(zone, &rrsets)?;
        Ok(records.to_vec())
    }

    fn delete_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        let existing = self.get_records(zone)?;
        let (deleted, kept): (Vec<_>, Vec<_>) = existing
            .into_iter()
            .partition(|e| records.iter().any(|r| r.same_entry(e)));
        if deleted.is_empty() {
            debug!("No matching records to delete in zone {}", zone);
            return Ok(deleted);
        }

        let mut rrsets = RRsets::new();
        for d in &deleted {
            rrsets.entry(key(d)).or_insert_with(|| {
                kept.iter()
                    .filter(|k| key(k) == key(d))
                    .cloned()
                    .collect()
            });
        }
        self.write(zone, &rrsets)?;
        Ok(deleted)
    }
}

fn key(r: &DnsRecord) -> (String, String) {
    (r.name.clone(), r.content.kind().to_string())
}

fn subname(name: &str) -> &str {
    if name == APEX {
        ""
    } else {
        name
    }
}

fn wire_value(content: &RecordContent) -> String {
    match content {
        RecordContent::Txt(txt) => rest::quote_txt(txt),
        RecordContent::Other { data, .. } => data.to_owned(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RRset {
    subname: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    ttl: Option<TTL>,
    records: Vec<String>,
}
