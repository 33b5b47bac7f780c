//! AWS Route 53 provider.
//!
//! Route 53 stores record sets: every change replaces (UPSERT) or removes (DELETE) all values of
//! a (name, type) pair at once. Requests are signed with AWS Signature Version 4 and talk XML.
//! API documentation: <https://docs.aws.amazon.com/Route53/latest/APIReference/>

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use itertools::Itertools;
use log::{debug, trace};
use reqwest::blocking::RequestBuilder;
use sha2::{Digest, Sha256};

use super::{
    rest, Deadline, DnsRecord, Provider, ProviderConfig, ProviderError, RecordContent,
};
use crate::{
    config::{DEFAULT_TTL, TTL},
    zone::{absolute_name, relative_name},
};

const PROVIDER: &str = "route53";
const ROUTE53_ENDPOINT: &str = "https://route53.amazonaws.com";
const ROUTE53_API_VERSION: &str = "2013-04-01";
const DEFAULT_REGION: &str = "us-east-1";

type HmacSha256 = Hmac<Sha256>;

/// Create a Route 53 provider.
///
/// Requires `access_key_id` and `secret_access_key`. `region` (default `us-east-1`) and a
/// `session_token` for temporary credentials are optional.
pub fn from_config(config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    let credentials = AwsCredentials {
        access_key_id: config.require(PROVIDER, "access_key_id")?.to_string(),
        secret_access_key: config.require(PROVIDER, "secret_access_key")?.to_string(),
        session_token: config.optional("session_token").map(str::to_string),
    };
    let region = config.optional("region").unwrap_or(DEFAULT_REGION);
    Ok(Box::new(Route53Provider::new(
        credentials,
        region,
        config.deadline,
    )?))
}

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

pub struct Route53Provider {
    client: rest::Http,
    endpoint: String,
    region: String,
    credentials: AwsCredentials,
}

/// A request to be signed. `query` must already be in canonical form (sorted, percent-encoded).
struct SigningRequest<'a> {
    method: &'a str,
    host: &'a str,
    path: &'a str,
    query: &'a str,
    payload: &'a str,
}

/// All values of one record set, keyed by (name, type)
type RRsets = BTreeMap<(String, String), Vec<DnsRecord>>;

enum Change {
    Upsert(Vec<DnsRecord>),
    Delete(Vec<DnsRecord>),
}

impl Route53Provider {
    pub fn new(
        credentials: AwsCredentials,
        region: &str,
        deadline: Deadline,
    ) -> Result<Self, ProviderError> {
        Ok(Route53Provider {
            client: rest::client(deadline)?,
            endpoint: ROUTE53_ENDPOINT.to_string(),
            region: region.to_string(),
            credentials,
        })
    }

    /// Talk to a different API endpoint
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn host(&self) -> &str {
        self.endpoint
            .split_once("://")
            .map(|(_, host)| host)
            .unwrap_or(&self.endpoint)
    }

    /// Build a signed request. `query` holds unencoded key/value pairs.
    fn request(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        payload: &str,
    ) -> Result<RequestBuilder, ProviderError> {
        let query = query
            .iter()
            .map(|(k, v)| (rest::percent_encode(k), rest::percent_encode(v)))
            .sorted()
            .map(|(k, v)| format!("{}={}", k, v))
            .join("&");
        let headers = sign(
            &self.credentials,
            &self.region,
            "route53",
            &SigningRequest {
                method,
                host: self.host(),
                path,
                query: &query,
                payload,
            },
            Utc::now(),
        )?;

        let url = if query.is_empty() {
            format!("{}{}", self.endpoint, path)
        } else {
            format!("{}{}?{}", self.endpoint, path, query)
        };
        let mut request = match method {
            "POST" => self
                .client
                .post(url)?
                .header("Content-Type", "application/xml")
                .body(payload.to_string()),
            _ => self.client.get(url)?,
        };
        for (name, value) in headers {
            request = request.header(name, value);
        }
        Ok(request)
    }

    fn hosted_zone_id(&self, zone: &str) -> Result<String, ProviderError> {
        let path = format!("/{}/hostedzonesbyname", ROUTE53_API_VERSION);
        let body = rest::send(
            self.request("GET", &path, &[("dnsname", zone), ("maxitems", "1")], "")?,
            "list hosted zones",
        )?
        .text()
        .map_err(|e| ProviderError::Api(format!("failed to read hosted zones: {}", e)))?;

        let fqdn = format!("{}.", zone);
        let id = elements(&body, "HostedZone")
            .into_iter()
            .find(|z| element(z, "Name").map(xml_unescape).as_deref() == Some(fqdn.as_str()))
            .and_then(|z| element(z, "Id"))
            .map(|id| id.trim_start_matches("/hostedzone/").to_string())
            .ok_or_else(|| ProviderError::ZoneNotFound(zone.to_string()))?;
        debug!("Found hosted zone {} for {}", id, zone);
        Ok(id)
    }

    fn list_rrsets(&self, zone_id: &str, zone: &str) -> Result<Vec<DnsRecord>, ProviderError> {
        let path = format!("/{}/hostedzone/{}/rrset", ROUTE53_API_VERSION, zone_id);
        let mut records = Vec::new();
        let mut next: Option<(String, String)> = None;
        loop {
            let query = match &next {
                Some((name, kind)) => vec![("name", name.as_str()), ("type", kind.as_str())],
                None => vec![],
            };
            let body = rest::send(
                self.request("GET", &path, &query, "")?,
                "list resource record sets",
            )?
            .text()
            .map_err(|e| ProviderError::Api(format!("failed to read record sets: {}", e)))?;

            for set in elements(&body, "ResourceRecordSet") {
                let (Some(name), Some(kind)) = (element(set, "Name"), element(set, "Type")) else {
                    continue;
                };
                let name = relative_name(&xml_unescape(name).replace("\\052", "*"), zone);
                let ttl = element(set, "TTL").and_then(|t| t.parse::<TTL>().ok());
                for value in elements(set, "Value") {
                    let value = xml_unescape(value);
                    records.push(DnsRecord {
                        name: name.clone(),
                        content: match RecordContent::from_parts(kind, &value) {
                            RecordContent::Txt(txt) => RecordContent::Txt(rest::unquote_txt(&txt)),
                            other => other,
                        },
                        ttl,
                    });
                }
            }

            if element(&body, "IsTruncated") != Some("true") {
                return Ok(records);
            }
            next = match (
                element(&body, "NextRecordName"),
                element(&body, "NextRecordType"),
            ) {
                (Some(name), Some(kind)) => Some((xml_unescape(name), kind.to_string())),
                _ => return Ok(records),
            };
        }
    }

    fn change(&self, zone_id: &str, zone: &str, changes: &[Change]) -> Result<(), ProviderError> {
        if changes.is_empty() {
            return Ok(());
        }
        let payload = change_batch(zone, changes);
        trace!("Submitting change batch to zone {}: {}", zone, payload);
        let path = format!("/{}/hostedzone/{}/rrset", ROUTE53_API_VERSION, zone_id);
        rest::send(
            self.request("POST", &path, &[], &payload)?,
            "change resource record sets",
        )?;
        debug!("Submitted {} change(s) to zone {}", changes.len(), zone);
        Ok(())
    }
}

impl Provider for Route53Provider {
    fn get_records(&self, zone: &str) -> Result<Vec<DnsRecord>, ProviderError> {
        let zone_id = self.hosted_zone_id(zone)?;
        self.list_rrsets(&zone_id, zone)
    }

    fn set_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        let zone_id = self.hosted_zone_id(zone)?;
        let changes = group(records.iter())
            .into_values()
            .map(Change::Upsert)
            .collect::<Vec<_>>();
        self.change(&zone_id, zone, &changes)?;
        Ok(records.to_vec())
    }

    fn append_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        let zone_id = self.hosted_zone_id(zone)?;
        let existing = self.list_rrsets(&zone_id, zone)?;
        let affected = group(records.iter());
        let changes = group(
            existing
                .iter()
                .filter(|e| affected.contains_key(&key(e)))
                .chain(records.iter()),
        )
        .into_values()
        .map(Change::Upsert)
        .collect::<Vec<_>>();
        self.change(&zone_id, zone, &changes)?;
        Ok(records.to_vec())
    }

    fn delete_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        let zone_id = self.hosted_zone_id(zone)?;
        let existing = self.list_rrsets(&zone_id, zone)?;
        let deleted = existing
            .iter()
            .filter(|e| records.iter().any(|r| r.same_entry(e)))
            .cloned()
            .collect::<Vec<_>>();
        if deleted.is_empty() {
            debug!("No matching records to delete in zone {}", zone);
            return Ok(deleted);
        }

        let affected = group(deleted.iter());
        let changes = group(existing.iter().filter(|e| affected.contains_key(&key(e))))
            .into_values()
            .map(|current| {
                let remaining = current
                    .iter()
                    .filter(|c| !deleted.iter().any(|d| d.same_entry(c)))
                    .cloned()
                    .collect::<Vec<_>>();
                if remaining.is_empty() {
                    // DELETE must name the record set exactly as it exists
                    Change::Delete(current)
                } else {
                    Change::Upsert(remaining)
                }
            })
            .collect::<Vec<_>>();
        self.change(&zone_id, zone, &changes)?;
        Ok(deleted)
    }
}

fn key(r: &DnsRecord) -> (String, String) {
    (r.name.clone(), r.content.kind().to_string())
}

// Group records into record sets, dropping duplicate values
fn group<'a>(records: impl Iterator<Item = &'a DnsRecord>) -> RRsets {
    let mut sets = RRsets::new();
    for r in records {
        let values = sets.entry(key(r)).or_default();
        if !values.iter().any(|v| v.same_entry(r)) {
            values.push(r.clone());
        }
    }
    sets
}

fn change_batch(zone: &str, changes: &[Change]) -> String {
    let changes = changes
        .iter()
        .filter_map(|change| {
            let (action, records) = match change {
                Change::Upsert(records) => ("UPSERT", records),
                Change::Delete(records) => ("DELETE", records),
            };
            let first = records.first()?;
            let ttl = records
                .iter()
                .filter_map(|r| r.ttl)
                .max()
                .unwrap_or(DEFAULT_TTL);
            let values = records
                .iter()
                .map(|r| {
                    let value = match &r.content {
                        RecordContent::Txt(txt) => rest::quote_txt(txt),
                        RecordContent::Other { data, .. } => data.to_owned(),
                    };
                    format!(
                        "<ResourceRecord><Value>{}</Value></ResourceRecord>",
                        xml_escape(&value)
                    )
                })
                .join("");
            Some(format!(
                "<Change><Action>{}</Action><ResourceRecordSet><Name>{}.</Name><Type>{}</Type>\
                 <TTL>{}</TTL><ResourceRecords>{}</ResourceRecords></ResourceRecordSet></Change>",
                action,
                xml_escape(&absolute_name(&first.name, zone)),
                first.content.kind(),
                ttl,
                values
            ))
        })
        .join("");
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <ChangeResourceRecordSetsRequest xmlns=\"https://route53.amazonaws.com/doc/{}/\">\
         <ChangeBatch><Changes>{}</Changes></ChangeBatch></ChangeResourceRecordSetsRequest>",
        ROUTE53_API_VERSION, changes
    )
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ProviderError::Internal(format!("HMAC error: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Compute the AWS Signature Version 4 headers for a request
fn sign(
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    request: &SigningRequest,
    now: DateTime<Utc>,
) -> Result<Vec<(&'static str, String)>, ProviderError> {
    let date = now.format("%Y%m%d").to_string();
    let datetime = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![("host", request.host.to_string()), ("x-amz-date", datetime.clone())];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token", token.to_owned()));
    }
    let canonical_headers = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .join("");
    let signed_headers = headers.iter().map(|(name, _)| *name).join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.path,
        request.query,
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(request.payload.as_bytes()))
    );
    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        datetime,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(
        format!("AWS4{}", credentials.secret_access_key).as_bytes(),
        &date,
    )?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, service)?;
    let k_signing = hmac_sha256(&k_service, "aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

    let mut signed = vec![(
        "Authorization",
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            credentials.access_key_id, scope, signed_headers, signature
        ),
    )];
    // reqwest sets the host header itself
    signed.extend(
        headers
            .into_iter()
            .filter(|(name, _)| *name != "host")
            .map(|(name, value)| match name {
                "x-amz-date" => ("X-Amz-Date", value),
                _ => ("X-Amz-Security-Token", value),
            }),
    );
    Ok(signed)
}

/// Inner text of every `<tag>` element, in document order
fn elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut found = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        found.push(&after[..end]);
        rest = &after[end + close.len()..];
    }
    found
}

fn element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    elements(xml, tag).into_iter().next()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
