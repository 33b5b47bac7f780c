//! Alibaba Cloud DNS provider.
//!
//! Uses the RPC-style API: every call is a signed GET with an `Action` parameter.
//! API documentation: <https://www.alibabacloud.com/help/en/dns/api-alidns-2015-01-09-overview>

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use itertools::Itertools;
use log::debug;
use serde::{de::DeserializeOwned, Deserialize};
use sha1::Sha1;

use super::{
    rest,
    store::{PerRecord, RecordStore, StoredRecord},
    Deadline, DnsRecord, Provider, ProviderConfig, ProviderError, RecordContent,
};
use crate::config::TTL;

const PROVIDER: &str = "alidns";
const ALIDNS_ENDPOINT: &str = "https://alidns.aliyuncs.com";
const ALIDNS_API_VERSION: &str = "2015-01-09";
const ALIDNS_PAGE_SIZE: usize = 500;

/// Create an Alibaba Cloud DNS provider.
///
/// Requires `access_key_id` and `access_key_secret`. `region_id` and a `security_token`
/// for temporary (STS) credentials are optional.
pub fn from_config(config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    let keys = AliKeys {
        access_key_id: config.require(PROVIDER, "access_key_id")?.to_string(),
        access_key_secret: config.require(PROVIDER, "access_key_secret")?.to_string(),
        security_token: config.optional("security_token").map(str::to_string),
    };
    let provider = AliDnsProvider::new(keys, config.deadline)?;
    Ok(Box::new(PerRecord(match config.optional("region_id") {
        Some(region) => provider.with_region(region),
        None => provider,
    })))
}

pub struct AliKeys {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: Option<String>,
}

pub struct AliDnsProvider {
    client: rest::Http,
    endpoint: String,
    keys: AliKeys,
    region_id: Option<String>,
}

impl AliDnsProvider {
    pub fn new(keys: AliKeys, deadline: Deadline) -> Result<Self, ProviderError> {
        Ok(AliDnsProvider {
            client: rest::client(deadline)?,
            endpoint: ALIDNS_ENDPOINT.to_string(),
            keys,
            region_id: None,
        })
    }

    pub fn with_region(mut self, region_id: &str) -> Self {
        self.region_id = Some(region_id.to_string());
        self
    }

    /// Talk to a different API endpoint
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let nonce = uuid::Uuid::new_v4().to_string();

        let mut query = vec![
            ("AccessKeyId", self.keys.access_key_id.as_str()),
            ("Action", action),
            ("Format", "JSON"),
            ("SignatureMethod", "HMAC-SHA1"),
            ("SignatureNonce", nonce.as_str()),
            ("SignatureVersion", "1.0"),
            ("Timestamp", timestamp.as_str()),
            ("Version", ALIDNS_API_VERSION),
        ];
        if let Some(region) = &self.region_id {
            query.push(("RegionId", region.as_str()));
        }
        if let Some(token) = &self.keys.security_token {
            query.push(("SecurityToken", token.as_str()));
        }
        query.extend_from_slice(params);

        let signature = signature(&self.keys.access_key_secret, &query)?;
        query.push(("Signature", signature.as_str()));
        let url = format!("{}/?{}", self.endpoint, canonical_query(&query));

        rest::json(self.client.get(url)?, action)
    }
}

fn canonical_query(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| (rest::percent_encode(k), rest::percent_encode(v)))
        .sorted()
        .map(|(k, v)| format!("{}={}", k, v))
        .join("&")
}

/// Signature version 1.0: HMAC-SHA1 over the percent-encoded canonical query
fn signature(secret: &str, params: &[(&str, &str)]) -> Result<String, ProviderError> {
    let string_to_sign = format!(
        "GET&{}&{}",
        rest::percent_encode("/"),
        rest::percent_encode(&canonical_query(params))
    );
    let mut mac = Hmac::<Sha1>::new_from_slice(format!("{}&", secret).as_bytes())
        .map_err(|e| ProviderError::Internal(format!("HMAC error: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

impl RecordStore for AliDnsProvider {
    // Alibaba Cloud addresses domains by name
    fn zone_id(&self, zone: &str) -> Result<String, ProviderError> {
        Ok(zone.to_string())
    }

    fn list(&self, zone_id: &str, _zone: &str) -> Result<Vec<StoredRecord>, ProviderError> {
        let page_size = ALIDNS_PAGE_SIZE.to_string();
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let page_number = page.to_string();
            let response: DescribeDomainRecordsResponse = self.call(
                "DescribeDomainRecords",
                &[
                    ("DomainName", zone_id),
                    ("PageNumber", page_number.as_str()),
                    ("PageSize", page_size.as_str()),
                ],
            )?;
            let count = response.domain_records.record.len();
            records.extend(response.domain_records.record.into_iter().map(|r| {
                StoredRecord {
                    id: r.record_id,
                    record: DnsRecord {
                        name: r.rr,
                        content: RecordContent::from_parts(&r.kind, &r.value),
                        ttl: r.ttl,
                    },
                }
            }));
            if count < ALIDNS_PAGE_SIZE || records.len() >= response.total_count {
                debug!("Read {} records of domain {}", records.len(), zone_id);
                return Ok(records);
            }
            page += 1;
        }
    }

    fn create(&self, zone_id: &str, _zone: &str, record: &DnsRecord) -> Result<(), ProviderError> {
        let ttl = record.ttl.map(|t| t.to_string());
        let mut params = vec![
            ("DomainName", zone_id),
            ("RR", record.name.as_str()),
            ("Type", record.content.kind()),
            ("Value", record.content.data()),
        ];
        if let Some(ttl) = &ttl {
            params.push(("TTL", ttl.as_str()));
        }
        let _: serde_json::Value = self.call("AddDomainRecord", &params)?;
        Ok(())
    }

    fn update(
        &self,
        _zone_id: &str,
        _zone: &str,
        stored: &StoredRecord,
        record: &DnsRecord,
    ) -> Result<(), ProviderError> {
        let ttl = record.ttl.map(|t| t.to_string());
        let mut params = vec![
            ("RecordId", stored.id.as_str()),
            ("RR", record.name.as_str()),
            ("Type", record.content.kind()),
            ("Value", record.content.data()),
        ];
        if let Some(ttl) = &ttl {
            params.push(("TTL", ttl.as_str()));
        }
        let _: serde_json::Value = self.call("UpdateDomainRecord", &params)?;
        Ok(())
    }

    fn remove(
        &self,
        _zone_id: &str,
        _zone: &str,
        record: &StoredRecord,
    ) -> Result<(), ProviderError> {
        let _: serde_json::Value =
            self.call("DeleteDomainRecord", &[("RecordId", record.id.as_str())])?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainRecordsResponse {
    #[serde(default)]
    total_count: usize,
    domain_records: DomainRecords,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainRecords {
    #[serde(default)]
    record: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(rename = "RecordId")]
    record_id: String,
    /// Host record, `@` for the apex
    #[serde(rename = "RR")]
    rr: String,
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Value")]
    value: String,
    #[serde(rename = "TTL", default)]
    ttl: Option<TTL>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::{
        matchers::{method, query_param, query_param_is_missing},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::zone::APEX;

    #[test]
    fn should_sign_canonical_query() {
        assert_eq!(
            signature(
                "testsecret",
                &[("Action", "DescribeDomainRecords"), ("AccessKeyId", "testid")]
            )
            .unwrap(),
            "V0v/slI049/mpegiMMi5fPGgw8Y="
        );
    }

    #[test]
    fn should_sort_and_encode_query() {
        assert_eq!(
            canonical_query(&[("Value", "a b"), ("Action", "AddDomainRecord"), ("RR", APEX)]),
            "Action=AddDomainRecord&RR=%40&Value=a%20b"
        );
    }

    fn provider(uri: &str) -> PerRecord<AliDnsProvider> {
        PerRecord(
            AliDnsProvider::new(
                AliKeys {
                    access_key_id: "testid".to_string(),
                    access_key_secret: "testsecret".to_string(),
                    security_token: None,
                },
                Deadline::after(Duration::from_secs(5)),
            )
            .unwrap()
            .with_endpoint(uri),
        )
    }

    #[tokio::test]
    async fn should_replace_records_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("Action", "DescribeDomainRecords"))
            .and(query_param("DomainName", "example.com"))
            .and(query_param("AccessKeyId", "testid"))
            .and(query_param_is_missing("SecurityToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "TotalCount": 2, "PageNumber": 1, "PageSize": 500,
                "DomainRecords": {"Record": [
                    {"RecordId": "11", "RR": "_acme-challenge", "Type": "TXT", "Value": "old", "TTL": 600, "DomainName": "example.com"},
                    {"RecordId": "12", "RR": "@", "Type": "A", "Value": "192.0.2.1", "TTL": 600, "DomainName": "example.com"}
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("Action", "AddDomainRecord"))
            .and(query_param("RR", "_acme-challenge"))
            .and(query_param("Value", "new"))
            .and(query_param("TTL", "600"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"RecordId": "13"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("Action", "DeleteDomainRecord"))
            .and(query_param("RecordId", "11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"RecordId": "11"})))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        tokio::task::spawn_blocking(move || {
            provider(&uri).set_records(
                "example.com",
                &[DnsRecord::txt("_acme-challenge", "new", Some(600))],
            )
        })
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn should_surface_api_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "Code": "InvalidDomainName.NoExist", "Message": "The specified domain name does not exist."
            })))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = tokio::task::spawn_blocking(move || provider(&uri).get_records("example.com"))
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("InvalidDomainName.NoExist"));
    }
}
