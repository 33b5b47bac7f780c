//! OVHcloud provider.
//!
//! Every request is signed with the application secret and consumer key against the server clock.
//! Changes to a zone only become visible once the zone is refreshed, which happens once per
//! operation. API documentation: <https://api.ovh.com/console/#/domain/zone>

use std::{
    sync::OnceLock,
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, trace};
use reqwest::blocking::RequestBuilder;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use super::{
    rest,
    store::{PerRecord, RecordStore, StoredRecord},
    Deadline, DnsRecord, Provider, ProviderConfig, ProviderError, RecordContent,
};
use crate::{config::TTL, zone::APEX};

const PROVIDER: &str = "ovh";

/// Create an OVH provider.
///
/// Requires `endpoint` (`ovh-eu`, `ovh-ca`, `ovh-us` or an API URL), `application_key`,
/// `application_secret` and `consumer_key`.
pub fn from_config(config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    let endpoint = config.require(PROVIDER, "endpoint")?;
    let keys = OvhKeys {
        application_key: config.require(PROVIDER, "application_key")?.to_string(),
        application_secret: config.require(PROVIDER, "application_secret")?.to_string(),
        consumer_key: config.require(PROVIDER, "consumer_key")?.to_string(),
    };
    Ok(Box::new(PerRecord(OvhProvider::new(
        endpoint,
        keys,
        config.deadline,
    )?)))
}

/// Resolve an endpoint name to its API base URL
pub fn endpoint_url(endpoint: &str) -> Result<String, ProviderError> {
    let url = match endpoint {
        "ovh-eu" => "https://eu.api.ovh.com/1.0",
        "ovh-ca" => "https://ca.api.ovh.com/1.0",
        "ovh-us" => "https://api.us.ovhcloud.com/1.0",
        url if url.starts_with("https://") || url.starts_with("http://") => url,
        other => {
            return Err(ProviderError::Internal(format!(
                "ovh: unknown endpoint {}",
                other
            )))
        }
    };
    Ok(url.trim_end_matches('/').to_string())
}

pub struct OvhKeys {
    pub application_key: String,
    pub application_secret: String,
    pub consumer_key: String,
}

pub struct OvhProvider {
    client: rest::Http,
    base_url: String,
    keys: OvhKeys,
    // Offset of the API clock against the local one, in seconds
    time_delta: OnceLock<i64>,
}

impl OvhProvider {
    pub fn new(endpoint: &str, keys: OvhKeys, deadline: Deadline) -> Result<Self, ProviderError> {
        Ok(OvhProvider {
            client: rest::client(deadline)?,
            base_url: endpoint_url(endpoint)?,
            keys,
            time_delta: OnceLock::new(),
        })
    }

    fn timestamp(&self) -> Result<i64, ProviderError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ProviderError::Internal(e.to_string()))?
            .as_secs() as i64;
        if let Some(delta) = self.time_delta.get() {
            return Ok(now + delta);
        }

        let server: i64 = rest::send(
            self.client.get(format!("{}/auth/time", self.base_url))?,
            "get server time",
        )?
        .text()
        .map_err(|e| ProviderError::Api(format!("failed to read server time: {}", e)))?
        .trim()
        .parse()
        .map_err(|e| ProviderError::Api(format!("invalid server time: {}", e)))?;
        let delta = *self.time_delta.get_or_init(|| server - now);
        trace!("OVH clock delta is {}s", delta);
        Ok(now + delta)
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<String>,
    ) -> Result<RequestBuilder, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let body = body.unwrap_or_default();
        let timestamp = self.timestamp()?.to_string();
        let signature = signature(
            &self.keys.application_secret,
            &self.keys.consumer_key,
            method.as_str(),
            &url,
            &body,
            &timestamp,
        );

        let mut request = self
            .client
            .request(method, url)?
            .header("X-Ovh-Application", &self.keys.application_key)
            .header("X-Ovh-Consumer", &self.keys.consumer_key)
            .header("X-Ovh-Timestamp", timestamp)
            .header("X-Ovh-Signature", signature);
        if !body.is_empty() {
            request = request.header("Content-Type", "application/json").body(body);
        }
        Ok(request)
    }
}

/// `$1$` signature over the request and the (server-adjusted) timestamp
fn signature(
    application_secret: &str,
    consumer_key: &str,
    method: &str,
    url: &str,
    body: &str,
    timestamp: &str,
) -> String {
    let payload = [application_secret, consumer_key, method, url, body, timestamp].join("+");
    format!("$1${}", hex::encode(Sha1::digest(payload.as_bytes())))
}

impl RecordStore for OvhProvider {
    fn zone_id(&self, zone: &str) -> Result<String, ProviderError> {
        let path = format!("/domain/zone/{}", zone);
        match rest::send_allow_missing(
            self.request(reqwest::Method::GET, &path, None)?,
            "get zone",
        )? {
            Some(_) => Ok(zone.to_string()),
            None => Err(ProviderError::ZoneNotFound(zone.to_string())),
        }
    }

    fn list(&self, zone_id: &str, _zone: &str) -> Result<Vec<StoredRecord>, ProviderError> {
        let ids: Vec<u64> = rest::json(
            self.request(
                reqwest::Method::GET,
                &format!("/domain/zone/{}/record", zone_id),
                None,
            )?,
            "list records",
        )?;
        debug!("Reading {} records of zone {}", ids.len(), zone_id);

        ids.into_iter()
            .map(|id| {
                let r: Record = rest::json(
                    self.request(
                        reqwest::Method::GET,
                        &format!("/domain/zone/{}/record/{}", zone_id, id),
                        None,
                    )?,
                    "get record",
                )?;
                Ok(StoredRecord {
                    id: r.id.to_string(),
                    record: DnsRecord {
                        name: if r.sub_domain.is_empty() {
                            APEX.to_string()
                        } else {
                            r.sub_domain
                        },
                        content: match RecordContent::from_parts(&r.field_type, &r.target) {
                            RecordContent::Txt(txt) => RecordContent::Txt(rest::unquote_txt(&txt)),
                            other => other,
                        },
                        ttl: r.ttl.filter(|ttl| *ttl > 0),
                    },
                })
            })
            .collect()
    }

    fn create(&self, zone_id: &str, _zone: &str, record: &DnsRecord) -> Result<(), ProviderError> {
        let body = serde_json::to_string(&CreateRecordRequest {
            field_type: record.content.kind(),
            sub_domain: if record.name == APEX { "" } else { record.name.as_str() },
            target: record.content.data(),
            ttl: record.ttl,
        })
        .map_err(|e| ProviderError::Internal(e.to_string()))?;
        rest::send(
            self.request(
                reqwest::Method::POST,
                &format!("/domain/zone/{}/record", zone_id),
                Some(body),
            )?,
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
        let body = serde_json::to_string(&UpdateRecordRequest { ttl: record.ttl })
            .map_err(|e| ProviderError::Internal(e.to_string()))?;
        rest::send(
            self.request(
                reqwest::Method::PUT,
                &format!("/domain/zone/{}/record/{}", zone_id, stored.id),
                Some(body),
            )?,
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
            self.request(
                reqwest::Method::DELETE,
                &format!("/domain/zone/{}/record/{}", zone_id, record.id),
                None,
            )?,
            "delete record",
        )?;
        Ok(())
    }

    fn commit(&self, zone_id: &str, _zone: &str) -> Result<(), ProviderError> {
        rest::send(
            self.request(
                reqwest::Method::POST,
                &format!("/domain/zone/{}/refresh", zone_id),
                None,
            )?,
            "refresh zone",
        )?;
        debug!("Refreshed zone {}", zone_id);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    id: u64,
    field_type: String,
    #[serde(default)]
    sub_domain: String,
    target: String,
    #[serde(default)]
    ttl: Option<TTL>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRecordRequest<'a> {
    field_type: &'a str,
    sub_domain: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<TTL>,
}

#[derive(Debug, Serialize)]
struct UpdateRecordRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<TTL>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, header_exists, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    #[test]
    fn should_sign_requests() {
        assert_eq!(
            signature(
                "appsecret",
                "consumerkey",
                "POST",
                "https://eu.api.ovh.com/1.0/domain/zone/example.com/record",
                r#"{"fieldType":"TXT","subDomain":"_acme-challenge","target":"tokenA","ttl":300}"#,
                "1700000000"
            ),
            "$1$fd6a4ad5a1c32e023bfd1ff4588df13f41922aa0"
        );
    }

    #[test]
    fn should_resolve_endpoints() {
        assert_eq!(
            endpoint_url("ovh-eu").unwrap(),
            "https://eu.api.ovh.com/1.0"
        );
        assert_eq!(
            endpoint_url("http://localhost:1234/").unwrap(),
            "http://localhost:1234"
        );
        assert!(endpoint_url("ovh-mars").is_err());
    }

    #[test]
    fn should_require_all_keys() {
        let config = ProviderConfig::new(
            [
                ("endpoint", "ovh-eu"),
                ("application_key", "ak"),
                ("application_secret", "as"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );
        let err = from_config(&config).err().unwrap();
        assert_eq!(err.to_string(), "ovh: consumer_key is required");
    }

    #[tokio::test]
    async fn should_create_record_and_refresh_zone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/time"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1700000000"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/domain/zone/example.com"))
            .and(header("X-Ovh-Application", "ak"))
            .and(header_exists("X-Ovh-Signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "example.com"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/domain/zone/example.com/record"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/domain/zone/example.com/record"))
            .and(body_json(json!({
                "fieldType": "TXT", "subDomain": "_acme-challenge", "target": "tokenA", "ttl": 300
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/domain/zone/example.com/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        tokio::task::spawn_blocking(move || {
            let provider = PerRecord(
                OvhProvider::new(
                    &uri,
                    OvhKeys {
                        application_key: "ak".to_string(),
                        application_secret: "as".to_string(),
                        consumer_key: "ck".to_string(),
                    },
                    Deadline::after(Duration::from_secs(5)),
                )
                .unwrap(),
            );
            provider.set_records(
                "example.com",
                &[DnsRecord::txt("_acme-challenge", "tokenA", Some(300))],
            )
        })
        .await
        .unwrap()
        .unwrap();
    }
}
