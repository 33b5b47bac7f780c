use cloudflare::{
    endpoints,
    framework::{
        auth::Credentials,
        response::{ApiFailure, ApiResponse},
        Environment, HttpApiClient, HttpApiClientConfig,
    },
};
use log::debug;

use crate::{
    config::TTL,
    provider::{Deadline, ProviderError},
};

const CLOUDFLARE_ZONE_PAGE_SIZE: u8 = 50;
const CLOUDFLARE_RECORD_PAGE_SIZE: u16 = 5000;

/// Internal wrapper around the Cloudflare API. Provides some convenience features such as paged requests
/// and keeps every call within the deadline of the current operation.
pub struct CloudflareWrapper {
    api_token: String,
    deadline: Deadline,
}

impl CloudflareWrapper {
    pub fn new(api_token: &str, deadline: Deadline) -> CloudflareWrapper {
        CloudflareWrapper {
            api_token: api_token.to_string(),
            deadline,
        }
    }

    // The client only accepts a fixed timeout, so a fresh one is built with whatever time is left
    fn client(&self) -> Result<HttpApiClient, ProviderError> {
        let left = self.deadline.check()?;
        HttpApiClient::new(
            Credentials::UserAuthToken {
                token: self.api_token.clone(),
            },
            HttpApiClientConfig {
                http_timeout: left,
                ..Default::default()
            },
            Environment::Production,
        )
        .map_err(|e| ProviderError::Internal(format!("failed to create API client: {}", e)))
    }

    // Perform a paged request by repeatedly calling the provided request fun with the current page counter.
    // page_size must match the page_size in the request. The caller is responsible for ensuring that these match
    fn paged_request<R>(
        &self,
        page_size: usize,
        request: &mut dyn FnMut(u32) -> ApiResponse<Vec<R>>,
    ) -> ApiResponse<Vec<R>> {
        let mut page_counter = 1;

        // Initial failures are never good, return quickly
        let mut response = request(page_counter)?;
        let mut current_size = response.result.len();

        while current_size >= page_size {
            page_counter += 1;
            match request(page_counter) {
                Ok(r) => {
                    current_size = r.result.len();
                    let mut previous_results = response.result;
                    response = r;
                    response.result.append(&mut previous_results);
                }
                Err(e) => match e {
                    ApiFailure::Error(code, _) => match code {
                        http::StatusCode::NOT_FOUND => return Ok(response),
                        _ => return Err(e),
                    },
                    ApiFailure::Invalid(e) => return Err(e.into()),
                },
            };
        }
        Ok(response)
    }

    /// Zones whose name matches `name` exactly
    pub fn list_zones(&self, name: &str) -> Result<Vec<endpoints::zone::Zone>, ProviderError> {
        let client = self.client()?;
        let response = self.paged_request(
            CLOUDFLARE_ZONE_PAGE_SIZE.into(),
            &mut |page_counter: u32| {
                client.request(&endpoints::zone::ListZones {
                    params: endpoints::zone::ListZonesParams {
                        name: Some(name.to_string()),
                        page: Some(page_counter),
                        per_page: Some(CLOUDFLARE_ZONE_PAGE_SIZE.into()),
                        ..Default::default()
                    },
                })
            },
        )?;
        Ok(response.result)
    }

    pub fn list_records(
        &self,
        zone_id: &str,
    ) -> Result<Vec<endpoints::dns::DnsRecord>, ProviderError> {
        let client = self.client()?;
        let response = self.paged_request(
            CLOUDFLARE_RECORD_PAGE_SIZE.into(),
            &mut |page_counter: u32| {
                client.request(&endpoints::dns::ListDnsRecords {
                    zone_identifier: zone_id,
                    params: endpoints::dns::ListDnsRecordsParams {
                        page: Some(page_counter),
                        per_page: Some(CLOUDFLARE_RECORD_PAGE_SIZE.into()),
                        ..Default::default()
                    },
                })
            },
        )?;
        Ok(response.result)
    }

    pub fn create_record(
        &self,
        zone_id: &str,
        name: &str,
        ttl: Option<TTL>,
        content: endpoints::dns::DnsContent,
    ) -> Result<endpoints::dns::DnsRecord, ProviderError> {
        let response = self.client()?.request(&endpoints::dns::CreateDnsRecord {
            zone_identifier: zone_id,
            params: endpoints::dns::CreateDnsRecordParams {
                priority: None,
                ttl,
                // Challenge records must be answered by Cloudflare itself
                proxied: None,
                name,
                content,
            },
        })?;
        Ok(response.result)
    }

    /// Rewrite an existing record, e.g. to change its TTL
    pub fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        name: &str,
        ttl: Option<TTL>,
        content: endpoints::dns::DnsContent,
    ) -> Result<endpoints::dns::DnsRecord, ProviderError> {
        let response = self.client()?.request(&endpoints::dns::UpdateDnsRecord {
            zone_identifier: zone_id,
            identifier: record_id,
            params: endpoints::dns::UpdateDnsRecordParams {
                ttl,
                proxied: None,
                name,
                content,
            },
        })?;
        Ok(response.result)
    }

    /// Delete a record by id. A record that is already gone is not an error.
    pub fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), ProviderError> {
        let response = self.client()?.request(&endpoints::dns::DeleteDnsRecord {
            zone_identifier: zone_id,
            identifier: record_id,
        });
        match response {
            Ok(_) => Ok(()),
            Err(ApiFailure::Error(http::StatusCode::NOT_FOUND, _)) => {
                debug!("Record {} was already deleted", record_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
