//! Cloudflare, through the official API client in blocking mode.
//!
//! Cloudflare stores fully-qualified record names, these are converted to and from zone-relative
//! names at this boundary.

mod util;
mod wrapper;

use log::{debug, trace};

use self::wrapper::CloudflareWrapper;
use super::{
    store::{PerRecord, RecordStore, StoredRecord},
    DnsRecord, Provider, ProviderConfig, ProviderError,
};
use crate::zone::absolute_name;

const PROVIDER: &str = "cloudflare";

/// A [`RecordStore`] connecting to the Cloudflare API for creating, retrieving and deleting DNS records.
pub struct CloudflareProvider {
    api: CloudflareWrapper,
}

/// Create a Cloudflare provider. Requires an `api_token`, API key login is not supported.
pub fn from_config(config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    let token = config.require(PROVIDER, "api_token")?;
    let api = CloudflareWrapper::new(token, config.deadline);
    Ok(Box::new(PerRecord(CloudflareProvider { api })))
}

impl RecordStore for CloudflareProvider {
    fn zone_id(&self, zone: &str) -> Result<String, ProviderError> {
        let zones = self.api.list_zones(zone)?;
        trace!("Collected zones {:?}", zones);
        zones
            .into_iter()
            .find(|z| z.name == zone)
            .map(|z| z.id)
            .ok_or_else(|| ProviderError::ZoneNotFound(zone.to_string()))
    }

    fn list(&self, zone_id: &str, zone: &str) -> Result<Vec<StoredRecord>, ProviderError> {
        debug!("Reading records of zone {} from Cloudflare API", zone);
        let records = self
            .api
            .list_records(zone_id)?
            .iter()
            .filter_map(|r| util::stored_record(r, zone))
            .collect::<Vec<_>>();
        Ok(records)
    }

    fn create(&self, zone_id: &str, zone: &str, record: &DnsRecord) -> Result<(), ProviderError> {
        self.api.create_record(
            zone_id,
            &absolute_name(&record.name, zone),
            record.ttl,
            util::content(&record.content)?,
        )?;
        Ok(())
    }

    fn remove(
        &self,
        zone_id: &str,
        _zone: &str,
        record: &StoredRecord,
    ) -> Result<(), ProviderError> {
        self.api.delete_record(zone_id, &record.id)
    }

    fn update(
        &self,
        zone_id: &str,
        zone: &str,
        stored: &StoredRecord,
        record: &DnsRecord,
    ) -> Result<(), ProviderError> {
        self.api.update_record(
            zone_id,
            &stored.id,
            &absolute_name(&record.name, zone),
            record.ttl,
            util::content(&record.content)?,
        )?;
        Ok(())
    }
}
