//! In-memory provider backing the engine and dispatcher tests

use std::sync::{Arc, Mutex};

use super::{DnsRecord, Provider, ProviderError};

/// Holds the records of a single zone. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    pub zone: String,
    records: Arc<Mutex<Vec<DnsRecord>>>,
    fail_reads: bool,
}

impl MemoryProvider {
    pub fn new(zone: &str, records: Vec<DnsRecord>) -> Self {
        MemoryProvider {
            zone: zone.to_string(),
            records: Arc::new(Mutex::new(records)),
            fail_reads: false,
        }
    }

    /// Make every [`Provider::get_records()`] call fail, writes keep working
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Sorted TXT values stored under `name`
    pub fn txt_values(&self, name: &str) -> Vec<String> {
        let mut values = self
            .records()
            .iter()
            .filter(|r| r.name == name)
            .filter_map(|r| r.txt_value().map(str::to_string))
            .collect::<Vec<_>>();
        values.sort();
        values
    }

    fn check_zone(&self, zone: &str) -> Result<(), ProviderError> {
        if zone == self.zone {
            Ok(())
        } else {
            Err(ProviderError::ZoneNotFound(zone.to_string()))
        }
    }
}

impl Provider for MemoryProvider {
    fn get_records(&self, zone: &str) -> Result<Vec<DnsRecord>, ProviderError> {
        if self.fail_reads {
            return Err(ProviderError::Api("read refused".to_string()));
        }
        self.check_zone(zone)?;
        Ok(self.records())
    }

    fn set_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        self.check_zone(zone)?;
        let mut stored = self.records.lock().unwrap();
        stored.retain(|s| {
            !records
                .iter()
                .any(|r| r.name == s.name && r.content.kind() == s.content.kind())
        });
        stored.extend_from_slice(records);
        Ok(records.to_vec())
    }

    fn append_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        self.check_zone(zone)?;
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(records.to_vec())
    }

    fn delete_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        self.check_zone(zone)?;
        let mut stored = self.records.lock().unwrap();
        let (deleted, kept): (Vec<_>, Vec<_>) = stored
            .drain(..)
            .partition(|s| records.iter().any(|r| r.same_entry(s)));
        *stored = kept;
        Ok(deleted)
    }
}
