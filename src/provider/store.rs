//! Shared [`Provider`] implementation for vendor APIs that only manage individual records.
//!
//! Most vendor APIs don't know about record sets. They list records, create one record at a time
//! and delete records by their provider-side id. Such adapters implement [`RecordStore`] and are wrapped
//! in a [`PerRecord`] that derives the set/append/delete semantics of [`Provider`] from those primitives.

use itertools::Itertools;
use log::{debug, trace};

use super::{DnsRecord, Provider, ProviderError};

/// A record as returned by a vendor API, together with the id needed to delete it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub record: DnsRecord,
}

/// Record-level primitives of a vendor API.
///
/// `zone_id` is whatever [`RecordStore::zone_id()`] returned for the zone, `zone` is the zone name itself.
pub trait RecordStore {
    /// Look up the provider-side identifier of a zone
    fn zone_id(&self, zone: &str) -> Result<String, ProviderError>;
    /// List all records in a zone, with names relative to the zone
    fn list(&self, zone_id: &str, zone: &str) -> Result<Vec<StoredRecord>, ProviderError>;
    fn create(&self, zone_id: &str, zone: &str, record: &DnsRecord) -> Result<(), ProviderError>;
    /// Remove a single record. Removing a record that is already gone must succeed.
    fn remove(&self, zone_id: &str, zone: &str, record: &StoredRecord) -> Result<(), ProviderError>;
    /// Rewrite `stored` in place with the TTL of `record`, which has the same name, type and value
    fn update(
        &self,
        zone_id: &str,
        zone: &str,
        stored: &StoredRecord,
        record: &DnsRecord,
    ) -> Result<(), ProviderError>;
    /// Called once after a set/append/delete operation changed the zone
    fn commit(&self, _zone_id: &str, _zone: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Adapts a [`RecordStore`] to the [`Provider`] interface
pub struct PerRecord<S>(pub S);

impl<S: RecordStore> PerRecord<S> {
    fn create_all(
        &self,
        zone_id: &str,
        zone: &str,
        records: &[&DnsRecord],
    ) -> Result<(), ProviderError> {
        for rec in records {
            self.0.create(zone_id, zone, rec)?;
            debug!("Created record {} in zone {}", rec, zone);
        }
        Ok(())
    }

    fn update_all(
        &self,
        zone_id: &str,
        zone: &str,
        records: &[(&StoredRecord, &DnsRecord)],
    ) -> Result<(), ProviderError> {
        for (stored, rec) in records {
            self.0.update(zone_id, zone, stored, rec)?;
            debug!(
                "Updated TTL of record {} with id {} in zone {} to {:?}",
                rec, stored.id, zone, rec.ttl
            );
        }
        Ok(())
    }

    fn remove_all(
        &self,
        zone_id: &str,
        zone: &str,
        records: &[&StoredRecord],
    ) -> Result<(), ProviderError> {
        for stored in records {
            self.0.remove(zone_id, zone, stored)?;
            debug!(
                "Deleted record {} with id {} from zone {}",
                stored.record, stored.id, zone
            );
        }
        Ok(())
    }
}

impl<S: RecordStore> Provider for PerRecord<S> {
    fn get_records(&self, zone: &str) -> Result<Vec<DnsRecord>, ProviderError> {
        let zone_id = self.0.zone_id(zone)?;
        let records = self
            .0
            .list(&zone_id, zone)?
            .into_iter()
            .map(|s| s.record)
            .collect::<Vec<_>>();
        trace!("Collected records in zone {}: {:?}", zone, records);
        Ok(records)
    }

    fn set_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        let zone_id = self.0.zone_id(zone)?;
        let existing = self.0.list(&zone_id, zone)?;

        let in_scope = |r: &DnsRecord| {
            records
                .iter()
                .any(|d| d.name == r.name && d.content.kind() == r.content.kind())
        };
        let missing = records
            .iter()
            .filter(|d| !existing.iter().any(|e| e.record.same_entry(d)))
            .unique_by(|d| (&d.name, &d.content))
            .collect_vec();
        // Kept values whose TTL differs from the requested one
        let outdated = existing
            .iter()
            .filter_map(|e| {
                records
                    .iter()
                    .find(|d| d.same_entry(&e.record))
                    .filter(|d| d.ttl.is_some() && d.ttl != e.record.ttl)
                    .map(|d| (e, d))
            })
            .collect_vec();
        let stale = existing
            .iter()
            .filter(|e| in_scope(&e.record) && !records.iter().any(|d| d.same_entry(&e.record)))
            .collect_vec();

        // Create first, so that values that are kept never disappear in between
        self.create_all(&zone_id, zone, &missing)?;
        self.update_all(&zone_id, zone, &outdated)?;
        self.remove_all(&zone_id, zone, &stale)?;
        if !missing.is_empty() || !outdated.is_empty() || !stale.is_empty() {
            self.0.commit(&zone_id, zone)?;
        }
        Ok(records.to_vec())
    }

    fn append_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        let zone_id = self.0.zone_id(zone)?;
        self.create_all(&zone_id, zone, &records.iter().collect_vec())?;
        if !records.is_empty() {
            self.0.commit(&zone_id, zone)?;
        }
        Ok(records.to_vec())
    }

    fn delete_records(
        &self,
        zone: &str,
        records: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>, ProviderError> {
        let zone_id = self.0.zone_id(zone)?;
        let existing = self.0.list(&zone_id, zone)?;

        let matching = existing
            .iter()
            .filter(|e| records.iter().any(|d| d.same_entry(&e.record)))
            .collect_vec();
        if matching.is_empty() {
            debug!("No matching records to delete in zone {}", zone);
            return Ok(Vec::new());
        }

        self.remove_all(&zone_id, zone, &matching)?;
        self.0.commit(&zone_id, zone)?;
        Ok(matching.into_iter().map(|s| s.record.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, time::Duration};

    use super::*;
    use crate::provider::{Deadline, RecordContent};

    // Minimal in-process store that journals every call
    #[derive(Default)]
    struct JournalStore {
        records: RefCell<Vec<StoredRecord>>,
        next_id: RefCell<u32>,
        journal: RefCell<Vec<String>>,
    }

    impl JournalStore {
        fn with(records: Vec<DnsRecord>) -> Self {
            let store = JournalStore::default();
            for r in records {
                store.insert(r);
            }
            store
        }

        fn insert(&self, record: DnsRecord) {
            let mut id = self.next_id.borrow_mut();
            *id += 1;
            self.records.borrow_mut().push(StoredRecord {
                id: id.to_string(),
                record,
            });
        }
    }

    impl RecordStore for JournalStore {
        fn zone_id(&self, zone: &str) -> Result<String, ProviderError> {
            match zone {
                "example.com" => Ok("zone-1".to_string()),
                _ => Err(ProviderError::ZoneNotFound(zone.to_string())),
            }
        }

        fn list(&self, _zone_id: &str, _zone: &str) -> Result<Vec<StoredRecord>, ProviderError> {
            Ok(self.records.borrow().clone())
        }

        fn create(&self, _zone_id: &str, _zone: &str, record: &DnsRecord) -> Result<(), ProviderError> {
            self.journal.borrow_mut().push(format!("create {}", record));
            self.insert(record.clone());
            Ok(())
        }

        fn remove(
            &self,
            _zone_id: &str,
            _zone: &str,
            record: &StoredRecord,
        ) -> Result<(), ProviderError> {
            self.journal.borrow_mut().push(format!("remove {}", record.record));
            self.records.borrow_mut().retain(|r| r.id != record.id);
            Ok(())
        }

        fn update(
            &self,
            _zone_id: &str,
            _zone: &str,
            stored: &StoredRecord,
            record: &DnsRecord,
        ) -> Result<(), ProviderError> {
            self.journal
                .borrow_mut()
                .push(format!("update {} ttl {:?}", record, record.ttl));
            for r in self.records.borrow_mut().iter_mut() {
                if r.id == stored.id {
                    r.record.ttl = record.ttl;
                }
            }
            Ok(())
        }

        fn commit(&self, _zone_id: &str, _zone: &str) -> Result<(), ProviderError> {
            self.journal.borrow_mut().push("commit".to_string());
            Ok(())
        }
    }

    fn a_record(name: &str) -> DnsRecord {
        DnsRecord {
            name: name.to_string(),
            content: RecordContent::Other {
                kind: "A".to_string(),
                data: "192.0.2.1".to_string(),
            },
            ttl: Some(300),
        }
    }

    #[test]
    fn should_only_touch_differences_on_set() {
        let provider = PerRecord(JournalStore::with(vec![
            DnsRecord::txt("_acme-challenge", "a", Some(300)),
            DnsRecord::txt("_acme-challenge", "b", Some(300)),
            DnsRecord::txt("other", "x", Some(300)),
            a_record("_acme-challenge"),
        ]));

        provider
            .set_records(
                "example.com",
                &[
                    DnsRecord::txt("_acme-challenge", "b", Some(300)),
                    DnsRecord::txt("_acme-challenge", "c", Some(300)),
                ],
            )
            .unwrap();

        assert_eq!(
            *provider.0.journal.borrow(),
            vec![
                "create _acme-challenge: TXT c".to_string(),
                "remove _acme-challenge: TXT a".to_string(),
                "commit".to_string(),
            ]
        );
        let remaining = provider.get_records("example.com").unwrap();
        assert_eq!(remaining.len(), 4);
        assert!(remaining.contains(&a_record("_acme-challenge")));
        assert!(remaining.iter().any(|r| r.name == "other"));
    }

    #[test]
    fn should_refresh_ttl_of_kept_values() {
        let provider = PerRecord(JournalStore::with(vec![
            DnsRecord::txt("_acme-challenge", "a", Some(60)),
            DnsRecord::txt("_acme-challenge", "a", Some(300)),
            DnsRecord::txt("other", "x", Some(60)),
        ]));

        provider
            .set_records(
                "example.com",
                &[
                    DnsRecord::txt("_acme-challenge", "a", Some(300)),
                    DnsRecord::txt("_acme-challenge", "b", Some(300)),
                ],
            )
            .unwrap();

        assert_eq!(
            *provider.0.journal.borrow(),
            vec![
                "create _acme-challenge: TXT b".to_string(),
                "update _acme-challenge: TXT a ttl Some(300)".to_string(),
                "commit".to_string(),
            ]
        );
        assert_eq!(
            provider.get_records("example.com").unwrap(),
            vec![
                DnsRecord::txt("_acme-challenge", "a", Some(300)),
                DnsRecord::txt("_acme-challenge", "a", Some(300)),
                DnsRecord::txt("other", "x", Some(60)),
                DnsRecord::txt("_acme-challenge", "b", Some(300)),
            ]
        );
    }

    #[test]
    fn should_write_existing_values_with_presented_ttl() {
        let provider = PerRecord(JournalStore::with(vec![DnsRecord::txt(
            "_acme-challenge",
            "A",
            Some(60),
        )]));

        crate::reconcile::present(
            &provider,
            "example.com",
            "_acme-challenge",
            "B",
            300,
            Deadline::after(Duration::from_secs(60)),
        )
        .unwrap();

        assert_eq!(
            provider.get_records("example.com").unwrap(),
            vec![
                DnsRecord::txt("_acme-challenge", "A", Some(300)),
                DnsRecord::txt("_acme-challenge", "B", Some(300)),
            ]
        );
    }

    #[test]
    fn should_not_commit_unchanged_set() {
        let provider = PerRecord(JournalStore::with(vec![DnsRecord::txt(
            "_acme-challenge",
            "a",
            Some(300),
        )]));
        provider
            .set_records("example.com", &[DnsRecord::txt("_acme-challenge", "a", Some(300))])
            .unwrap();
        assert!(provider.0.journal.borrow().is_empty());
    }

    #[test]
    fn should_delete_every_matching_record() {
        let provider = PerRecord(JournalStore::with(vec![
            DnsRecord::txt("_acme-challenge", "a", Some(300)),
            DnsRecord::txt("_acme-challenge", "a", Some(600)),
            DnsRecord::txt("_acme-challenge", "b", Some(300)),
        ]));

        let deleted = provider
            .delete_records("example.com", &[DnsRecord::txt("_acme-challenge", "a", None)])
            .unwrap();

        assert_eq!(deleted.len(), 2);
        assert_eq!(
            provider.get_records("example.com").unwrap(),
            vec![DnsRecord::txt("_acme-challenge", "b", Some(300))]
        );
    }

    #[test]
    fn should_succeed_deleting_missing_record() {
        let provider = PerRecord(JournalStore::with(vec![]));
        let deleted = provider
            .delete_records("example.com", &[DnsRecord::txt("_acme-challenge", "a", None)])
            .unwrap();
        assert!(deleted.is_empty());
        assert!(provider.0.journal.borrow().is_empty());
    }

    #[test]
    fn should_fail_for_unknown_zone() {
        let provider = PerRecord(JournalStore::with(vec![]));
        assert_eq!(
            provider.get_records("example.org"),
            Err(ProviderError::ZoneNotFound("example.org".to_string()))
        );
    }
}
