//! Applies challenge TXT values to a [`Provider`] by read, [`Plan`] and write.
//!
//! Reads degrade gracefully: a provider that cannot be read may still accept a write, and the
//! caller retries the whole operation anyway. Write failures always propagate.
//!
//! Every write checks the [`Deadline`] of the operation first, so nothing is written once the caller
//! has given up on the operation.
//!
//! Known limitation: providers offer no compare-and-swap. Two presentations for the same name that
//! both read before either writes can lose one of the values (last write wins). The provider
//! remains the single source of truth, no locking is attempted here.

use log::{info, warn};
use thiserror::Error;

use crate::{
    config::TTL,
    plan::Plan,
    provider::{Deadline, DnsRecord, Provider, ProviderError},
};

/// A write to the provider failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("failed to set TXT records for {name} in zone {zone}: {source}")]
    Set {
        zone: String,
        name: String,
        #[source]
        source: ProviderError,
    },
    #[error("failed to delete TXT record {name} in zone {zone}: {source}")]
    Delete {
        zone: String,
        name: String,
        #[source]
        source: ProviderError,
    },
}

/// Make sure `value` is one of the TXT values stored under `name`, keeping all other values
pub fn present(
    provider: &dyn Provider,
    zone: &str,
    name: &str,
    value: &str,
    ttl: TTL,
    deadline: Deadline,
) -> Result<(), ReconcileError> {
    let existing = provider.get_records(zone).unwrap_or_else(|e| {
        warn!(
            "Failed to get existing records in zone {} (will write without merging): {}",
            zone, e
        );
        Vec::new()
    });

    match Plan::present(&existing, name, value, ttl) {
        Plan::Nothing => {
            info!(
                "TXT record with value already exists for {} in zone {}",
                name, zone
            );
            Ok(())
        }
        Plan::Set(records) => set(provider, zone, name, &records, deadline),
        Plan::Delete(records) => delete(provider, zone, name, &records, deadline),
    }
}

/// Remove `value` from the TXT values stored under `name`, keeping all other values
pub fn clean_up(
    provider: &dyn Provider,
    zone: &str,
    name: &str,
    value: &str,
    ttl: TTL,
    deadline: Deadline,
) -> Result<(), ReconcileError> {
    let existing = match provider.get_records(zone) {
        Ok(records) => records,
        Err(e) => {
            // Without the current values no remainder can be computed, delete just ours
            warn!(
                "Failed to get existing records in zone {} (will delete directly): {}",
                zone, e
            );
            return delete(
                provider,
                zone,
                name,
                &[DnsRecord::txt(name, value, None)],
                deadline,
            );
        }
    };

    match Plan::clean_up(&existing, name, value, ttl) {
        Plan::Nothing => {
            info!(
                "TXT record with value not found for {} in zone {} (may already be deleted)",
                name, zone
            );
            Ok(())
        }
        Plan::Set(records) => set(provider, zone, name, &records, deadline),
        Plan::Delete(records) => delete(provider, zone, name, &records, deadline),
    }
}

fn set(
    provider: &dyn Provider,
    zone: &str,
    name: &str,
    records: &[DnsRecord],
    deadline: Deadline,
) -> Result<(), ReconcileError> {
    let set = deadline
        .check()
        .and_then(|_| provider.set_records(zone, records))
        .map_err(|source| ReconcileError::Set {
            zone: zone.to_string(),
            name: name.to_string(),
            source,
        })?;
    info!(
        "Successfully set {} TXT record(s) for {} in zone {}",
        set.len(),
        name,
        zone
    );
    Ok(())
}

fn delete(
    provider: &dyn Provider,
    zone: &str,
    name: &str,
    records: &[DnsRecord],
    deadline: Deadline,
) -> Result<(), ReconcileError> {
    let deleted = deadline
        .check()
        .and_then(|_| provider.delete_records(zone, records))
        .map_err(|source| ReconcileError::Delete {
            zone: zone.to_string(),
            name: name.to_string(),
            source,
        })?;
    info!(
        "Successfully deleted {} TXT record(s) for {} in zone {}",
        deleted.len(),
        name,
        zone
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockall::predicate::eq;
    use totems::assert_ok;

    use super::*;
    use crate::provider::{memory::MemoryProvider, MockProvider, RecordContent};

    const ZONE: &str = "example.com";
    const NAME: &str = "_acme-challenge";

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(60))
    }

    fn memory(values: &[&str]) -> MemoryProvider {
        let mut records = values
            .iter()
            .map(|v| DnsRecord::txt(NAME, v, Some(300)))
            .collect::<Vec<_>>();
        records.push(DnsRecord {
            name: "www".to_string(),
            content: RecordContent::Other {
                kind: "A".to_string(),
                data: "192.0.2.1".to_string(),
            },
            ttl: Some(3600),
        });
        records.push(DnsRecord::txt("www", "A", Some(3600)));
        MemoryProvider::new(ZONE, records)
    }

    #[test]
    fn should_merge_new_value() {
        let provider = memory(&["A", "B"]);
        let others = provider
            .records()
            .into_iter()
            .filter(|r| r.name != NAME)
            .collect::<Vec<_>>();

        assert_ok!(present(&provider, ZONE, NAME, "C", 300, deadline()));

        assert_eq!(provider.txt_values(NAME), vec!["A", "B", "C"]);
        let others_after = provider
            .records()
            .into_iter()
            .filter(|r| r.name != NAME)
            .collect::<Vec<_>>();
        assert_eq!(others, others_after);
    }

    #[test]
    fn should_present_idempotently() {
        let once = memory(&[]);
        present(&once, ZONE, NAME, "A", 300, deadline()).unwrap();

        let twice = memory(&[]);
        present(&twice, ZONE, NAME, "A", 300, deadline()).unwrap();
        present(&twice, ZONE, NAME, "A", 300, deadline()).unwrap();

        assert_eq!(once.records(), twice.records());
    }

    #[test]
    fn should_not_write_if_value_present() {
        let mut provider = MockProvider::new();
        provider
            .expect_get_records()
            .with(eq(ZONE))
            .returning(|_| Ok(vec![DnsRecord::txt(NAME, "A", Some(60))]));
        provider.expect_set_records().never();
        provider.expect_delete_records().never();

        assert_ok!(present(&provider, ZONE, NAME, "A", 300, deadline()));
    }

    #[test]
    fn should_write_blindly_if_read_fails() {
        let mut provider = MockProvider::new();
        provider
            .expect_get_records()
            .returning(|_| Err(ProviderError::Api("HTTP 500".to_string())));
        provider
            .expect_set_records()
            .withf(|zone, records| {
                zone == ZONE && records == [DnsRecord::txt(NAME, "A", Some(300))]
            })
            .times(1)
            .returning(|_, records| Ok(records.to_vec()));

        assert_ok!(present(&provider, ZONE, NAME, "A", 300, deadline()));
    }

    #[test]
    fn should_propagate_set_failure_with_context() {
        let mut provider = MockProvider::new();
        provider.expect_get_records().returning(|_| Ok(vec![]));
        provider
            .expect_set_records()
            .returning(|_, _| Err(ProviderError::Api("HTTP 403 - forbidden".to_string())));

        let err = present(&provider, ZONE, NAME, "A", 300, deadline()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to set TXT records for _acme-challenge in zone example.com: HTTP 403 - forbidden"
        );
    }

    #[test]
    fn should_remove_only_finished_value() {
        let provider = memory(&["A", "B"]);

        assert_ok!(clean_up(&provider, ZONE, NAME, "A", 300, deadline()));
        assert_eq!(provider.txt_values(NAME), vec!["B"]);
        assert_eq!(provider.txt_values("www"), vec!["A"]);

        // Repeating the clean-up changes nothing
        assert_ok!(clean_up(&provider, ZONE, NAME, "A", 300, deadline()));
        assert_eq!(provider.txt_values(NAME), vec!["B"]);
    }

    #[test]
    fn should_delete_record_with_last_value() {
        let provider = memory(&["A"]);
        assert_ok!(clean_up(&provider, ZONE, NAME, "A", 300, deadline()));
        assert!(provider.txt_values(NAME).is_empty());
    }

    #[test]
    fn should_ignore_missing_value_on_clean_up() {
        let provider = memory(&["A"]);
        assert_ok!(clean_up(
            &provider,
            ZONE,
            NAME,
            "nonexistent",
            300,
            deadline()
        ));
        assert_eq!(provider.txt_values(NAME), vec!["A"]);
    }

    #[test]
    fn should_delete_directly_if_read_fails() {
        let provider = memory(&["A", "B"]).failing_reads();
        assert_ok!(clean_up(&provider, ZONE, NAME, "A", 300, deadline()));
        assert_eq!(provider.txt_values(NAME), vec!["B"]);

        // Nothing matched anymore, still fine
        assert_ok!(clean_up(&provider, ZONE, NAME, "A", 300, deadline()));
    }

    #[test]
    fn should_propagate_delete_failure() {
        let mut provider = MockProvider::new();
        provider
            .expect_get_records()
            .returning(|_| Ok(vec![DnsRecord::txt(NAME, "A", Some(60))]));
        provider
            .expect_delete_records()
            .withf(|_, records| records == [DnsRecord::txt(NAME, "A", None)])
            .returning(|_, _| Err(ProviderError::Api("timeout".to_string())));

        let err = clean_up(&provider, ZONE, NAME, "A", 300, deadline());
        assert!(matches!(err, Err(ReconcileError::Delete { .. })));
    }

    #[test]
    fn should_not_write_after_deadline() {
        let passed = Deadline::after(Duration::ZERO);

        let mut provider = MockProvider::new();
        provider.expect_get_records().returning(|_| Ok(vec![]));
        provider.expect_set_records().never();
        let err = present(&provider, ZONE, NAME, "A", 300, passed).unwrap_err();
        assert_eq!(
            err,
            ReconcileError::Set {
                zone: ZONE.to_string(),
                name: NAME.to_string(),
                source: ProviderError::DeadlineExceeded,
            }
        );

        // Also when falling back to a direct delete
        let mut provider = MockProvider::new();
        provider
            .expect_get_records()
            .returning(|_| Err(ProviderError::DeadlineExceeded));
        provider.expect_delete_records().never();
        let err = clean_up(&provider, ZONE, NAME, "A", 300, passed);
        assert!(matches!(
            err,
            Err(ReconcileError::Delete {
                source: ProviderError::DeadlineExceeded,
                ..
            })
        ));
    }

    #[test]
    fn should_handle_wildcard_and_base_domain_challenges() {
        let provider = MemoryProvider::new(ZONE, vec![]);
        let name = crate::zone::relative_name("_acme-challenge.example.com.", ZONE);

        present(&provider, ZONE, &name, "tokenA", 300, deadline()).unwrap();
        assert_eq!(provider.txt_values(NAME), vec!["tokenA"]);

        present(&provider, ZONE, &name, "tokenB", 300, deadline()).unwrap();
        assert_eq!(provider.txt_values(NAME), vec!["tokenA", "tokenB"]);

        clean_up(&provider, ZONE, &name, "tokenA", 300, deadline()).unwrap();
        assert_eq!(provider.txt_values(NAME), vec!["tokenB"]);

        clean_up(&provider, ZONE, &name, "tokenB", 300, deadline()).unwrap();
        assert!(provider.records().iter().all(|r| r.name != NAME));
    }
}
