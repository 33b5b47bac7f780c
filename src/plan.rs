//! Computes the write needed to move a name's TXT values to the desired state.
//!
//! Providers only offer whole-record-set operations, so merging a new challenge value or removing
//! a finished one has to be done by the caller: read the current records, compute a [`Plan`] and
//! apply it in a single write. Planning is pure, see [`crate::reconcile`] for the I/O around it.

use log::{debug, trace};

use crate::{config::TTL, provider::DnsRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// The provider already is in the desired state
    Nothing,
    /// Replace all TXT records under the name with exactly these records
    Set(Vec<DnsRecord>),
    /// Remove these records entirely
    Delete(Vec<DnsRecord>),
}

/// TXT values currently stored under `name`, in provider order and including duplicates
pub fn txt_values<'a>(existing: &'a [DnsRecord], name: &str) -> Vec<&'a str> {
    existing
        .iter()
        .filter(|r| r.name == name)
        .filter_map(DnsRecord::txt_value)
        .collect()
}

impl Plan {
    /// Plan the addition of `value` to the TXT values of `name`.
    ///
    /// All values are written with the same `ttl`, including the ones that already existed.
    pub fn present(existing: &[DnsRecord], name: &str, value: &str, ttl: TTL) -> Plan {
        let mut values = txt_values(existing, name);
        if values.contains(&value) {
            debug!("TXT value for {} already present", name);
            return Plan::Nothing;
        }
        debug!(
            "Setting TXT records for {}: {} existing + 1 new = {} total",
            name,
            values.len(),
            values.len() + 1
        );
        values.push(value);

        let plan = Plan::Set(
            values
                .into_iter()
                .map(|v| DnsRecord::txt(name, v, Some(ttl)))
                .collect(),
        );
        trace!("Planned {:?}", plan);
        plan
    }

    /// Plan the removal of `value` from the TXT values of `name`.
    ///
    /// Every entry equal to `value` is dropped, all other values (duplicates included) are kept
    /// and rewritten with `ttl`. If nothing remains, the record is deleted instead.
    pub fn clean_up(existing: &[DnsRecord], name: &str, value: &str, ttl: TTL) -> Plan {
        let values = txt_values(existing, name);
        if !values.contains(&value) {
            debug!("TXT value for {} not found, nothing to remove", name);
            return Plan::Nothing;
        }

        let remaining = values
            .into_iter()
            .filter(|v| *v != value)
            .map(|v| DnsRecord::txt(name, v, Some(ttl)))
            .collect::<Vec<_>>();

        let plan = if remaining.is_empty() {
            // Setting an empty record set is not a valid delete for many providers
            Plan::Delete(vec![DnsRecord::txt(name, value, None)])
        } else {
            Plan::Set(remaining)
        };
        trace!("Planned {:?}", plan);
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RecordContent;

    const NAME: &str = "_acme-challenge";

    fn existing() -> Vec<DnsRecord> {
        vec![
            DnsRecord::txt(NAME, "A", Some(60)),
            DnsRecord::txt("www", "A", Some(60)),
            DnsRecord {
                name: NAME.to_string(),
                content: RecordContent::Other {
                    kind: "CNAME".to_string(),
                    data: "elsewhere.example.net".to_string(),
                },
                ttl: Some(60),
            },
            DnsRecord::txt(NAME, "B", Some(3600)),
        ]
    }

    #[test]
    fn should_collect_only_txt_values_of_name() {
        assert_eq!(txt_values(&existing(), NAME), vec!["A", "B"]);
        assert!(txt_values(&existing(), "missing").is_empty());
    }

    #[test]
    fn should_merge_new_value_with_refreshed_ttl() {
        assert_eq!(
            Plan::present(&existing(), NAME, "C", 300),
            Plan::Set(vec![
                DnsRecord::txt(NAME, "A", Some(300)),
                DnsRecord::txt(NAME, "B", Some(300)),
                DnsRecord::txt(NAME, "C", Some(300)),
            ])
        );
    }

    #[test]
    fn should_create_first_value() {
        assert_eq!(
            Plan::present(&[], NAME, "A", 300),
            Plan::Set(vec![DnsRecord::txt(NAME, "A", Some(300))])
        );
    }

    #[test]
    fn should_keep_duplicates_on_present() {
        let existing = vec![
            DnsRecord::txt(NAME, "A", Some(60)),
            DnsRecord::txt(NAME, "A", Some(60)),
        ];
        match Plan::present(&existing, NAME, "B", 300) {
            Plan::Set(records) => assert_eq!(records.len(), 3),
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn should_do_nothing_if_value_present() {
        assert_eq!(Plan::present(&existing(), NAME, "B", 300), Plan::Nothing);
    }

    #[test]
    fn should_set_remainder_on_clean_up() {
        assert_eq!(
            Plan::clean_up(&existing(), NAME, "A", 300),
            Plan::Set(vec![DnsRecord::txt(NAME, "B", Some(300))])
        );
    }

    #[test]
    fn should_delete_last_value() {
        let existing = vec![DnsRecord::txt(NAME, "A", Some(60))];
        assert_eq!(
            Plan::clean_up(&existing, NAME, "A", 300),
            Plan::Delete(vec![DnsRecord::txt(NAME, "A", None)])
        );
    }

    #[test]
    fn should_drop_every_copy_of_value() {
        let existing = vec![
            DnsRecord::txt(NAME, "A", Some(60)),
            DnsRecord::txt(NAME, "B", Some(60)),
            DnsRecord::txt(NAME, "A", Some(60)),
            DnsRecord::txt(NAME, "B", Some(60)),
        ];
        assert_eq!(
            Plan::clean_up(&existing, NAME, "A", 300),
            Plan::Set(vec![
                DnsRecord::txt(NAME, "B", Some(300)),
                DnsRecord::txt(NAME, "B", Some(300)),
            ])
        );
    }

    #[test]
    fn should_do_nothing_if_value_missing() {
        assert_eq!(
            Plan::clean_up(&existing(), NAME, "nonexistent", 300),
            Plan::Nothing
        );
        // Same value under another name doesn't count
        assert_eq!(
            Plan::clean_up(&[DnsRecord::txt("www", "A", None)], NAME, "A", 300),
            Plan::Nothing
        );
    }
}
