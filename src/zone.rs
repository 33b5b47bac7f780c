//! Conversion between fully-qualified challenge names and zone-relative record names.
//!
//! Providers are always addressed with a zone that has no trailing dot, and with record names
//! relative to that zone. The zone apex is written as [`APEX`].

/// Relative name denoting the apex of a zone
pub const APEX: &str = "@";

/// Strip at most one trailing dot from a zone (or any domain name).
///
/// Normalization is idempotent for every name that does not end in more than one dot.
pub fn normalize_zone(zone: &str) -> &str {
    zone.strip_suffix('.').unwrap_or(zone)
}

/// Derive the record name of `fqdn` relative to `zone`.
///
/// If `zone` is not actually a suffix of `fqdn`, the (dot-normalized) `fqdn` is returned unchanged.
/// This is a configuration mismatch, but it is left for the provider to not find any records.
pub fn relative_name(fqdn: &str, zone: &str) -> String {
    let fqdn = normalize_zone(fqdn);
    let zone = normalize_zone(zone);

    let name = match fqdn.strip_suffix(format!(".{}", zone).as_str()) {
        Some(prefix) => prefix,
        // No label boundary in front of the zone, strip it directly
        None => fqdn.strip_suffix(zone).unwrap_or(fqdn),
    };

    let name = name.trim_matches('.');
    if name.is_empty() {
        APEX.to_string()
    } else {
        name.to_string()
    }
}

/// Inverse of [`relative_name()`]: build the fully-qualified name (without trailing dot)
/// for a relative record `name` in `zone`.
pub fn absolute_name(name: &str, zone: &str) -> String {
    let zone = normalize_zone(zone);
    if name.is_empty() || name == APEX {
        zone.to_string()
    } else {
        format!("{}.{}", name.trim_end_matches('.'), zone)
    }
}
