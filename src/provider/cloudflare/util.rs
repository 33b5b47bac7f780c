use cloudflare::{endpoints::dns, framework::response::ApiFailure};

use crate::{
    provider::{store::StoredRecord, DnsRecord, ProviderError, RecordContent},
    zone::relative_name,
};

impl From<ApiFailure> for ProviderError {
    fn from(f: ApiFailure) -> Self {
        match f {
            ApiFailure::Error(s, errs) => ProviderError::Api(format!(
                "[{}] {}",
                s,
                errs.errors
                    .iter()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            ApiFailure::Invalid(e) => ProviderError::Api(e.to_string()),
        }
    }
}

/// Convert an API record into a zone-relative [`StoredRecord`]. Returns `None` for record types that
/// carry more than a single value (MX, SRV, ...), those are never managed here.
pub fn stored_record(r: &dns::DnsRecord, zone: &str) -> Option<StoredRecord> {
    let content = match &r.content {
        dns::DnsContent::TXT { content } => RecordContent::Txt(content.to_owned()),
        dns::DnsContent::A { content } => RecordContent::from_parts("A", &content.to_string()),
        dns::DnsContent::AAAA { content } => {
            RecordContent::from_parts("AAAA", &content.to_string())
        }
        dns::DnsContent::CNAME { content } => RecordContent::from_parts("CNAME", content),
        dns::DnsContent::NS { content } => RecordContent::from_parts("NS", content),
        _ => return None,
    };
    Some(StoredRecord {
        id: r.id.to_owned(),
        record: DnsRecord {
            name: relative_name(&r.name, zone),
            content,
            ttl: Some(r.ttl),
        },
    })
}

/// Convert record content into what the API expects for creation
pub fn content(c: &RecordContent) -> Result<dns::DnsContent, ProviderError> {
    let invalid = |e: std::net::AddrParseError| {
        ProviderError::Internal(format!("invalid record content {}: {}", c, e))
    };
    let content = match c {
        RecordContent::Txt(txt) => dns::DnsContent::TXT {
            content: txt.to_owned(),
        },
        RecordContent::Other { kind, data } => match kind.as_str() {
            "A" => dns::DnsContent::A {
                content: data.parse().map_err(invalid)?,
            },
            "AAAA" => dns::DnsContent::AAAA {
                content: data.parse().map_err(invalid)?,
            },
            "CNAME" => dns::DnsContent::CNAME {
                content: data.to_owned(),
            },
            "NS" => dns::DnsContent::NS {
                content: data.to_owned(),
            },
            _ => {
                return Err(ProviderError::Internal(format!(
                    "unsupported record type {}",
                    kind
                )))
            }
        },
    };
    Ok(content)
}
