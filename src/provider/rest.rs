//! Small helpers shared by the adapters that talk to plain JSON/XML HTTP APIs.

use log::trace;
use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    IntoUrl, Method, StatusCode,
};
use serde::de::DeserializeOwned;

use super::{Deadline, ProviderError};

/// Blocking HTTP client bound to the deadline of one operation.
///
/// Every request gets the time left until the deadline as its timeout. Once the deadline has passed,
/// building a request fails with [`ProviderError::DeadlineExceeded`] and nothing is sent.
pub struct Http {
    client: Client,
    deadline: Deadline,
}

/// Build a blocking HTTP client for an operation that has to finish by `deadline`
pub fn client(deadline: Deadline) -> Result<Http, ProviderError> {
    let client = Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Internal(format!("failed to create HTTP client: {}", e)))?;
    Ok(Http { client, deadline })
}

impl Http {
    pub fn request<U: IntoUrl>(
        &self,
        method: Method,
        url: U,
    ) -> Result<RequestBuilder, ProviderError> {
        let left = self.deadline.check()?;
        Ok(self.client.request(method, url).timeout(left))
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> Result<RequestBuilder, ProviderError> {
        self.request(Method::GET, url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> Result<RequestBuilder, ProviderError> {
        self.request(Method::POST, url)
    }

    pub fn put<U: IntoUrl>(&self, url: U) -> Result<RequestBuilder, ProviderError> {
        self.request(Method::PUT, url)
    }

    pub fn patch<U: IntoUrl>(&self, url: U) -> Result<RequestBuilder, ProviderError> {
        self.request(Method::PATCH, url)
    }

    pub fn delete<U: IntoUrl>(&self, url: U) -> Result<RequestBuilder, ProviderError> {
        self.request(Method::DELETE, url)
    }
}

/// Send a request and turn transport errors and non-success statuses into a [`ProviderError`].
/// `what` describes the request for error messages.
pub fn send(request: RequestBuilder, what: &str) -> Result<Response, ProviderError> {
    let response = request
        .send()
        .map_err(|e| ProviderError::Api(format!("failed to {}: {}", what, e)))?;
    trace!("{}: HTTP {}", what, response.status());
    check(response, what)
}

/// Like [`send()`], but a `404 Not Found` is reported as `Ok(None)`
pub fn send_allow_missing(
    request: RequestBuilder,
    what: &str,
) -> Result<Option<Response>, ProviderError> {
    let response = request
        .send()
        .map_err(|e| ProviderError::Api(format!("failed to {}: {}", what, e)))?;
    trace!("{}: HTTP {}", what, response.status());
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    check(response, what).map(Some)
}

/// Send a request and decode its JSON body
pub fn json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T, ProviderError> {
    send(request, what)?
        .json()
        .map_err(|e| ProviderError::Api(format!("failed to parse response to {}: {}", what, e)))
}

fn check(response: Response, what: &str) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ProviderError::Api(format!(
        "failed to {}: HTTP {} - {}",
        what, status, body
    )))
}

/// Remove the surrounding quotes of a TXT value as some APIs return it in presentation format
pub fn unquote_txt(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_owned(),
    }
}

/// Quote a TXT value for APIs that expect presentation format
pub fn quote_txt(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Percent-encode everything but the RFC 3986 unreserved characters, as required by request signing schemes
pub fn percent_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}
