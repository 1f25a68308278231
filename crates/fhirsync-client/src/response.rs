//! One HTTP exchange with the target service, unwrapped.

use reqwest::header::{CONTENT_LOCATION, HeaderMap, LOCATION};
use serde_json::Value;

/// Status, final URL, body and headers of a single response.
///
/// The body is parsed as JSON when possible; otherwise it is kept as a JSON
/// string so callers always deal with a `Value`.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub request_url: String,
    pub body: Value,
    pub headers: HeaderMap,
}

impl RawResponse {
    pub fn new(status: u16, request_url: impl Into<String>, body: Value) -> Self {
        Self {
            status,
            request_url: request_url.into(),
            body,
            headers: HeaderMap::new(),
        }
    }

    /// Reads status, headers and body from a reqwest response.
    pub(crate) async fn read(resp: reqwest::Response) -> reqwest::Result<Self> {
        let status = resp.status().as_u16();
        let request_url = resp.url().to_string();
        let headers = resp.headers().clone();
        let text = resp.text().await?;
        Ok(Self {
            status,
            request_url,
            body: parse_body(&text),
            headers,
        })
    }

    /// Status in [200, 300).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Issues of severity `error` from an `OperationOutcome` body.
    pub fn error_issues(&self) -> Vec<&Value> {
        self.body
            .get("issue")
            .and_then(Value::as_array)
            .map(|issues| {
                issues
                    .iter()
                    .filter(|i| i.get("severity").and_then(Value::as_str) == Some("error"))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Success status and no error issues in the body.
    pub fn is_accepted(&self) -> bool {
        self.is_success() && self.error_issues().is_empty()
    }

    /// `id` of the returned resource.
    ///
    /// Taken from the body, or from the `Location` header when the server
    /// answered with a minimal (empty) body.
    pub fn resource_id(&self) -> Option<&str> {
        self.body
            .get("id")
            .and_then(Value::as_str)
            .or_else(|| self.location_id())
    }

    fn location_id(&self) -> Option<&str> {
        [LOCATION, CONTENT_LOCATION]
            .iter()
            .find_map(|name| self.headers.get(name))
            .and_then(|value| value.to_str().ok())
            .and_then(id_from_location)
    }

    /// Joined `diagnostics` of the error issues, for log lines.
    pub fn diagnostics(&self) -> String {
        self.error_issues()
            .iter()
            .filter_map(|i| {
                i.get("diagnostics")
                    .or_else(|| i.get("details").and_then(|d| d.get("text")))
                    .and_then(Value::as_str)
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// `{type}/{id}` or `{type}/{id}/_history/{vid}`, absolute or relative.
fn id_from_location(location: &str) -> Option<&str> {
    let path = location.split(['?', '#']).next()?.trim_end_matches('/');
    let mut segments = path.rsplit('/');
    let last = segments.next()?;
    let id = match segments.next() {
        Some("_history") => segments.next()?,
        _ => last,
    };
    (!id.is_empty()).then_some(id)
}

fn parse_body(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
