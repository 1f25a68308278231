//! Aggregation of paginated search responses.
//!
//! A search returns a `Bundle` whose `link` array may carry a `next` URL.
//! [`PagedResult`] holds the first page and grows as later pages are
//! appended, so callers see one flat entry list. Non-search reads (a single
//! resource) are wrapped as a one-entry result so both shapes are handled
//! the same way.

use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::response::RawResponse;

#[derive(Debug, Clone)]
pub struct PagedResult {
    pub status: u16,
    pub request_url: String,
    /// Body of the most recently added page.
    pub body: Value,
    pub entries: Vec<Value>,
    pub next: Option<String>,
    total: Option<u64>,
}

impl PagedResult {
    pub fn from_response(response: RawResponse) -> Self {
        let entries = extract_entries(&response.body);
        let next = next_link(&response.body);
        let total = declared_total(&response.body);
        Self {
            status: response.status,
            request_url: response.request_url,
            body: response.body,
            entries,
            next,
            total,
        }
    }

    pub fn success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// `total` declared by the last page, if any.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Merges a follow-up page.
    ///
    /// Fails with [`ClientError::MalformedPagination`] when the page has no
    /// `entry` list (and does not declare `total == 0`); the entries gathered
    /// so far are kept intact.
    pub fn append(&mut self, page: RawResponse) -> Result<()> {
        let declared = declared_total(&page.body);
        let new_entries = match page.body.get("entry").and_then(Value::as_array) {
            Some(entries) => entries.clone(),
            None if declared == Some(0) => Vec::new(),
            None => {
                return Err(ClientError::MalformedPagination {
                    url: page.request_url,
                });
            }
        };

        self.entries.extend(new_entries);
        self.next = next_link(&page.body);
        self.total = declared.or(self.total);
        self.status = page.status;
        self.body = page.body;
        Ok(())
    }

    /// Entries unwrapped from their search wrappers; bare resources pass through.
    pub fn resources(&self) -> impl Iterator<Item = &Value> {
        self.entries
            .iter()
            .map(|entry| entry.get("resource").unwrap_or(entry))
    }

    /// Entries that are search wrappers, i.e. actual matches of a query.
    pub fn matches(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().filter_map(|entry| entry.get("resource"))
    }
}

fn declared_total(body: &Value) -> Option<u64> {
    body.get("total").and_then(Value::as_u64)
}

fn extract_entries(body: &Value) -> Vec<Value> {
    if declared_total(body) == Some(0) {
        return Vec::new();
    }
    match body.get("entry").and_then(Value::as_array) {
        Some(entries) => entries.clone(),
        None => vec![body.clone()],
    }
}

fn next_link(body: &Value) -> Option<String> {
    body.get("link")?
        .as_array()?
        .iter()
        .find(|link| link.get("relation").and_then(Value::as_str) == Some("next"))
        .and_then(|link| link.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
