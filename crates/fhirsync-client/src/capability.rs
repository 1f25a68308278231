//! Resource types advertised by the target's capability statement.

use std::future::Future;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;

/// Abstract types listed by servers but never searchable on their own.
const ABSTRACT_TYPES: &[&str] = &["DomainResource", "Resource"];

/// Memoized list of resource types, owned by one client.
///
/// Filled on first use; [`reset`](Self::reset) forces the next caller to
/// fetch the capability statement again.
#[derive(Debug, Default)]
pub struct ResourceCatalog {
    types: Mutex<Option<Vec<String>>>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached types, or the result of `fetch` if none are cached yet.
    ///
    /// The lock is held across `fetch` so concurrent callers share one
    /// request.
    pub async fn get_or_load<F, Fut>(&self, fetch: F) -> Result<Vec<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let mut guard = self.types.lock().await;
        if let Some(types) = guard.as_ref() {
            return Ok(types.clone());
        }
        let capability = fetch().await?;
        let types = resource_types(&capability);
        tracing::debug!(count = types.len(), "Resource catalog loaded");
        *guard = Some(types.clone());
        Ok(types)
    }

    pub async fn reset(&self) {
        *self.types.lock().await = None;
    }

    pub async fn is_loaded(&self) -> bool {
        self.types.lock().await.is_some()
    }
}

/// `rest[].resource[].type` of a capability statement, in document order,
/// minus the abstract base types.
pub fn resource_types(capability: &Value) -> Vec<String> {
    let mut types = Vec::new();
    let Some(rest) = capability.get("rest").and_then(Value::as_array) else {
        return types;
    };
    for block in rest {
        let Some(resources) = block.get("resource").and_then(Value::as_array) else {
            continue;
        };
        for resource in resources {
            if let Some(kind) = resource.get("type").and_then(Value::as_str) {
                if !ABSTRACT_TYPES.contains(&kind) && !types.iter().any(|t| t == kind) {
                    types.push(kind.to_string());
                }
            }
        }
    }
    types
}
