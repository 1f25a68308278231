//! Append-only log of mutating requests.
//!
//! Entries are pretty-printed JSON objects, one after another. All writers
//! share one mutex so concurrent callers never interleave partial entries.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use reqwest::Method;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::Result;

pub struct AuditLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl AuditLog {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
        }
    }

    /// Creates (truncating) `path`, making parent directories as needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }

    /// Only methods that change remote state are logged.
    pub fn should_log(method: &Method) -> bool {
        *method == Method::POST
            || *method == Method::PUT
            || *method == Method::PATCH
            || *method == Method::DELETE
    }

    /// Appends one entry. `response` is the status code on success or the
    /// error issues / body on failure. Read-only methods are ignored.
    pub fn record(
        &self,
        method: &Method,
        url: &str,
        response: Value,
        body: Option<&Value>,
        content_type: &str,
    ) {
        if !Self::should_log(method) {
            return;
        }

        let mut entry = Map::new();
        entry.insert("method".to_string(), json!(method.as_str()));
        entry.insert("url".to_string(), json!(url));
        entry.insert("timestamp".to_string(), json!(timestamp()));
        entry.insert("response".to_string(), response);
        entry.insert("content_type".to_string(), json!(content_type));
        if let Some(body) = body {
            entry.insert("body".to_string(), body.clone());
        }

        let rendered = match serde_json::to_string_pretty(&Value::Object(entry)) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to render audit entry");
                return;
            }
        };

        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(sink, "{rendered}").and_then(|_| sink.flush()) {
            tracing::warn!(error = %e, "Failed to write audit entry");
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}
