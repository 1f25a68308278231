//! Error types for the synchronization client and identifier cache.

use fhirsync_auth::AuthError;
use serde_json::Value;
use thiserror::Error;

/// Conflicts detected by the identifier cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// A business identifier already maps to a different remote id.
    #[error(
        "Duplicate key found for {system}:{value} -> {resource_type}/{new_id} \
         ({resource_type}/{existing_id} exists with the same key)"
    )]
    DuplicateIdentifier {
        system: String,
        value: String,
        resource_type: String,
        existing_id: String,
        new_id: String,
    },

    /// The cached record is of a different resource type than the caller expects.
    #[error("Identifier {system}|{value} maps to a {actual}, expected {expected}")]
    TypeMismatch {
        system: String,
        value: String,
        expected: String,
        actual: String,
    },
}

/// Errors surfaced by [`FhirClient`](crate::FhirClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or the response not read.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered a read with a failure status or error issues.
    #[error("HTTP {status} encountered ({url})")]
    InvalidCall {
        url: String,
        status: u16,
        body: Value,
    },

    /// A follow-up page lacked the `entry` list its `next` link promised.
    #[error("Paginated response from {url} has no 'entry' field")]
    MalformedPagination { url: String },

    /// A record lacks a field the operation depends on.
    #[error("Record is missing required field '{0}'")]
    MissingField(&'static str),

    /// A record to submit was not a JSON object.
    #[error("Record must be a JSON object, got {0}")]
    InvalidRecord(&'static str),

    /// An identifier token was not of the form `system|value`.
    #[error("Invalid identifier '{0}': expected system|value")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid identifier system pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Creates a new `InvalidCall` error.
    pub fn invalid_call(url: impl Into<String>, status: u16, body: Value) -> Self {
        Self::InvalidCall {
            url: url.into(),
            status,
            body,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::InvalidCall { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for cache conflicts that callers treat as fatal.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Cache(CacheError::DuplicateIdentifier { .. }))
    }
}

/// Convenience result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_message_names_everything() {
        let err = CacheError::DuplicateIdentifier {
            system: "https://example.org/study/patient".to_string(),
            value: "P-1".to_string(),
            resource_type: "Patient".to_string(),
            existing_id: "101".to_string(),
            new_id: "202".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("https://example.org/study/patient:P-1"));
        assert!(msg.contains("Patient/101"));
        assert!(msg.contains("Patient/202"));
    }

    #[test]
    fn test_invalid_call_status() {
        let err = ClientError::invalid_call("http://localhost/Patient", 404, Value::Null);
        assert_eq!(err.to_string(), "HTTP 404 encountered (http://localhost/Patient)");
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_duplicate());
    }

    #[test]
    fn test_cache_error_conversion() {
        let err: ClientError = CacheError::TypeMismatch {
            system: "s".to_string(),
            value: "v".to_string(),
            expected: "Patient".to_string(),
            actual: "Observation".to_string(),
        }
        .into();
        assert!(matches!(err, ClientError::Cache(_)));
        assert_eq!(err.to_string(), "Identifier s|v maps to a Observation, expected Patient");
    }
}
