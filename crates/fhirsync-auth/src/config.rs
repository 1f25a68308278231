//! Host configuration shared by the auth strategies and the client.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AuthError, AuthResult};

/// Connection target, description and auth selector for one environment.
///
/// Any keys beyond the well-known ones are kept in `settings` so each auth
/// strategy can pull what it needs (`username`, `token_url`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    /// Base URL of the FHIR endpoint, e.g. `https://fhir.example.org/fhir`.
    pub target_service_url: String,

    /// Free-form description of the host.
    #[serde(default)]
    pub host_desc: Option<String>,

    /// Tag selecting the auth strategy in the [`AuthRegistry`](crate::AuthRegistry).
    #[serde(default = "default_auth_type")]
    pub auth_type: String,

    /// Strategy-specific settings. Numbers and booleans are accepted and
    /// read back as strings.
    #[serde(flatten)]
    pub settings: BTreeMap<String, Value>,
}

fn default_auth_type() -> String {
    "none".to_string()
}

impl HostConfig {
    /// Creates a config with no extra settings.
    pub fn new(target_service_url: impl Into<String>, auth_type: impl Into<String>) -> Self {
        Self {
            target_service_url: target_service_url.into(),
            host_desc: None,
            auth_type: auth_type.into(),
            settings: BTreeMap::new(),
        }
    }

    /// Adds a strategy setting.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), Value::String(value.into()));
        self
    }

    /// Sets the host description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.host_desc = Some(desc.into());
        self
    }

    /// Looks up an optional setting. A `null` value counts as unset.
    pub fn setting(&self, key: &str) -> Option<Cow<'_, str>> {
        match self.settings.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(Cow::Borrowed(s.as_str())),
            other => Some(Cow::Owned(other.to_string())),
        }
    }

    /// Looks up a setting the current auth type cannot work without.
    pub fn require(&self, key: &str) -> AuthResult<Cow<'_, str>> {
        self.setting(key)
            .ok_or_else(|| AuthError::missing_setting(&self.auth_type, key))
    }

    /// Target URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.target_service_url.trim_end_matches('/')
    }

    /// Description made safe for use in file names.
    pub fn file_safe_desc(&self) -> String {
        self.host_desc
            .as_deref()
            .unwrap_or("No Description")
            .replace('/', "-")
            .replace(' ', "_")
            .to_lowercase()
    }
}
