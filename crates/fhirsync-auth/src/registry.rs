//! Static registry mapping `auth_type` tags to strategy constructors.

use std::collections::HashMap;
use std::sync::Arc;

use crate::basic::{BasicAuth, CookieAuth};
use crate::service_account::ServiceAccountAuth;
use crate::strategy::NoAuth;
use crate::token::ClientCredentialsAuth;
use crate::{AuthError, AuthResult, AuthStrategy, HostConfig};

/// Builds a strategy from a host configuration.
pub type AuthConstructor = fn(&HostConfig) -> AuthResult<Arc<dyn AuthStrategy>>;

/// Tag → constructor table, populated by explicit registration.
#[derive(Clone, Default)]
pub struct AuthRegistry {
    constructors: HashMap<String, AuthConstructor>,
}

impl AuthRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every strategy shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("none", |_| Ok(Arc::new(NoAuth)));
        registry.register("basic", |cfg| Ok(Arc::new(BasicAuth::from_config(cfg)?)));
        registry.register("cookie", |cfg| Ok(Arc::new(CookieAuth::from_config(cfg)?)));
        registry.register("openid", |cfg| {
            Ok(Arc::new(ClientCredentialsAuth::from_config(cfg)?))
        });
        registry.register("service_account", |cfg| {
            Ok(Arc::new(ServiceAccountAuth::from_config(cfg)?))
        });
        registry
    }

    /// Adds or replaces the constructor for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, constructor: AuthConstructor) {
        self.constructors.insert(tag.into(), constructor);
    }

    /// Registered tags, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Instantiates the strategy named by `cfg.auth_type`.
    pub fn create(&self, cfg: &HostConfig) -> AuthResult<Arc<dyn AuthStrategy>> {
        let constructor =
            self.constructors
                .get(&cfg.auth_type)
                .ok_or_else(|| AuthError::UnknownScheme {
                    auth_type: cfg.auth_type.clone(),
                })?;
        let strategy = constructor(cfg)?;
        tracing::debug!(auth_type = %cfg.auth_type, "Auth strategy selected");
        Ok(strategy)
    }
}
