//! The request augmentation seam consumed by the client.

use async_trait::async_trait;
use reqwest::RequestBuilder;

use crate::AuthResult;

/// Mutates an outgoing request so the target service accepts it.
///
/// Implementations may perform their own network calls (token exchange)
/// and keep their own expiry bookkeeping; callers only see `augment`.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Registry tag of this strategy.
    fn scheme(&self) -> &str;

    /// Adds credentials to `request`.
    async fn augment(&self, request: RequestBuilder) -> AuthResult<RequestBuilder>;
}

/// Leaves requests untouched. Used for open local servers.
#[derive(Debug, Default, Clone)]
pub struct NoAuth;

#[async_trait]
impl AuthStrategy for NoAuth {
    fn scheme(&self) -> &str {
        "none"
    }

    async fn augment(&self, request: RequestBuilder) -> AuthResult<RequestBuilder> {
        Ok(request)
    }
}
