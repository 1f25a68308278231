//! Bearer tokens obtained from an OAuth 2.0 token endpoint.
//!
//! Tokens are cached in memory together with their expiry and refreshed
//! shortly before they lapse. Nothing is written to disk.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{AuthError, AuthResult, AuthStrategy, HostConfig};

/// Refresh this long before the server-declared expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(300);

/// Standard token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// A token slot shared by the bearer strategies.
#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token, or runs `fetch` and caches its result.
    ///
    /// The slot stays locked during `fetch`, so concurrent callers wait for
    /// one exchange instead of issuing several.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> AuthResult<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = AuthResult<TokenResponse>> + Send,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let response = fetch().await?;
        let lifetime = response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);
        let expires_at = Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN);
        *slot = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at,
        });
        Ok(response.access_token)
    }

    /// Forgets the cached token.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

/// Posts a form to a token endpoint and decodes the response.
pub(crate) async fn request_token(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> AuthResult<TokenResponse> {
    let resp = http.post(token_url).form(form).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthError::token_exchange(
            token_url,
            format!("HTTP {status}: {body}"),
        ));
    }
    let body = resp.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| AuthError::token_exchange(token_url, format!("bad token response: {e}")))
}

/// OAuth 2.0 client-credentials grant.
pub struct ClientCredentialsAuth {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    cache: TokenCache,
}

impl ClientCredentialsAuth {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            cache: TokenCache::new(),
        }
    }

    /// Builds from `client_id`, `client_secret` and `token_url` settings.
    pub fn from_config(cfg: &HostConfig) -> AuthResult<Self> {
        Ok(Self::new(
            cfg.require("client_id")?,
            cfg.require("client_secret")?,
            cfg.require("token_url")?,
        ))
    }

    /// Current access token, exchanging credentials when the cached one expired.
    pub async fn access_token(&self) -> AuthResult<String> {
        self.cache
            .get_or_fetch(|| async {
                tracing::debug!(token_url = %self.token_url, "Requesting client-credentials token");
                request_token(
                    &self.http,
                    &self.token_url,
                    &[
                        ("grant_type", "client_credentials"),
                        ("client_id", self.client_id.as_str()),
                        ("client_secret", self.client_secret.as_str()),
                    ],
                )
                .await
            })
            .await
    }
}

#[async_trait]
impl AuthStrategy for ClientCredentialsAuth {
    fn scheme(&self) -> &str {
        "openid"
    }

    async fn augment(&self, request: RequestBuilder) -> AuthResult<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(request.bearer_auth(token))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_token_reused_until_expiry() {
        let cache = TokenCache::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let token = cache
                .get_or_fetch(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(TokenResponse {
                        access_token: "tok-1".to_string(),
                        expires_in: Some(3600),
                    })
                })
                .await
                .unwrap();
            assert_eq!(token, "tok-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_lived_token_refetched() {
        let cache = TokenCache::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_fetch(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // Shorter than the expiry margin, so never reusable.
                    Ok(TokenResponse {
                        access_token: "tok".to_string(),
                        expires_in: Some(5),
                    })
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_credentials_exchange() {
        use wiremock::matchers::{body_string_contains, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc123",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = ClientCredentialsAuth::new("id", "secret", format!("{}/token", server.uri()));
        assert_eq!(auth.access_token().await.unwrap(), "abc123");
        // Second call served from cache
        let request = auth
            .augment(reqwest::Client::new().get("http://localhost/Patient"))
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer abc123"
        );
    }

    #[tokio::test]
    async fn test_client_credentials_rejected() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad client"))
            .mount(&server)
            .await;

        let auth = ClientCredentialsAuth::new("id", "wrong", format!("{}/token", server.uri()));
        let err = auth.access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExchange { .. }));
    }
}
