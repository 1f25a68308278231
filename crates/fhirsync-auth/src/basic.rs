//! HTTP Basic credentials and static cookie strategies.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use reqwest::header::COOKIE;

use crate::{AuthResult, AuthStrategy, HostConfig};

/// Username/password pair.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Builds from `username` and `password` settings.
    ///
    /// When `password` names a readable file, the file's contents (trailing
    /// whitespace removed) are used instead so secrets can live outside the
    /// hosts file.
    pub fn from_config(cfg: &HostConfig) -> AuthResult<Self> {
        let username = cfg.require("username")?;
        let password = resolve_secret(&cfg.require("password")?)?;
        Ok(Self::new(username, password))
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

#[async_trait]
impl AuthStrategy for BasicAuth {
    fn scheme(&self) -> &str {
        "basic"
    }

    async fn augment(&self, request: RequestBuilder) -> AuthResult<RequestBuilder> {
        Ok(request.basic_auth(&self.username, Some(&self.password)))
    }
}

/// Pre-extracted session cookie, optionally combined with basic credentials.
///
/// The cookie is not refreshed; once it expires the user has to supply a
/// new one.
#[derive(Clone)]
pub struct CookieAuth {
    cookie: String,
    basic: Option<BasicAuth>,
}

impl CookieAuth {
    pub fn new(cookie: impl Into<String>, basic: Option<BasicAuth>) -> Self {
        Self {
            cookie: cookie.into(),
            basic,
        }
    }

    pub fn from_config(cfg: &HostConfig) -> AuthResult<Self> {
        let cookie = cfg.require("cookie")?;
        let basic = match cfg.setting("username") {
            Some(_) => Some(BasicAuth::from_config(cfg)?),
            None => None,
        };
        Ok(Self::new(cookie, basic))
    }
}

#[async_trait]
impl AuthStrategy for CookieAuth {
    fn scheme(&self) -> &str {
        "cookie"
    }

    async fn augment(&self, request: RequestBuilder) -> AuthResult<RequestBuilder> {
        let request = match &self.basic {
            Some(basic) => basic.augment(request).await?,
            None => request,
        };
        Ok(request.header(COOKIE, &self.cookie))
    }
}

fn resolve_secret(value: &str) -> AuthResult<String> {
    let path = Path::new(value);
    if path.is_file() {
        tracing::debug!(path = %path.display(), "Reading secret from file");
        let content = fs::read_to_string(path)?;
        return Ok(content.trim_end().to_string());
    }
    Ok(value.to_string())
}
