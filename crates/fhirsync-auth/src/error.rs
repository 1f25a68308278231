//! Authentication error types.

/// Errors raised while selecting or applying an auth strategy.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The host configuration names an `auth_type` nobody registered.
    #[error("Unknown auth type: {auth_type}")]
    UnknownScheme {
        /// The requested tag.
        auth_type: String,
    },

    /// A setting required by the selected strategy is absent.
    #[error("Auth type '{auth_type}' requires setting '{setting}'")]
    MissingSetting {
        /// Strategy tag.
        auth_type: String,
        /// Name of the missing setting.
        setting: String,
    },

    /// Credential material could not be used (bad key, unreadable file contents).
    #[error("Invalid credentials: {message}")]
    InvalidCredentials {
        /// Description of the problem.
        message: String,
    },

    /// The token endpoint refused or returned an unusable response.
    #[error("Token exchange with {token_url} failed: {message}")]
    TokenExchange {
        /// Endpoint that was called.
        token_url: String,
        /// Description of the failure.
        message: String,
    },

    /// Reading a credential file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A credential file or token response was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Network failure during a token exchange.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// Creates a new `MissingSetting` error.
    #[must_use]
    pub fn missing_setting(auth_type: impl Into<String>, setting: impl Into<String>) -> Self {
        Self::MissingSetting {
            auth_type: auth_type.into(),
            setting: setting.into(),
        }
    }

    /// Creates a new `InvalidCredentials` error.
    #[must_use]
    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
        }
    }

    /// Creates a new `TokenExchange` error.
    #[must_use]
    pub fn token_exchange(token_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TokenExchange {
            token_url: token_url.into(),
            message: message.into(),
        }
    }
}
