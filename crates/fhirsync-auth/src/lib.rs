//! # fhirsync-auth
//!
//! Request authentication for fhirsync target services.
//!
//! A host configuration selects one strategy by its `auth_type` tag:
//!
//! - `none` - requests are sent as-is
//! - `basic` - HTTP Basic credentials
//! - `cookie` - a pre-extracted session cookie, optionally with Basic
//! - `openid` - OAuth 2.0 client-credentials bearer tokens
//! - `service_account` - RS256-signed assertion exchanged for a bearer token
//!
//! Strategies are created through an [`AuthRegistry`], which callers can
//! extend with their own constructors.

pub mod basic;
pub mod config;
pub mod error;
pub mod registry;
pub mod service_account;
pub mod strategy;
pub mod token;

pub use basic::{BasicAuth, CookieAuth};
pub use config::HostConfig;
pub use error::AuthError;
pub use registry::{AuthConstructor, AuthRegistry};
pub use service_account::{ServiceAccountAuth, ServiceAccountKey};
pub use strategy::{AuthStrategy, NoAuth};
pub use token::{ClientCredentialsAuth, TokenCache, TokenResponse};

/// Type alias for auth results.
pub type AuthResult<T> = Result<T, AuthError>;
