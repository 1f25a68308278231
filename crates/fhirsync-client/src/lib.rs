//! # fhirsync-client
//!
//! Synchronization client for FHIR target services.
//!
//! - [`FhirClient`] - authenticated requests, pagination, capability discovery
//! - [`IdCache`] - preloaded business-identifier → id map
//! - [`FhirClient::post`] / [`FhirClient::load`] - create-or-overwrite upserts
//! - [`RetryPolicy`] - bounded retry shared by submission, transport and polling
//! - [`AuditLog`] / [`BundleWriter`] - records of what was sent
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fhirsync_auth::HostConfig;
//! use fhirsync_client::{FhirClient, IdCache, IdCacheConfig, PostOptions};
//!
//! let cache = Arc::new(IdCache::new(IdCacheConfig::default().with_study("study-1"))?);
//! let client = FhirClient::builder(HostConfig::new("https://fhir.example.org/fhir", "none"))
//!     .id_cache(cache)
//!     .build()
//!     .await?;
//!
//! let options = PostOptions::default().with_identifier_token("https://example.org/study/patient|P-1")?;
//! let response = client.post("Patient", record, &options).await?;
//! ```

pub mod audit;
pub mod bundle;
pub mod cache;
pub mod capability;
pub mod client;
pub mod error;
pub mod identifier;
pub mod response;
pub mod result;
pub mod retry;
pub mod upsert;

pub use audit::AuditLog;
pub use bundle::BundleWriter;
pub use cache::{CachedId, IdCache, IdCacheConfig, LoadSummary, OnDuplicate};
pub use capability::ResourceCatalog;
pub use client::{FhirClient, FhirClientBuilder, GetOptions, PollOutcome, with_query};
pub use error::{CacheError, ClientError, Result};
pub use identifier::Identifier;
pub use response::RawResponse;
pub use result::PagedResult;
pub use retry::RetryPolicy;
pub use upsert::{LoadOptions, PostOptions};
