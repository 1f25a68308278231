//! HTTP client for one target service.
//!
//! Every request goes through [`FhirClient::send`]: FHIR headers, the
//! host's auth strategy, transport-level retry on gateway errors, a
//! `tracing` line per exchange and, for mutating methods, the audit log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fhirsync_auth::{AuthRegistry, AuthStrategy, HostConfig};
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Value, json};
use url::Url;

use crate::audit::AuditLog;
use crate::cache::IdCache;
use crate::capability::ResourceCatalog;
use crate::error::{ClientError, Result};
use crate::response::RawResponse;
use crate::result::PagedResult;
use crate::retry::RetryPolicy;

pub const FHIR_CONTENT_TYPE: &str = "application/fhir+json; fhirVersion=4.0";
pub const FHIR_ACCEPT: &str = "application/fhir+json";
pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Controls for [`FhirClient::get`].
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Follow `next` links until the result is complete.
    pub paginate: bool,
    /// `_count` page size.
    pub page_size: Option<u32>,
    /// `_elements` projection.
    pub elements: Option<String>,
    /// Turn a non-accepted page into [`ClientError::InvalidCall`].
    pub fail_on_error: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            paginate: true,
            page_size: None,
            elements: None,
            fail_on_error: true,
        }
    }
}

impl GetOptions {
    #[must_use]
    pub fn single_page(mut self) -> Self {
        self.paginate = false;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn with_elements(mut self, elements: impl Into<String>) -> Self {
        self.elements = Some(elements.into());
        self
    }

    /// Return failing pages instead of raising.
    #[must_use]
    pub fn allow_failure(mut self) -> Self {
        self.fail_on_error = false;
        self
    }
}

/// Result of [`FhirClient::poll_until`].
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Last page fetched.
    pub result: PagedResult,
    /// Count observed on the last attempt.
    pub observed: usize,
    /// Whether the target count was seen before the timeout.
    pub reached: bool,
    pub attempts: u32,
}

/// One outgoing request, rebuilt on every transport attempt.
pub(crate) struct Outgoing<'a> {
    pub method: Method,
    pub url: String,
    pub body: Option<&'a Value>,
    pub content_type: &'static str,
    pub prefer: Option<&'static str>,
}

impl<'a> Outgoing<'a> {
    pub fn new(method: Method, url: impl Into<String>, body: Option<&'a Value>) -> Self {
        Self {
            method,
            url: url.into(),
            body,
            content_type: FHIR_CONTENT_TYPE,
            prefer: None,
        }
    }
}

pub struct FhirClientBuilder {
    host: HostConfig,
    registry: Option<AuthRegistry>,
    id_cache: Option<Arc<IdCache>>,
    audit: Option<AuditLog>,
    retry: RetryPolicy,
    transport: RetryPolicy,
    timeout: Option<Duration>,
}

impl FhirClientBuilder {
    /// Registry used to resolve the host's `auth_type`; defaults to the
    /// built-in schemes.
    #[must_use]
    pub fn auth_registry(mut self, registry: AuthRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Cache consulted by [`FhirClient::post`]; loaded during `build`.
    #[must_use]
    pub fn id_cache(mut self, cache: Arc<IdCache>) -> Self {
        self.id_cache = Some(cache);
        self
    }

    #[must_use]
    pub fn audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Policy for submissions rejected with a transient conflict.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Policy for connection failures and gateway errors.
    #[must_use]
    pub fn transport_policy(mut self, policy: RetryPolicy) -> Self {
        self.transport = policy;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn build(self) -> Result<FhirClient> {
        let registry = self.registry.unwrap_or_else(AuthRegistry::with_builtin);
        let auth = registry.create(&self.host)?;

        let mut http = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }

        let client = FhirClient {
            http: http.build()?,
            base_url: self.host.base_url().to_string(),
            host: self.host,
            auth,
            id_cache: self.id_cache,
            audit: self.audit,
            retry: self.retry,
            transport: self.transport,
            catalog: ResourceCatalog::new(),
        };

        tracing::info!(
            target_service = %client.base_url,
            auth = client.auth.scheme(),
            "Client ready"
        );

        if let Some(cache) = &client.id_cache {
            let summary = cache.load(&client).await?;
            for (resource_type, count) in &summary.resource_counts {
                tracing::debug!(resource_type, count, "Cached identifiers");
            }
        }

        Ok(client)
    }
}

pub struct FhirClient {
    http: reqwest::Client,
    base_url: String,
    host: HostConfig,
    auth: Arc<dyn AuthStrategy>,
    pub(crate) id_cache: Option<Arc<IdCache>>,
    audit: Option<AuditLog>,
    pub(crate) retry: RetryPolicy,
    transport: RetryPolicy,
    catalog: ResourceCatalog,
}

impl FhirClient {
    pub fn builder(host: HostConfig) -> FhirClientBuilder {
        FhirClientBuilder {
            host,
            registry: None,
            id_cache: None,
            audit: None,
            retry: RetryPolicy::transient_conflicts(),
            transport: RetryPolicy::server_errors(),
            timeout: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    pub fn id_cache(&self) -> Option<&Arc<IdCache>> {
        self.id_cache.as_ref()
    }

    /// Absolute URL for `resource`; absolute inputs pass through.
    pub fn endpoint(&self, resource: &str) -> String {
        if resource.starts_with("http://") || resource.starts_with("https://") {
            return resource.to_string();
        }
        let resource = resource.trim_start_matches('/');
        if resource.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{resource}", self.base_url)
        }
    }

    /// Sends one request, retrying transport failures and gateway errors.
    pub(crate) async fn send(&self, req: Outgoing<'_>) -> Result<RawResponse> {
        let payload = req.body.map(serde_json::to_vec).transpose()?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();

            let mut builder = self
                .http
                .request(req.method.clone(), &req.url)
                .header(CONTENT_TYPE, req.content_type)
                .header(ACCEPT, FHIR_ACCEPT);
            if let Some(prefer) = req.prefer {
                builder = builder.header("Prefer", prefer);
            }
            if let Some(payload) = &payload {
                builder = builder.body(payload.clone());
            }
            let builder = self.auth.augment(builder).await?;

            match builder.send().await {
                Ok(resp) => {
                    let response = RawResponse::read(resp).await?;
                    if self.transport.should_retry(attempt, response.status) {
                        let delay = self.transport.delay_for_attempt(attempt);
                        tracing::warn!(
                            method = %req.method,
                            url = %req.url,
                            status = response.status,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Server error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.log_exchange(&req, &response, started.elapsed());
                    return Ok(response);
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && self.transport.has_attempts_left(attempt) => {
                    let delay = self.transport.delay_for_attempt(attempt);
                    tracing::warn!(
                        method = %req.method,
                        url = %req.url,
                        error = %e,
                        attempt,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(method = %req.method, url = %req.url, error = %e, "Request failed");
                    if let Some(audit) = &self.audit {
                        audit.record(&req.method, &req.url, json!(e.to_string()), req.body, req.content_type);
                    }
                    return Err(e.into());
                }
            }
        }
    }

    fn log_exchange(&self, req: &Outgoing<'_>, response: &RawResponse, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        if response.is_accepted() {
            tracing::info!(
                method = %req.method,
                url = %req.url,
                status = response.status,
                elapsed_ms,
                "Request accepted"
            );
        } else {
            tracing::error!(
                method = %req.method,
                url = %req.url,
                status = response.status,
                elapsed_ms,
                diagnostics = %response.diagnostics(),
                "Request not accepted"
            );
        }

        if let Some(audit) = &self.audit {
            let outcome = if response.is_accepted() {
                json!(response.status)
            } else {
                let issues = response.error_issues();
                if issues.is_empty() {
                    response.body.clone()
                } else {
                    Value::Array(issues.into_iter().cloned().collect())
                }
            };
            audit.record(&req.method, &req.url, outcome, req.body, req.content_type);
        }
    }

    fn search_url(&self, resource: &str, options: &GetOptions) -> Result<String> {
        let mut url = Url::parse(&self.endpoint(resource))?;
        if options.page_size.is_some() || options.elements.is_some() {
            let mut pairs = url.query_pairs_mut();
            if let Some(count) = options.page_size {
                pairs.append_pair("_count", &count.to_string());
            }
            if let Some(elements) = &options.elements {
                pairs.append_pair("_elements", elements);
            }
        }
        Ok(url.to_string())
    }

    async fn read_page(&self, url: &str, options: &GetOptions) -> Result<RawResponse> {
        let response = self.send(Outgoing::new(Method::GET, url, None)).await?;
        if options.fail_on_error && !response.is_accepted() {
            return Err(ClientError::invalid_call(
                response.request_url,
                response.status,
                response.body,
            ));
        }
        Ok(response)
    }

    /// Single GET without result wrapping.
    pub async fn get_raw(&self, resource: &str, options: &GetOptions) -> Result<RawResponse> {
        let url = self.search_url(resource, options)?;
        self.read_page(&url, options).await
    }

    /// GET `resource`, following `next` links while `options.paginate`.
    ///
    /// With `fail_on_error == false` a failing page is returned on its own
    /// so the caller can inspect it.
    pub async fn get(&self, resource: &str, options: &GetOptions) -> Result<PagedResult> {
        let url = self.search_url(resource, options)?;
        let mut result = PagedResult::from_response(self.read_page(&url, options).await?);
        if !result.success() {
            return Ok(result);
        }

        while options.paginate {
            let Some(next) = result.next.clone() else {
                break;
            };
            let page = self.read_page(&self.endpoint(&next), options).await?;
            if !page.is_accepted() {
                return Ok(PagedResult::from_response(page));
            }
            result.append(page)?;
        }

        tracing::debug!(
            url = %result.request_url,
            entries = result.entry_count(),
            "Query complete"
        );
        Ok(result)
    }

    /// The server's capability statement.
    pub async fn metadata(&self) -> Result<Value> {
        Ok(self.get_raw("metadata", &GetOptions::default()).await?.body)
    }

    /// Resource types the server supports, minus `ignore`.
    ///
    /// The capability statement is fetched once per client; see
    /// [`reset_resource_catalog`](Self::reset_resource_catalog).
    pub async fn default_resources(&self, ignore: &[&str]) -> Result<Vec<String>> {
        let types = self.catalog.get_or_load(|| self.metadata()).await?;
        Ok(types
            .into_iter()
            .filter(|t| !ignore.contains(&t.as_str()))
            .collect())
    }

    pub async fn reset_resource_catalog(&self) {
        self.catalog.reset().await;
    }

    /// PUT `record` at `{type}/{id}`.
    pub async fn update(&self, resource_type: &str, id: &str, record: &Value) -> Result<RawResponse> {
        let url = self.endpoint(&format!("{resource_type}/{id}"));
        self.send(Outgoing::new(Method::PUT, url, Some(record))).await
    }

    /// JSON-patch `{type}/{id}`, asking for the patched record back.
    pub async fn patch(&self, resource_type: &str, id: &str, patch: &Value) -> Result<RawResponse> {
        let url = self.endpoint(&format!("{resource_type}/{id}"));
        let mut req = Outgoing::new(Method::PATCH, url, Some(patch));
        req.content_type = JSON_PATCH_CONTENT_TYPE;
        req.prefer = Some("return=representation");
        self.send(req).await
    }

    pub async fn delete_by_id(&self, resource_type: &str, id: &str) -> Result<RawResponse> {
        let url = self.endpoint(&format!("{resource_type}/{id}"));
        self.send(Outgoing::new(Method::DELETE, url, None)).await
    }

    /// Deletes every `{type}` record matched by `query`, one id at a time.
    ///
    /// The search is paginated; an empty match set returns no responses.
    pub async fn delete_by_query(
        &self,
        resource_type: &str,
        query: &str,
    ) -> Result<Vec<RawResponse>> {
        let search = format!("{resource_type}?{}", query.trim_start_matches('?'));
        let found = self.get(&search, &GetOptions::default()).await?;
        let ids: Vec<String> = found
            .matches()
            .filter_map(|record| record.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        tracing::debug!(resource_type, query, matched = ids.len(), "Deleting by query");

        let mut responses = Vec::with_capacity(ids.len());
        for id in &ids {
            responses.push(self.delete_by_id(resource_type, id).await?);
        }
        Ok(responses)
    }

    /// POST to a server-level operation such as `$reindex`.
    ///
    /// Commands starting with `:` are appended to the base URL as-is.
    pub async fn operation(&self, command: &str, body: Option<&Value>) -> Result<RawResponse> {
        let url = if command.starts_with(':') {
            format!("{}{command}", self.base_url)
        } else {
            self.endpoint(command)
        };
        self.send(Outgoing::new(Method::POST, url, body)).await
    }

    /// Re-queries `endpoint` until it reports `target_count` matches or
    /// `timeout` elapses.
    pub async fn poll_until(
        &self,
        endpoint: &str,
        target_count: usize,
        interval: Duration,
        timeout: Duration,
    ) -> Result<PollOutcome> {
        let policy = RetryPolicy::fixed(u32::MAX, interval);
        let options = GetOptions::default().single_page();
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = self.get(endpoint, &options).await?;
            let observed = observed_count(&result);

            if observed == target_count {
                return Ok(PollOutcome {
                    result,
                    observed,
                    reached: true,
                    attempts,
                });
            }
            if started.elapsed() >= timeout || !policy.has_attempts_left(attempts) {
                tracing::warn!(
                    endpoint,
                    target_count,
                    observed,
                    attempts,
                    "Gave up waiting for expected count"
                );
                return Ok(PollOutcome {
                    result,
                    observed,
                    reached: false,
                    attempts,
                });
            }

            tracing::debug!(endpoint, target_count, observed, attempts, "Waiting for count");
            tokio::time::sleep(policy.delay_for_attempt(attempts)).await;
        }
    }
}

impl std::fmt::Debug for FhirClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhirClient")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth.scheme())
            .field("id_cache", &self.id_cache.is_some())
            .finish_non_exhaustive()
    }
}

/// Match count of a search page: `total` when declared, otherwise the
/// entries of the (possibly embedded) Bundle.
fn observed_count(result: &PagedResult) -> usize {
    if let Some(total) = result.total() {
        return total as usize;
    }
    match result.entries.as_slice() {
        [only] if only.get("resourceType").and_then(Value::as_str) == Some("Bundle") => only
            .get("entry")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        entries => entries.len(),
    }
}

/// `resource?k=v&...` with form-encoded values; extends an existing query.
pub fn with_query(resource: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return resource.to_string();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    let separator = if resource.contains('?') { '&' } else { '?' };
    format!("{resource}{separator}{encoded}")
}

#[cfg(test)]
mod tests {
    use crate::response::RawResponse;

    use super::*;

    #[test]
    fn test_with_query_encodes_values() {
        assert_eq!(with_query("Patient", &[]), "Patient");
        assert_eq!(
            with_query("Patient", &[("identifier", "https://x.org/patient|P 1")]),
            "Patient?identifier=https%3A%2F%2Fx.org%2Fpatient%7CP+1"
        );
        assert_eq!(with_query("Patient?_tag=s", &[("url", "u")]), "Patient?_tag=s&url=u");
    }

    #[test]
    fn test_observed_count() {
        let with_total = PagedResult::from_response(RawResponse::new(
            200,
            "u",
            json!({"resourceType": "Bundle", "total": 3, "entry": [{"resource": {}}]}),
        ));
        assert_eq!(observed_count(&with_total), 3);

        let empty_bundle = PagedResult::from_response(RawResponse::new(
            200,
            "u",
            json!({"resourceType": "Bundle", "type": "searchset"}),
        ));
        assert_eq!(observed_count(&empty_bundle), 0);

        let listed = PagedResult::from_response(RawResponse::new(
            200,
            "u",
            json!({"resourceType": "Bundle", "entry": [{"resource": {}}, {"resource": {}}]}),
        ));
        assert_eq!(observed_count(&listed), 2);
    }

    #[test]
    fn test_get_options_builders() {
        let options = GetOptions::default()
            .single_page()
            .with_page_size(50)
            .with_elements("id")
            .allow_failure();
        assert!(!options.paginate);
        assert!(!options.fail_on_error);
        assert_eq!(options.page_size, Some(50));
        assert_eq!(options.elements.as_deref(), Some("id"));
    }

    #[tokio::test]
    async fn test_endpoint_joins_base() {
        let host = HostConfig::new("http://localhost:8080/fhir/", "none");
        let client = FhirClient::builder(host).build().await.unwrap();
        assert_eq!(client.endpoint("Patient"), "http://localhost:8080/fhir/Patient");
        assert_eq!(client.endpoint("/Patient/1"), "http://localhost:8080/fhir/Patient/1");
        assert_eq!(client.endpoint(""), "http://localhost:8080/fhir");
        assert_eq!(client.endpoint("https://other/Patient"), "https://other/Patient");
    }
}
