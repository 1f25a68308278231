//! Create-or-overwrite submission.
//!
//! [`FhirClient::post`] keys records by their first business identifier,
//! [`FhirClient::load`] keys conformance records by canonical `url`. Both
//! decide between POST and PUT, then submit under the retry policy.

use std::time::Duration;

use reqwest::Method;
use serde_json::{Value, json};

use crate::client::{FhirClient, GetOptions, Outgoing, with_query};
use crate::error::{ClientError, Result};
use crate::identifier::Identifier;
use crate::response::RawResponse;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PostOptions {
    /// Business key used to find an existing record.
    pub identifier: Option<Identifier>,
    /// Search parameter the key is matched against when no cache is set.
    pub identifier_field: String,
    /// POST to `$validate` instead of writing.
    pub validate_only: bool,
    /// Leave an existing record untouched.
    pub skip_insert_if_present: bool,
    /// Overrides the client's submission policy.
    pub retry: Option<RetryPolicy>,
}

impl Default for PostOptions {
    fn default() -> Self {
        Self {
            identifier: None,
            identifier_field: "identifier".to_string(),
            validate_only: false,
            skip_insert_if_present: false,
            retry: None,
        }
    }
}

impl PostOptions {
    #[must_use]
    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Parses a `system|value` token.
    pub fn with_identifier_token(self, token: &str) -> Result<Self> {
        Ok(self.with_identifier(token.parse()?))
    }

    #[must_use]
    pub fn validate_only(mut self) -> Self {
        self.validate_only = true;
        self
    }

    #[must_use]
    pub fn skip_if_present(mut self) -> Self {
        self.skip_insert_if_present = true;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub validate_only: bool,
    pub skip_insert_if_present: bool,
    pub retry: Option<RetryPolicy>,
    /// Pause between count checks after deleting a stale copy.
    pub poll_interval: Duration,
    /// Upper bound on waiting for a delete to become visible.
    pub poll_timeout: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            validate_only: false,
            skip_insert_if_present: false,
            retry: None,
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(60),
        }
    }
}

impl LoadOptions {
    #[must_use]
    pub fn validate_only(mut self) -> Self {
        self.validate_only = true;
        self
    }

    #[must_use]
    pub fn skip_if_present(mut self) -> Self {
        self.skip_insert_if_present = true;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    #[must_use]
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }
}

impl FhirClient {
    /// Creates `record`, or overwrites the copy that carries the same
    /// business identifier.
    ///
    /// Exhausted retries return the last failing response rather than an
    /// error; only transport, auth and cache failures are `Err`.
    pub async fn post(
        &self,
        resource_type: &str,
        mut record: Value,
        options: &PostOptions,
    ) -> Result<RawResponse> {
        ensure_object(&record)?;

        if !options.validate_only {
            if let Some(identifier) = &options.identifier {
                if let Some(id) = self
                    .resolve_identifier(resource_type, identifier, &options.identifier_field)
                    .await?
                {
                    if options.skip_insert_if_present {
                        tracing::info!(
                            resource_type,
                            identifier = %identifier,
                            id = %id,
                            "Already present, skipping"
                        );
                        return Ok(RawResponse::new(
                            200,
                            self.endpoint(&format!("{resource_type}/{id}")),
                            json!({"resourceType": resource_type, "id": id}),
                        ));
                    }
                    record["id"] = Value::String(id);
                }
            }
        }

        let policy = options.retry.as_ref().unwrap_or(&self.retry);
        let (method, url) = self.submission_target(resource_type, &record, options.validate_only);
        let response = self.submit_with_retry(method, &url, &record, policy).await?;

        if !options.validate_only && response.is_accepted() {
            if let (Some(cache), Some(identifier), Some(id)) =
                (&self.id_cache, &options.identifier, response.resource_id())
            {
                cache.store(resource_type, &identifier.system, &identifier.value, id)?;
            }
        }
        Ok(response)
    }

    /// Creates or replaces a canonical (url-keyed) record.
    ///
    /// Copies under the same `url` other than the one being written are
    /// deleted first, and the search is polled until the deletes show up.
    pub async fn load(
        &self,
        resource_type: &str,
        mut record: Value,
        options: &LoadOptions,
    ) -> Result<RawResponse> {
        ensure_object(&record)?;

        if !options.validate_only {
            let canonical = record
                .get("url")
                .and_then(Value::as_str)
                .ok_or(ClientError::MissingField("url"))?
                .to_string();
            let query = with_query(resource_type, &[("url", canonical.as_str())]);
            let existing = self.get(&query, &GetOptions::default().allow_failure()).await?;

            if existing.success() {
                let matches: Vec<Value> = existing.matches().cloned().collect();
                let mut remaining = matches.len();

                for found in matches {
                    let Some(found_id) = found.get("id").and_then(Value::as_str) else {
                        continue;
                    };
                    if options.skip_insert_if_present {
                        tracing::info!(resource_type, url = %canonical, id = found_id, "Already present, skipping");
                        return Ok(RawResponse::new(201, existing.request_url.clone(), found.clone()));
                    }

                    let pinned = record.get("id").and_then(Value::as_str).map(str::to_string);
                    match pinned.as_deref() {
                        None => {
                            record["id"] = Value::String(found_id.to_string());
                        }
                        Some(pinned) if pinned == found_id => {}
                        Some(_) => {
                            tracing::info!(resource_type, url = %canonical, id = found_id, "Deleting stale copy");
                            let deleted = self.delete_by_id(resource_type, found_id).await?;
                            if deleted.is_success() {
                                remaining = remaining.saturating_sub(1);
                                let outcome = self
                                    .poll_until(&query, remaining, options.poll_interval, options.poll_timeout)
                                    .await?;
                                if !outcome.reached {
                                    tracing::error!(
                                        resource_type,
                                        url = %canonical,
                                        expected = remaining,
                                        observed = outcome.observed,
                                        "Delete not visible before timeout, loading anyway"
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }

        let policy = options.retry.as_ref().unwrap_or(&self.retry);
        let (method, url) = self.submission_target(resource_type, &record, options.validate_only);
        self.submit_with_retry(method, &url, &record, policy).await
    }

    /// Sends `record`, retrying statuses the policy marks as transient.
    pub async fn submit_with_retry(
        &self,
        method: Method,
        url: &str,
        record: &Value,
        policy: &RetryPolicy,
    ) -> Result<RawResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .send(Outgoing::new(method.clone(), url, Some(record)))
                .await?;
            if response.is_accepted() {
                return Ok(response);
            }

            if policy.should_retry(attempt, response.status) {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    %method,
                    url,
                    status = response.status,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Transient conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if policy.is_retryable(response.status) {
                tracing::error!(%method, url, status = response.status, attempt, "Retries exhausted");
            }
            return Ok(response);
        }
    }

    async fn resolve_identifier(
        &self,
        resource_type: &str,
        identifier: &Identifier,
        field: &str,
    ) -> Result<Option<String>> {
        if let Some(cache) = &self.id_cache {
            return Ok(cache.get(&identifier.system, &identifier.value, Some(resource_type))?);
        }

        let token = identifier.token();
        let query = with_query(resource_type, &[(field, token.as_str())]);
        let result = self
            .get(&query, &GetOptions::default().single_page().allow_failure())
            .await?;
        if !result.success() {
            tracing::warn!(resource_type, identifier = %identifier, status = result.status, "Lookup failed");
            return Ok(None);
        }
        Ok(result
            .matches()
            .next()
            .and_then(|found| found.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Method and URL for submitting `record`.
    fn submission_target(&self, resource_type: &str, record: &Value, validate_only: bool) -> (Method, String) {
        if validate_only {
            let mut url = self.endpoint(&format!("{resource_type}/$validate"));
            if let Some(profile) = record.pointer("/meta/profile/0").and_then(Value::as_str) {
                url = with_query(&url, &[("profile", profile)]);
            }
            return (Method::POST, url);
        }

        if resource_type == "Bundle" {
            return (Method::POST, self.endpoint(""));
        }
        match record.get("id").and_then(Value::as_str) {
            Some(id) => (Method::PUT, self.endpoint(&format!("{resource_type}/{id}"))),
            None => (Method::POST, self.endpoint(resource_type)),
        }
    }
}

fn ensure_object(record: &Value) -> Result<()> {
    let kind = match record {
        Value::Object(_) => return Ok(()),
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
    };
    Err(ClientError::InvalidRecord(kind))
}

#[cfg(test)]
mod tests {
    use fhirsync_auth::HostConfig;

    use super::*;

    async fn client() -> FhirClient {
        FhirClient::builder(HostConfig::new("http://h/fhir", "none"))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_submission_target() {
        let client = client().await;

        let (method, url) = client.submission_target("Patient", &json!({"resourceType": "Patient"}), false);
        assert_eq!(method, Method::POST);
        assert_eq!(url, "http://h/fhir/Patient");

        let (method, url) =
            client.submission_target("Patient", &json!({"resourceType": "Patient", "id": "p1"}), false);
        assert_eq!(method, Method::PUT);
        assert_eq!(url, "http://h/fhir/Patient/p1");

        let (method, url) = client.submission_target("Bundle", &json!({"id": "b1"}), false);
        assert_eq!(method, Method::POST);
        assert_eq!(url, "http://h/fhir");
    }

    #[tokio::test]
    async fn test_validate_target_carries_profile() {
        let client = client().await;
        let record = json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"profile": ["http://example.org/StructureDefinition/study-patient"]}
        });
        let (method, url) = client.submission_target("Patient", &record, true);
        assert_eq!(method, Method::POST);
        assert_eq!(
            url,
            "http://h/fhir/Patient/$validate?profile=http%3A%2F%2Fexample.org%2FStructureDefinition%2Fstudy-patient"
        );
    }

    #[tokio::test]
    async fn test_non_object_record_rejected() {
        let client = client().await;
        let err = client
            .post("Patient", json!(["not", "a", "record"]), &PostOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidRecord("an array")));

        let err = client
            .load("CodeSystem", json!({"resourceType": "CodeSystem"}), &LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingField("url")));
    }

    #[test]
    fn test_identifier_token_option() {
        let options = PostOptions::default()
            .with_identifier_token("https://example.org/study/patient|P-1")
            .unwrap();
        assert_eq!(options.identifier.unwrap().value, "P-1");
        assert!(PostOptions::default().with_identifier_token("nope").is_err());
    }
}
