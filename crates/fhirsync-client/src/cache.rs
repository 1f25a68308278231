//! Preloaded business-identifier → remote-id cache.
//!
//! The first identifier of every record is assumed to be unique across the
//! target server, so a full scan of `identifier[0] → id` lets the upsert path
//! decide between create and overwrite without a lookup per record.
//!
//! ## Lifetime
//!
//! The cache is rebuilt on every run so it is guaranteed to reflect the
//! server; nothing is persisted. Records created by the current run are
//! expected to be tracked by the caller.
//!
//! ## Concurrency
//!
//! Entries live in a [`DashMap`] keyed by [`Identifier`], so lookups never
//! block on the bulk scan. Every write takes one coarse mutex, which also
//! guards the diagnostic sets; the duplicate check and the insert are
//! therefore atomic with respect to other writers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use dashmap::DashMap;
use futures_util::{StreamExt, TryStreamExt, stream};
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::client::{FhirClient, GetOptions, with_query};
use crate::error::{CacheError, Result};
use crate::identifier::Identifier;

/// Types never scanned unless listed explicitly.
pub const DEFAULT_IGNORED_TYPES: &[&str] = &["Bundle", "CodeSystem", "ValueSet"];

/// What to do when a key is stored again with a different remote id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDuplicate {
    /// Reject the store with [`CacheError::DuplicateIdentifier`].
    #[default]
    Fail,
    /// Keep the latest id and record the key as a duplicate.
    Overwrite,
}

/// Remote location of a cached identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedId {
    pub resource_type: String,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct IdCacheConfig {
    /// Restricts the scan to records tagged with this study (`_tag`).
    pub study_id: Option<String>,
    /// Types to scan; `None` uses the server's capability statement.
    pub resource_types: Option<Vec<String>>,
    /// Types skipped when discovering from the capability statement.
    pub ignore: Vec<String>,
    /// Case-insensitive patterns an identifier system must match to be
    /// cached. Empty accepts every system.
    pub valid_patterns: Vec<String>,
    pub on_duplicate: OnDuplicate,
    pub page_size: u32,
    /// Resource types scanned at the same time.
    pub concurrency: usize,
}

impl Default for IdCacheConfig {
    fn default() -> Self {
        Self {
            study_id: None,
            resource_types: None,
            ignore: DEFAULT_IGNORED_TYPES.iter().map(|s| s.to_string()).collect(),
            valid_patterns: Vec::new(),
            on_duplicate: OnDuplicate::Fail,
            page_size: 200,
            concurrency: 8,
        }
    }
}

impl IdCacheConfig {
    #[must_use]
    pub fn with_study(mut self, study_id: impl Into<String>) -> Self {
        self.study_id = Some(study_id.into());
        self
    }

    #[must_use]
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_on_duplicate(mut self, on_duplicate: OnDuplicate) -> Self {
        self.on_duplicate = on_duplicate;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

#[derive(Debug, Default)]
struct Diagnostics {
    malformed: BTreeSet<String>,
    duplicates: BTreeSet<String>,
    missing_identifiers: BTreeMap<String, usize>,
}

/// Outcome of a bulk load, in scan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// `(resource type, identifiers cached)` for every scanned type.
    pub resource_counts: Vec<(String, usize)>,
    /// `system|value` of identifiers whose system does not name their type.
    pub malformed_ids: Vec<String>,
    /// `system|value` of keys overwritten under [`OnDuplicate::Overwrite`].
    pub duplicates: Vec<String>,
    /// Records without a usable first identifier, per type.
    pub missing_identifiers: Vec<(String, usize)>,
}

impl LoadSummary {
    pub fn total_ids(&self) -> usize {
        self.resource_counts.iter().map(|(_, n)| n).sum()
    }
}

pub struct IdCache {
    config: IdCacheConfig,
    patterns: Vec<Regex>,
    entries: DashMap<Identifier, CachedId>,
    write_lock: Mutex<Diagnostics>,
}

impl IdCache {
    pub fn new(config: IdCacheConfig) -> Result<Self> {
        let patterns = config
            .valid_patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            patterns,
            entries: DashMap::new(),
            write_lock: Mutex::new(Diagnostics::default()),
        })
    }

    pub fn config(&self) -> &IdCacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `system` passes the configured allow-list.
    pub fn valid_system(&self, system: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(system))
    }

    /// Remote id for `system|value`.
    ///
    /// With `expected_type`, a hit of another resource type is reported as
    /// [`CacheError::TypeMismatch`] instead of being returned.
    pub fn get(
        &self,
        system: &str,
        value: &str,
        expected_type: Option<&str>,
    ) -> std::result::Result<Option<String>, CacheError> {
        let key = Identifier::new(system, value);
        let Some(cached) = self.get_entry(&key) else {
            return Ok(None);
        };
        if let Some(expected) = expected_type {
            if expected != cached.resource_type {
                return Err(CacheError::TypeMismatch {
                    system: key.system,
                    value: key.value,
                    expected: expected.to_string(),
                    actual: cached.resource_type,
                });
            }
        }
        Ok(Some(cached.id))
    }

    pub fn get_entry(&self, key: &Identifier) -> Option<CachedId> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Stores a mapping using the configured duplicate policy.
    pub fn store(
        &self,
        resource_type: &str,
        system: &str,
        value: &str,
        id: &str,
    ) -> std::result::Result<(), CacheError> {
        self.store_with(resource_type, system, value, id, self.config.on_duplicate)
    }

    /// Stores a mapping under an explicit duplicate policy.
    pub fn store_with(
        &self,
        resource_type: &str,
        system: &str,
        value: &str,
        id: &str,
        on_duplicate: OnDuplicate,
    ) -> std::result::Result<(), CacheError> {
        let key = Identifier::new(system, value);
        let mut diagnostics = self.lock();

        if !key.system_matches_type(resource_type) {
            diagnostics.malformed.insert(key.token());
        }

        if let Some(existing) = self.entries.get(&key).map(|e| e.value().clone()) {
            if existing.id != id || existing.resource_type != resource_type {
                match on_duplicate {
                    OnDuplicate::Fail => {
                        return Err(CacheError::DuplicateIdentifier {
                            system: key.system,
                            value: key.value,
                            resource_type: resource_type.to_string(),
                            existing_id: existing.id,
                            new_id: id.to_string(),
                        });
                    }
                    OnDuplicate::Overwrite => {
                        tracing::warn!(
                            identifier = %key,
                            existing = %format!("{}/{}", existing.resource_type, existing.id),
                            replacement = %format!("{resource_type}/{id}"),
                            "Duplicate identifier, keeping latest"
                        );
                        diagnostics.duplicates.insert(key.token());
                    }
                }
            }
        }

        self.entries.insert(
            key,
            CachedId {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            },
        );
        Ok(())
    }

    pub fn malformed_ids(&self) -> Vec<String> {
        self.lock().malformed.iter().cloned().collect()
    }

    pub fn duplicates(&self) -> Vec<String> {
        self.lock().duplicates.iter().cloned().collect()
    }

    pub fn missing_identifiers(&self) -> Vec<(String, usize)> {
        self.lock()
            .missing_identifiers
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Drops every entry and diagnostic.
    pub fn clear(&self) {
        let mut diagnostics = self.lock();
        self.entries.clear();
        *diagnostics = Diagnostics::default();
    }

    /// Scans the target server and fills the cache.
    ///
    /// One worker per resource type, up to `concurrency` at a time. A
    /// duplicate under [`OnDuplicate::Fail`] aborts the load.
    pub async fn load(&self, client: &FhirClient) -> Result<LoadSummary> {
        let resource_types = match &self.config.resource_types {
            Some(types) => types.clone(),
            None => {
                let ignore: Vec<&str> = self.config.ignore.iter().map(String::as_str).collect();
                client.default_resources(&ignore).await?
            }
        };

        tracing::info!(
            resource_types = resource_types.len(),
            target_service = client.base_url(),
            "Loading identifiers"
        );

        let resource_counts: Vec<(String, usize)> = stream::iter(resource_types)
            .map(|resource_type| async move {
                let count = self.load_resource_type(client, &resource_type).await?;
                Ok::<_, crate::error::ClientError>((resource_type, count))
            })
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await?;

        let summary = LoadSummary {
            resource_counts,
            malformed_ids: self.malformed_ids(),
            duplicates: self.duplicates(),
            missing_identifiers: self.missing_identifiers(),
        };
        tracing::info!(
            resource_types = summary.resource_counts.len(),
            ids = summary.total_ids(),
            malformed = summary.malformed_ids.len(),
            duplicates = summary.duplicates.len(),
            "Identifier cache loaded"
        );
        Ok(summary)
    }

    async fn load_resource_type(&self, client: &FhirClient, resource_type: &str) -> Result<usize> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(study) = &self.config.study_id {
            params.push(("_tag", study.as_str()));
        }
        let query = with_query(resource_type, &params);
        let options = GetOptions::default()
            .with_elements("identifier,id")
            .with_page_size(self.config.page_size)
            .allow_failure();

        let result = client.get(&query, &options).await?;
        if !result.success() {
            tracing::warn!(
                resource_type,
                status = result.status,
                "Identifier scan failed, skipping type"
            );
            return Ok(0);
        }

        let mut count = 0;
        for entry in &result.entries {
            let Some(resource) = entry.get("resource") else {
                if entry.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
                    tracing::warn!(resource_type, "Search entry without a resource");
                }
                continue;
            };
            if resource.get("resourceType").and_then(Value::as_str) != Some(resource_type) {
                tracing::debug!(
                    resource_type,
                    found = ?resource.get("resourceType"),
                    "Skipping entry of another type"
                );
                continue;
            }
            let Some(id) = resource.get("id").and_then(Value::as_str) else {
                tracing::warn!(resource_type, "Search entry without an id");
                continue;
            };

            match Identifier::first_of(resource) {
                Some(identifier) => {
                    if self.valid_system(&identifier.system) {
                        self.store(resource_type, &identifier.system, &identifier.value, id)?;
                        count += 1;
                    }
                }
                None => {
                    *self
                        .lock()
                        .missing_identifiers
                        .entry(resource_type.to_string())
                        .or_default() += 1;
                }
            }
        }

        tracing::debug!(resource_type, count, "Identifiers cached");
        Ok(count)
    }

    fn lock(&self) -> MutexGuard<'_, Diagnostics> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for IdCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const PATIENT_SYSTEM: &str = "https://example.org/study/patient";

    fn cache(on_duplicate: OnDuplicate) -> IdCache {
        IdCache::new(IdCacheConfig::default().with_on_duplicate(on_duplicate)).unwrap()
    }

    #[test]
    fn test_store_and_get() {
        let cache = cache(OnDuplicate::Fail);
        cache.store("Patient", PATIENT_SYSTEM, "P-1", "101").unwrap();

        assert_eq!(cache.get(PATIENT_SYSTEM, "P-1", None).unwrap().as_deref(), Some("101"));
        assert_eq!(
            cache.get(PATIENT_SYSTEM, "P-1", Some("Patient")).unwrap().as_deref(),
            Some("101")
        );
        assert_eq!(cache.get(PATIENT_SYSTEM, "P-2", None).unwrap(), None);
        assert!(cache.malformed_ids().is_empty());
    }

    #[test]
    fn test_type_mismatch() {
        let cache = cache(OnDuplicate::Fail);
        cache.store("Patient", PATIENT_SYSTEM, "P-1", "101").unwrap();
        let err = cache.get(PATIENT_SYSTEM, "P-1", Some("Observation")).unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { ref actual, .. } if actual == "Patient"));
    }

    #[test]
    fn test_strict_duplicate_rejected() {
        let cache = cache(OnDuplicate::Fail);
        cache.store("Patient", PATIENT_SYSTEM, "P-1", "101").unwrap();
        // Same id again is not a conflict
        cache.store("Patient", PATIENT_SYSTEM, "P-1", "101").unwrap();

        let err = cache.store("Patient", PATIENT_SYSTEM, "P-1", "202").unwrap_err();
        assert!(matches!(
            err,
            CacheError::DuplicateIdentifier { ref existing_id, ref new_id, .. }
                if existing_id == "101" && new_id == "202"
        ));
        assert_eq!(cache.get(PATIENT_SYSTEM, "P-1", None).unwrap().as_deref(), Some("101"));
    }

    #[test]
    fn test_lenient_duplicate_keeps_latest() {
        let cache = cache(OnDuplicate::Overwrite);
        cache.store("Patient", PATIENT_SYSTEM, "P-1", "101").unwrap();
        cache.store("Patient", PATIENT_SYSTEM, "P-1", "202").unwrap();

        assert_eq!(cache.get(PATIENT_SYSTEM, "P-1", None).unwrap().as_deref(), Some("202"));
        assert_eq!(cache.duplicates(), vec![format!("{PATIENT_SYSTEM}|P-1")]);
    }

    #[test]
    fn test_explicit_policy_overrides_config() {
        let cache = cache(OnDuplicate::Fail);
        cache.store("Patient", PATIENT_SYSTEM, "P-1", "101").unwrap();
        cache
            .store_with("Patient", PATIENT_SYSTEM, "P-1", "303", OnDuplicate::Overwrite)
            .unwrap();
        assert_eq!(cache.get(PATIENT_SYSTEM, "P-1", None).unwrap().as_deref(), Some("303"));
    }

    #[test]
    fn test_malformed_system_flagged_but_cached() {
        let cache = cache(OnDuplicate::Fail);
        cache
            .store("Patient", "https://example.org/study/participant", "P-9", "909")
            .unwrap();
        assert_eq!(
            cache.malformed_ids(),
            vec!["https://example.org/study/participant|P-9".to_string()]
        );
        assert_eq!(
            cache
                .get("https://example.org/study/participant", "P-9", Some("Patient"))
                .unwrap()
                .as_deref(),
            Some("909")
        );
    }

    #[test]
    fn test_case_insensitive_patterns() {
        let cache = IdCache::new(IdCacheConfig::default().with_patterns(["example\\.org/STUDY"]))
            .unwrap();
        assert!(cache.valid_system(PATIENT_SYSTEM));
        assert!(!cache.valid_system("https://other.org/patient"));

        let open = IdCache::new(IdCacheConfig::default()).unwrap();
        assert!(open.valid_system("anything"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(IdCache::new(IdCacheConfig::default().with_patterns(["("])).is_err());
    }

    #[test]
    fn test_last_store_wins_across_types_and_pages() {
        let cache = cache(OnDuplicate::Overwrite);
        let types = ["Patient", "Observation", "Specimen"];
        // Three synthetic "pages" per type; the last page re-stores key 0.
        for page in 0..3 {
            for rt in types {
                let system = format!("https://example.org/study/{}", rt.to_lowercase());
                for key in 0..4 {
                    let id = format!("{rt}-{page}-{key}");
                    if page == 0 || key == 0 {
                        cache.store(rt, &system, &key.to_string(), &id).unwrap();
                    }
                }
            }
        }
        for rt in types {
            let system = format!("https://example.org/study/{}", rt.to_lowercase());
            assert_eq!(
                cache.get(&system, "0", Some(rt)).unwrap(),
                Some(format!("{rt}-2-0"))
            );
            assert_eq!(
                cache.get(&system, "3", Some(rt)).unwrap(),
                Some(format!("{rt}-0-3"))
            );
        }
        assert_eq!(cache.len(), 12);
        assert!(cache.malformed_ids().is_empty());
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(cache(OnDuplicate::Fail));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        cache
                            .store("Patient", PATIENT_SYSTEM, &format!("{t}-{i}"), &format!("{t}{i}"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 1000);
    }

    #[test]
    fn test_clear_resets_everything() {
        let cache = cache(OnDuplicate::Overwrite);
        cache.store("Patient", "bad-system", "x", "1").unwrap();
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.malformed_ids().is_empty());
    }
}
