use anyhow::{Context, Result};
use fhirsync_client::{FhirClient, IdCache, IdCacheConfig, OnDuplicate};

use crate::cli::LoadIdsArgs;
use crate::output::{print_load_summary, print_success};

pub fn cache_config(args: &LoadIdsArgs) -> IdCacheConfig {
    let mut config = IdCacheConfig::default()
        .with_patterns(args.patterns.iter().cloned())
        .with_concurrency(args.concurrency)
        .with_on_duplicate(if args.strict {
            OnDuplicate::Fail
        } else {
            OnDuplicate::Overwrite
        });
    if let Some(study) = &args.study {
        config = config.with_study(study.clone());
    }
    if !args.resource_types.is_empty() {
        config = config.with_resource_types(args.resource_types.iter().cloned());
    }
    config
}

pub async fn run(client: &FhirClient, args: &LoadIdsArgs) -> Result<()> {
    let cache = IdCache::new(cache_config(args))?;
    let summary = cache
        .load(client)
        .await
        .context("Identifier preload failed")?;

    print_load_summary(&summary);
    print_success(&format!(
        "{} identifiers cached from {}",
        summary.total_ids(),
        client.base_url()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> LoadIdsArgs {
        LoadIdsArgs {
            patterns: vec!["example\\.org".to_string()],
            study: Some("study-1".to_string()),
            resource_types: Vec::new(),
            strict: false,
            concurrency: 4,
        }
    }

    #[test]
    fn test_lenient_by_default() {
        let config = cache_config(&args());
        assert_eq!(config.on_duplicate, OnDuplicate::Overwrite);
        assert_eq!(config.study_id.as_deref(), Some("study-1"));
        assert!(config.resource_types.is_none());
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.ignore, vec!["Bundle", "CodeSystem", "ValueSet"]);
    }

    #[test]
    fn test_strict_and_explicit_types() {
        let mut args = args();
        args.strict = true;
        args.resource_types = vec!["Patient".to_string()];
        let config = cache_config(&args);
        assert_eq!(config.on_duplicate, OnDuplicate::Fail);
        assert_eq!(config.resource_types, Some(vec!["Patient".to_string()]));
    }
}
