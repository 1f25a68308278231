use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use fhirsync_client::{BundleWriter, FhirClient, Identifier, LoadOptions, PostOptions};
use serde_json::Value;

use crate::cli::{DeleteArgs, LoadArgs, PostArgs};
use crate::output::{SubmitTally, print_success, print_warning};

/// Records from a JSON file holding one object or an array of them.
pub fn read_records(path: &Path) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    match value {
        Value::Array(records) => Ok(records),
        record @ Value::Object(_) => Ok(vec![record]),
        _ => anyhow::bail!("{} must hold a record or an array of records", path.display()),
    }
}

fn label(resource_type: &str, index: usize, record: &Value) -> String {
    match Identifier::first_of(record) {
        Some(identifier) => format!("{resource_type} {identifier}"),
        None => format!("{resource_type} #{index}"),
    }
}

fn finish(tally: &SubmitTally, resource_type: &str) -> Result<()> {
    println!("{}", tally.table());
    if tally.rejected > 0 {
        anyhow::bail!(
            "{} of {} {resource_type} records were rejected",
            tally.rejected,
            tally.total()
        );
    }
    print_success(&format!("{} {} records accepted", tally.accepted, resource_type.cyan()));
    Ok(())
}

pub async fn post(client: &FhirClient, args: &PostArgs) -> Result<()> {
    let records = read_records(&args.file)?;
    let fixed_identifier = args
        .identifier
        .as_deref()
        .map(str::parse::<Identifier>)
        .transpose()?;

    let mut bundle = match &args.bundle {
        Some(path) => {
            let bundle_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("bundle");
            Some(BundleWriter::create(path, bundle_id, client.base_url())?)
        }
        None => None,
    };

    let mut tally = SubmitTally::default();
    for (index, record) in records.into_iter().enumerate() {
        if let Some(writer) = bundle.as_mut() {
            writer.write(&record)?;
        }

        let options = PostOptions {
            identifier: fixed_identifier
                .clone()
                .or_else(|| Identifier::first_of(&record)),
            validate_only: args.validate_only,
            skip_insert_if_present: args.skip_if_present,
            ..Default::default()
        };
        let name = label(&args.resource_type, index, &record);
        let response = client.post(&args.resource_type, record, &options).await?;
        tally.record(&name, &response);
    }

    if let (Some(writer), Some(path)) = (bundle, &args.bundle) {
        let count = writer.len();
        writer.finish()?;
        print_success(&format!("{count} records written to {}", path.display()));
    }

    finish(&tally, &args.resource_type)
}

pub async fn load(client: &FhirClient, args: &LoadArgs) -> Result<()> {
    let records = read_records(&args.file)?;
    let options = LoadOptions {
        validate_only: args.validate_only,
        skip_insert_if_present: args.skip_if_present,
        ..Default::default()
    };

    let mut tally = SubmitTally::default();
    for (index, record) in records.into_iter().enumerate() {
        let name = match record.get("url").and_then(Value::as_str) {
            Some(url) => format!("{} {url}", args.resource_type),
            None => label(&args.resource_type, index, &record),
        };
        let response = client.load(&args.resource_type, record, &options).await?;
        tally.record(&name, &response);
    }

    finish(&tally, &args.resource_type)
}

pub async fn delete(client: &FhirClient, args: &DeleteArgs) -> Result<()> {
    let responses = match (&args.id, &args.query) {
        (Some(id), _) => vec![client.delete_by_id(&args.resource_type, id).await?],
        (None, Some(query)) => client.delete_by_query(&args.resource_type, query).await?,
        (None, None) => anyhow::bail!("Either --id or --query is required"),
    };

    if responses.is_empty() {
        print_warning(&format!("No {} records matched", args.resource_type));
        return Ok(());
    }

    let mut tally = SubmitTally::default();
    for response in &responses {
        tally.record(&response.request_url, response);
    }
    if tally.rejected > 0 {
        anyhow::bail!(
            "{} of {} {} deletes failed",
            tally.rejected,
            tally.total(),
            args.resource_type
        );
    }
    print_success(&format!("Deleted {} {} records", tally.accepted, args.resource_type.cyan()));
    Ok(())
}
