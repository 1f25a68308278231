use std::fs;
use std::io::{self, BufRead};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fhirsync_client::{ClientError, FhirClient, GetOptions, PagedResult};
use serde::Serialize;
use serde_json::Value;

use crate::cli::QueryArgs;
use crate::output::print_success;

/// One query's outcome as written to the report.
#[derive(Debug, Serialize)]
struct QueryReport<'a> {
    #[serde(rename = "Query")]
    query: &'a str,
    #[serde(rename = "Query Time")]
    query_time: String,
    #[serde(rename = "Status Code")]
    status_code: Option<u16>,
    #[serde(rename = "Record Count")]
    record_count: usize,
    #[serde(rename = "Entries", skip_serializing_if = "Option::is_none")]
    entries: Option<Vec<Value>>,
    #[serde(rename = "Response", skip_serializing_if = "Option::is_none")]
    response: Option<Value>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> QueryReport<'a> {
    fn new(
        query: &'a str,
        elapsed: Duration,
        outcome: std::result::Result<PagedResult, ClientError>,
    ) -> Self {
        let query_time = format!("{:.3}s", elapsed.as_secs_f64());
        match outcome {
            Ok(result) => {
                let success = result.success();
                Self {
                    query,
                    query_time,
                    status_code: Some(result.status),
                    record_count: if success { result.entry_count() } else { 0 },
                    entries: success.then(|| result.resources().cloned().collect()),
                    response: (!success).then(|| result.body.clone()),
                    error: None,
                }
            }
            Err(e) => Self {
                query,
                query_time,
                status_code: e.status(),
                record_count: 0,
                entries: None,
                response: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub async fn run(client: &FhirClient, args: &QueryArgs) -> Result<()> {
    let queries = if args.queries.is_empty() {
        eprintln!("Enter queries, one per line; \"exit\" to finish.");
        read_queries(io::stdin().lock())?
    } else {
        args.queries.clone()
    };

    let mut options = GetOptions::default().allow_failure();
    if args.no_paginate {
        options = options.single_page();
    }

    let mut reports = Vec::with_capacity(queries.len());
    for query in &queries {
        let started = Instant::now();
        let outcome = client.get(query, &options).await;
        if let Err(e) = &outcome {
            tracing::warn!(query = %query, error = %e, "Query failed");
        }
        reports.push(QueryReport::new(query, started.elapsed(), outcome));
    }

    let rendered = serde_json::to_string_pretty(&reports)?;
    match &args.out {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            print_success(&format!("{} query results written to {}", reports.len(), path.display()));
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Non-blank lines up to (not including) `exit`.
fn read_queries(reader: impl BufRead) -> Result<Vec<String>> {
    let mut queries = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read query")?;
        let line = line.trim();
        if line == "exit" {
            break;
        }
        if !line.is_empty() {
            queries.push(line.to_string());
        }
    }
    Ok(queries)
}
