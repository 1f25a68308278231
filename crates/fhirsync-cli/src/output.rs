use std::collections::BTreeMap;

use colored::Colorize;
use fhirsync_client::{LoadSummary, RawResponse};
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::config::HostsFile;

/// Malformed identifiers listed before the rest are summarized.
const MALFORMED_PREVIEW: usize = 5;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn hosts_table(hosts: &HostsFile) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Host", "URL", "Auth", "Description"]);
    for (name, host) in hosts {
        builder.push_record([
            name.as_str(),
            host.target_service_url.as_str(),
            host.auth_type.as_str(),
            host.host_desc.as_deref().unwrap_or("-"),
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

pub fn print_hosts(hosts: &HostsFile) {
    if hosts.is_empty() {
        println!("No hosts configured.");
        return;
    }
    println!("{}", hosts_table(hosts));
}

pub fn id_counts_table(summary: &LoadSummary) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Resource Type", "IDs"]);
    for (resource_type, count) in &summary.resource_counts {
        builder.push_record([resource_type.clone(), count.to_string()]);
    }
    builder.push_record(["Total".to_string(), summary.total_ids().to_string()]);
    builder.build().with(Style::rounded()).to_string()
}

pub fn print_load_summary(summary: &LoadSummary) {
    println!("{}", id_counts_table(summary));

    if !summary.malformed_ids.is_empty() {
        print_warning(&format!(
            "{} identifiers whose system does not name their resource type",
            summary.malformed_ids.len()
        ));
        let mut builder = Builder::default();
        builder.push_record(["Malformed Identifier"]);
        for id in summary.malformed_ids.iter().take(MALFORMED_PREVIEW) {
            builder.push_record([id.as_str()]);
        }
        println!("{}", builder.build().with(Style::rounded()));
        if summary.malformed_ids.len() > MALFORMED_PREVIEW {
            println!("... and {} more", summary.malformed_ids.len() - MALFORMED_PREVIEW);
        }
    }

    if !summary.missing_identifiers.is_empty() {
        let mut builder = Builder::default();
        builder.push_record(["Resource Type", "Records Without Identifier"]);
        for (resource_type, count) in &summary.missing_identifiers {
            builder.push_record([resource_type.clone(), count.to_string()]);
        }
        println!("{}", builder.build().with(Style::rounded()));
    }

    if !summary.duplicates.is_empty() {
        print_warning(&format!(
            "{} identifiers map to more than one record; the latest id was kept",
            summary.duplicates.len()
        ));
    }
}

/// Outcome counts of a batch of submissions.
#[derive(Debug, Default)]
pub struct SubmitTally {
    pub accepted: usize,
    pub rejected: usize,
    statuses: BTreeMap<u16, usize>,
}

impl SubmitTally {
    pub fn record(&mut self, label: &str, response: &RawResponse) {
        *self.statuses.entry(response.status).or_default() += 1;
        if response.is_accepted() {
            self.accepted += 1;
        } else {
            self.rejected += 1;
            let detail = response.diagnostics();
            if detail.is_empty() {
                print_error(&format!("{label}: HTTP {}", response.status));
            } else {
                print_error(&format!("{label}: HTTP {} ({detail})", response.status));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.accepted + self.rejected
    }

    pub fn table(&self) -> String {
        let mut builder = Builder::default();
        builder.push_record(["Status", "Records"]);
        for (status, count) in &self.statuses {
            builder.push_record([status.to_string(), count.to_string()]);
        }
        builder.build().with(Style::rounded()).to_string()
    }
}
