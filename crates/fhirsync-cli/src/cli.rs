use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fhirsync")]
#[command(about = "fhirsync: identifier-aware loading into FHIR servers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Hosts file (defaults to ~/.fhirsync/hosts.toml)
    #[arg(long, global = true, env = "FHIRSYNC_HOSTS")]
    pub hosts_file: Option<PathBuf>,

    /// Environment to talk to, as named in the hosts file
    #[arg(long, global = true, env = "FHIRSYNC_HOST")]
    pub host: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Write an audit log of mutating requests under this directory
    #[arg(long, global = true)]
    pub audit_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured environments
    Hosts,
    /// Run queries and emit their results as JSON
    Query(QueryArgs),
    /// Preload the identifier cache and report what was found
    LoadIds(LoadIdsArgs),
    /// Create or overwrite records keyed by business identifier
    Post(PostArgs),
    /// Create or replace canonical records keyed by url
    Load(LoadArgs),
    /// Delete records by id or by query
    Delete(DeleteArgs),
}

#[derive(clap::Args)]
pub struct QueryArgs {
    /// Query relative to the target (e.g. "Patient?_tag=study-1"); read from
    /// stdin until "exit" when omitted
    #[arg(short, long = "query")]
    pub queries: Vec<String>,

    /// Write the results to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Only fetch the first page of each query
    #[arg(long)]
    pub no_paginate: bool,
}

#[derive(clap::Args)]
pub struct LoadIdsArgs {
    /// Identifier systems to cache (case-insensitive regex, repeatable)
    #[arg(short, long = "pattern")]
    pub patterns: Vec<String>,

    /// Only scan records carrying this study tag
    #[arg(long)]
    pub study: Option<String>,

    /// Resource types to scan (repeatable); defaults to the server's list
    #[arg(long = "resource-type")]
    pub resource_types: Vec<String>,

    /// Fail on the first identifier mapped to two different records
    #[arg(long)]
    pub strict: bool,

    /// Resource types scanned at the same time
    #[arg(long, default_value_t = 8)]
    pub concurrency: usize,
}

#[derive(clap::Args)]
pub struct PostArgs {
    /// Resource type of the records
    #[arg(long)]
    pub resource_type: String,

    /// JSON file holding one record or an array of records
    #[arg(long)]
    pub file: PathBuf,

    /// Business identifier (system|value); defaults to each record's first identifier
    #[arg(long)]
    pub identifier: Option<String>,

    /// Validate against the server instead of writing
    #[arg(long)]
    pub validate_only: bool,

    /// Resolve identifiers from a preloaded cache instead of per-record lookups
    #[arg(long)]
    pub use_cache: bool,

    /// Study tag limiting the cache preload
    #[arg(long, requires = "use_cache")]
    pub study: Option<String>,

    /// Leave records that already exist untouched
    #[arg(long)]
    pub skip_if_present: bool,

    /// Also write the records into a transaction bundle at this path
    #[arg(long)]
    pub bundle: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct LoadArgs {
    /// Resource type of the records (e.g. CodeSystem)
    #[arg(long)]
    pub resource_type: String,

    /// JSON file holding one record or an array of records
    #[arg(long)]
    pub file: PathBuf,

    /// Validate against the server instead of writing
    #[arg(long)]
    pub validate_only: bool,

    /// Leave records whose url already exists untouched
    #[arg(long)]
    pub skip_if_present: bool,
}

#[derive(clap::Args)]
pub struct DeleteArgs {
    /// Resource type to delete from
    #[arg(long)]
    pub resource_type: String,

    /// Id of the record to delete
    #[arg(long, conflicts_with = "query", required_unless_present = "query")]
    pub id: Option<String>,

    /// Search parameters selecting the records to delete (e.g. "_tag=study-1")
    #[arg(long)]
    pub query: Option<String>,
}
