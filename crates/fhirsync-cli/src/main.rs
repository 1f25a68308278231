mod cli;
mod commands;
mod config;
mod observability;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fhirsync_client::{AuditLog, FhirClient, IdCache, IdCacheConfig};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    observability::init_tracing(&cli.log_level);

    if let Err(e) = run(&cli).await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Hosts => {
            commands::hosts::list(cli.hosts_file.as_deref())?;
        }
        Commands::Query(args) => {
            let client = connect(cli, None).await?;
            commands::query::run(&client, args).await?;
        }
        Commands::LoadIds(args) => {
            let client = connect(cli, None).await?;
            commands::ids::run(&client, args).await?;
        }
        Commands::Post(args) => {
            let cache = if args.use_cache && !args.validate_only {
                let mut config =
                    IdCacheConfig::default().with_resource_types([args.resource_type.clone()]);
                if let Some(study) = &args.study {
                    config = config.with_study(study.clone());
                }
                Some(Arc::new(IdCache::new(config)?))
            } else {
                None
            };
            let client = connect(cli, cache).await?;
            commands::submit::post(&client, args).await?;
        }
        Commands::Load(args) => {
            let client = connect(cli, None).await?;
            commands::submit::load(&client, args).await?;
        }
        Commands::Delete(args) => {
            let client = connect(cli, None).await?;
            commands::submit::delete(&client, args).await?;
        }
    }

    Ok(())
}

async fn connect(cli: &Cli, cache: Option<Arc<IdCache>>) -> Result<FhirClient> {
    let hosts = config::load_hosts(cli.hosts_file.as_deref())?;
    let host = config::resolve_host(&hosts, cli.host.as_deref())?;
    let target = host.target_service_url.clone();

    let mut builder = FhirClient::builder(host.clone());
    if let Some(dir) = &cli.audit_dir {
        let path = dir.join(format!("{}-rest.log", host.file_safe_desc()));
        builder = builder.audit_log(AuditLog::create(&path)?);
    }
    if let Some(cache) = cache {
        builder = builder.id_cache(cache);
    }

    builder
        .build()
        .await
        .with_context(|| format!("Failed to connect to {target}"))
}
