use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fhirsync_auth::HostConfig;

/// Environment name → host settings.
pub type HostsFile = BTreeMap<String, HostConfig>;

fn default_hosts_path() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Cannot determine home directory")?
        .join(".fhirsync")
        .join("hosts.toml"))
}

pub fn parse_hosts(content: &str) -> Result<HostsFile> {
    toml::from_str(content).context("Invalid hosts file")
}

pub fn load_hosts(path: Option<&Path>) -> Result<HostsFile> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_hosts_path()?,
    };
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read hosts file: {}", path.display()))?;
    parse_hosts(&content)
}

/// Picks the named environment, or the only one when no name is given.
pub fn resolve_host(hosts: &HostsFile, name: Option<&str>) -> Result<HostConfig> {
    let configured = || hosts.keys().cloned().collect::<Vec<_>>().join(", ");
    if let Some(name) = name {
        return hosts
            .get(name)
            .cloned()
            .with_context(|| format!("Unknown host \"{name}\". Configured: {}", configured()));
    }

    let mut all = hosts.values();
    match (all.next(), all.next()) {
        (Some(only), None) => Ok(only.clone()),
        _ => anyhow::bail!(
            "No host selected. Use --host or set FHIRSYNC_HOST (configured: {})",
            configured()
        ),
    }
}
