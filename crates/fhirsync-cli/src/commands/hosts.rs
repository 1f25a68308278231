use std::path::Path;

use anyhow::Result;

use crate::config;
use crate::output::print_hosts;

pub fn list(hosts_file: Option<&Path>) -> Result<()> {
    let hosts = config::load_hosts(hosts_file)?;
    print_hosts(&hosts);
    Ok(())
}
