pub mod check;
pub mod parse;
pub mod watch;

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use iptutubarao_lib::{RefreshConfig, TaxpayerId};

/// Portal connection settings shared by the networked subcommands.
#[derive(Args)]
pub struct PortalArgs {
    /// Portal base URL (scheme and host), for testing against a mirror
    #[arg(long, env = "IPTU_BASE_URL")]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "IPTU_TIMEOUT_SECS", default_value = "30")]
    pub timeout_secs: u64,
}

impl PortalArgs {
    pub fn config(&self, interval: Duration) -> Result<RefreshConfig> {
        let config = RefreshConfig {
            interval,
            request_timeout: Duration::from_secs(self.timeout_secs),
            base_url: self.base_url.clone().filter(|url| !url.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parses every CPF argument, dropping repeats but keeping the given order.
pub fn parse_taxpayers(raw: &[String]) -> Result<Vec<TaxpayerId>> {
    let mut taxpayers: Vec<TaxpayerId> = Vec::with_capacity(raw.len());
    for value in raw {
        let taxpayer = match TaxpayerId::parse(value) {
            Ok(t) => t,
            Err(e) => bail!("Invalid CPF '{}': {}", value, e),
        };
        if !taxpayers.contains(&taxpayer) {
            taxpayers.push(taxpayer);
        }
    }
    if taxpayers.is_empty() {
        bail!("At least one --cpf is required");
    }
    Ok(taxpayers)
}
