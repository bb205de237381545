use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use iptutubarao_lib::{ResultCache, Scheduler};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::{parse_taxpayers, PortalArgs};
use crate::output::{print_snapshots, OutputFormat};

#[derive(Args)]
pub struct WatchArgs {
    /// CPF to track; repeat or comma-separate for several
    #[arg(long = "cpf", env = "IPTU_CPF", value_delimiter = ',', required = true)]
    pub cpf: Vec<String>,

    /// Seconds between refresh cycles
    #[arg(long, env = "IPTU_REFRESH_SECS", default_value = "86400")]
    pub interval_secs: u64,

    #[command(flatten)]
    pub portal: PortalArgs,
}

pub async fn run(args: &WatchArgs, format: &OutputFormat) -> Result<()> {
    let taxpayers = parse_taxpayers(&args.cpf)?;
    let config = args
        .portal
        .config(Duration::from_secs(args.interval_secs))?;

    let cache = Arc::new(ResultCache::new());
    let mut scheduler = Scheduler::new(config, Arc::clone(&cache))?;
    let mut events = scheduler.subscribe();
    for taxpayer in taxpayers {
        scheduler.track(taxpayer)?;
    }
    eprintln!(
        "Watching {} CPF(s) every {}s, press Ctrl-C to stop",
        scheduler.tracked().len(),
        args.interval_secs
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(snapshot) = cache.get(&event.taxpayer) {
                        print_snapshots(&[snapshot], format)?;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Output fell behind, skipped {} refresh events", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    eprintln!("Stopping, waiting for in-flight refreshes...");
    scheduler.shutdown().await;
    Ok(())
}
