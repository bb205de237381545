use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use iptutubarao_lib::tracker::DEFAULT_REFRESH_INTERVAL;
use iptutubarao_lib::{
    DebtQueryResult, DebtTracker, IptuError, RefreshConfig, ResultCache, TaxpayerId,
};
use tokio::task::JoinSet;

use crate::commands::{parse_taxpayers, PortalArgs};
use crate::output::{print_results, OutputFormat};

#[derive(Args)]
pub struct CheckArgs {
    /// CPF to look up (digits, optionally punctuated); repeat or comma-separate for several
    #[arg(long = "cpf", env = "IPTU_CPF", value_delimiter = ',', required = true)]
    pub cpf: Vec<String>,

    #[command(flatten)]
    pub portal: PortalArgs,
}

pub async fn run(args: &CheckArgs, format: &OutputFormat) -> Result<()> {
    let taxpayers = parse_taxpayers(&args.cpf)?;
    let config = args.portal.config(DEFAULT_REFRESH_INTERVAL)?;
    let cache = Arc::new(ResultCache::new());
    let total = taxpayers.len();

    let mut join_set = JoinSet::new();
    for (idx, taxpayer) in taxpayers.into_iter().enumerate() {
        let config = config.clone();
        let cache = Arc::clone(&cache);
        join_set.spawn(async move {
            let outcome = check_one(&config, taxpayer.clone(), cache).await;
            (idx, taxpayer, outcome)
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        outcomes.push(joined?);
    }
    outcomes.sort_by_key(|(idx, _, _)| *idx);

    let mut results: Vec<DebtQueryResult> = Vec::with_capacity(total);
    let mut failed = 0usize;
    for (_, taxpayer, outcome) in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                failed += 1;
                eprintln!("{}: lookup failed [{}]: {}", taxpayer.formatted(), e.kind(), e);
            }
        }
    }

    if !results.is_empty() {
        print_results(&results, format)?;
    }

    if failed == total {
        bail!("All {} lookups failed", total);
    }
    if failed > 0 {
        eprintln!("{} of {} lookups failed", failed, total);
    }

    Ok(())
}

async fn check_one(
    config: &RefreshConfig,
    taxpayer: TaxpayerId,
    cache: Arc<ResultCache>,
) -> Result<DebtQueryResult, IptuError> {
    let client = config.build_client()?;
    let mut tracker = DebtTracker::new(taxpayer, client, cache);
    tracker.refresh().await
}
