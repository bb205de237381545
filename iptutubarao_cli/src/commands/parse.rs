use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use clap::Args;
use iptutubarao_lib::{extract_at, TaxpayerId};

use crate::output::{print_results, OutputFormat};

#[derive(Args)]
pub struct ParseArgs {
    /// Saved portal response (HTML)
    #[arg(long)]
    pub file: PathBuf,

    /// CPF the page was fetched for
    #[arg(long, env = "IPTU_CPF")]
    pub cpf: String,

    /// Evaluate due dates as of this day (YYYY-MM-DD) instead of today
    #[arg(long)]
    pub today: Option<String>,
}

pub fn run(args: &ParseArgs, format: &OutputFormat) -> Result<()> {
    let taxpayer = match TaxpayerId::parse(&args.cpf) {
        Ok(t) => t,
        Err(e) => bail!("Invalid CPF '{}': {}", args.cpf, e),
    };
    let today = match &args.today {
        Some(raw) => parse_day(raw)?,
        None => Local::now().date_naive(),
    };

    let bytes = match std::fs::read(&args.file) {
        Ok(b) => b,
        Err(e) => bail!("Failed to read {}: {}", args.file.display(), e),
    };
    let html = String::from_utf8_lossy(&bytes);

    let result = extract_at(&html, &taxpayer, today)?;
    if result.signals_disagree() {
        eprintln!(
            "Warning: debt marker says {} but total amount is {:?}",
            result.status_message, result.total_amount
        );
    }
    print_results(&[result], format)
}

fn parse_day(raw: &str) -> Result<NaiveDate> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(d) => Ok(d),
        Err(_) => bail!("Invalid --today '{}': expected YYYY-MM-DD", raw),
    }
}
