mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "iptutubarao")]
#[command(about = "Check IPTU debts on the Tubarão municipal tax portal")]
struct Cli {
    /// Output format: table, json, csv, or markdown
    #[arg(long, default_value = "table", global = true)]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the portal once for each CPF
    Check(commands::check::CheckArgs),
    /// Keep refreshing each CPF on an interval until interrupted
    Watch(commands::watch::WatchArgs),
    /// Run the extractor on a saved portal page
    Parse(commands::parse::ParseArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("iptutubarao=info".parse()?)
                .add_directive("meuiptu_api=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::parse(&cli.output);

    match &cli.command {
        Commands::Check(args) => commands::check::run(args, &format).await?,
        Commands::Watch(args) => commands::watch::run(args, &format).await?,
        Commands::Parse(args) => commands::parse::run(args, &format)?,
    }

    Ok(())
}
