use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use exchange_gateway::cli::{self, Cli};
use gateway_core::config;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the envelope, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load()?;
    info!(?cfg, "loaded config");
    cli::load_symbol_aliases(cfg)?;

    let outcome = cli::run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&outcome.body)?);
    if !outcome.ok {
        std::process::exit(1);
    }
    Ok(())
}
