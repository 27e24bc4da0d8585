//! Wallet ledger server binary

use anyhow::Context;
use std::time::Duration;
use wallet_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting wallet ledger server");

    // Load configuration: a TOML path argument wins over the environment
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading config from {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "Configuration loaded"
    );

    let ttl = Duration::from_secs(config.cache.wallet_ttl_secs.max(1));
    let ledger = Ledger::open(config).await.context("opening ledger")?;
    let stats = ledger.storage_stats()?;
    tracing::info!(
        wallets = stats.total_wallets,
        transactions = stats.total_transactions,
        alerts = stats.total_alerts,
        "Ledger opened successfully"
    );

    let mut purge = tokio::time::interval(ttl);
    loop {
        tokio::select! {
            _ = purge.tick() => ledger.purge_cache(),
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for shutdown signal")?;
                break;
            }
        }
    }

    tracing::info!("Shutting down wallet ledger server");
    ledger.shutdown().await?;
    Ok(())
}
