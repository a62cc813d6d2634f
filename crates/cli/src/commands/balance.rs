//! Print the live CLOB collateral balance.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use sniper_core::ConfigLoader;
use sniper_polymarket::sniper::OrderClient;

pub async fn execute(config_path: &str) -> Result<()> {
    let config = ConfigLoader::load_from(config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    if !config.polymarket.is_live_ready() {
        bail!("CLOB credentials are not configured");
    }

    let client = OrderClient::new(
        &config.polymarket,
        false,
        Duration::from_millis(config.sniper.http_timeout_ms),
    )
    .context("Order client init failed")?;

    let balance = client.fetch_live_balance().await?;
    println!("balance: ${balance:.2}");
    Ok(())
}
