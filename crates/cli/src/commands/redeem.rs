//! Manual redemption of a resolved market's positions.

use anyhow::{bail, Context, Result};
use tracing::info;

use sniper_core::ConfigLoader;
use sniper_polymarket::sniper::redeem::{CtfRedeemer, Redeemer};

pub async fn execute(config_path: &str, condition_id: &str, neg_risk: bool) -> Result<()> {
    let config = ConfigLoader::load_from(config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    if config.polymarket.private_key.is_empty() {
        bail!("POLYMARKET_PRIVATE_KEY is required for redemption");
    }

    let redeemer = CtfRedeemer::new(&config.polymarket.rpc_url, &config.polymarket.private_key)
        .context("Redeemer init failed")?;

    info!(condition_id, neg_risk, "Redeeming positions");
    let outcome = redeemer.redeem(condition_id, neg_risk).await;

    println!("status:  {}", outcome.status);
    if !outcome.tx_hash.is_empty() {
        println!("tx_hash: {}", outcome.tx_hash);
    }
    if !outcome.message.is_empty() {
        println!("message: {}", outcome.message);
    }

    if outcome.is_success() {
        Ok(())
    } else {
        bail!("redemption did not complete: {}", outcome.status)
    }
}
