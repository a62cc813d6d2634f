//! The `run` command: wires every component and drives the periodic tasks.
//!
//! Five loops share the process: the oracle WebSocket reader (with its
//! supervisor), the odds prefetcher (100 ms), the scan loop (100 ms), the
//! reconciler (5 s), and the live balance sync (10 s). The redemption
//! worker consumes its own queue. SIGINT/SIGTERM stops the feeds and closes
//! the socket cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use sniper_core::ConfigLoader;
use sniper_data::{DatabaseClient, TradeRepository};
use sniper_polymarket::gamma::GammaClient;
use sniper_polymarket::sniper::ev::{EvCalculator, EvConfig};
use sniper_polymarket::sniper::klines::KlinesClient;
use sniper_polymarket::sniper::price_feed::{PriceFeed, PriceFeedConfig, PriceFeedHandle};
use sniper_polymarket::sniper::redeem::{CtfRedeemer, NoopRedeemer, RedeemWorker, Redeemer};
use sniper_polymarket::sniper::{
    BalanceManager, CircuitBreaker, OddsFeed, OrderClient, Reconciler, Scanner,
};

pub async fn execute(config_path: &str, enabled: bool) -> Result<()> {
    let config = ConfigLoader::load_from(config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    info!(
        mode = if config.sniper.dry_run { "DRY-RUN" } else { "LIVE" },
        scan_interval_ms = config.sniper.scan_interval_ms,
        "Starting BTC 5M sniper"
    );

    let http_timeout = Duration::from_millis(config.sniper.http_timeout_ms);

    // Trade store.
    let db = DatabaseClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Database connection failed")?;
    db.create_tables().await.context("Schema bootstrap failed")?;
    let repo = TradeRepository::new(db.pool().clone());

    // Order client + balance.
    let order_client = Arc::new(
        OrderClient::new(&config.polymarket, config.sniper.dry_run, http_timeout)
            .context("Order client init failed")?,
    );
    order_client.warm_up().await;

    let balance = Arc::new(BalanceManager::new(
        config.sniper.dry_run,
        config.sniper.initial_balance,
        Arc::clone(&order_client),
    ));
    balance.init(&repo).await;

    // Price feed + supervisor task.
    let price_handle = PriceFeedHandle::new();
    let feed_config = PriceFeedConfig {
        ws_url: config.feed.ws_url.clone(),
        ..PriceFeedConfig::default()
    };
    let mut price_feed = PriceFeed::new(feed_config, price_handle.clone());
    let feed_stop = price_feed.stop_handle();
    let feed_task = tokio::spawn(async move { price_feed.run().await });

    // Odds prefetcher.
    let (odds_feed, odds_handle) = OddsFeed::new(
        http_timeout,
        Duration::from_millis(config.sniper.odds_prefetch_interval_ms),
        Arc::clone(&order_client),
    );
    let odds_stop = odds_feed.stop_handle();
    let odds_task = tokio::spawn(async move { odds_feed.run().await });

    // Redemption worker.
    let redeemer: Arc<dyn Redeemer> = if config.sniper.dry_run {
        Arc::new(NoopRedeemer)
    } else {
        match CtfRedeemer::new(&config.polymarket.rpc_url, &config.polymarket.private_key) {
            Ok(r) => Arc::new(r),
            Err(e) => {
                error!(error = %e, "Redeemer unavailable, falling back to no-op");
                Arc::new(NoopRedeemer)
            }
        }
    };
    let redeem_worker = RedeemWorker::spawn(redeemer);

    // Reconciler.
    let reconciler = Reconciler::new(
        repo.clone(),
        GammaClient::new(Duration::from_secs(5)),
        Arc::clone(&balance),
        price_handle.clone(),
        KlinesClient::new(Duration::from_secs(5)),
        redeem_worker,
    );
    let reconciler_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            reconciler.sweep().await;
        }
    });

    // Live balance sync.
    let sync_balance = Arc::clone(&balance);
    let balance_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(10));
        loop {
            tick.tick().await;
            sync_balance.sync_from_live().await;
        }
    });

    // Scanner.
    let master_switch = Arc::new(AtomicBool::new(enabled));
    let ev = EvCalculator::new(EvConfig {
        min_bet: config.sniper.min_bet,
        max_bet: config.sniper.max_bet,
        initial_balance: balance.initial_balance(),
    });
    let mut scanner = Scanner::new(
        price_handle,
        odds_handle,
        Arc::clone(&balance),
        Arc::clone(&order_client),
        repo,
        ev,
        CircuitBreaker::with_defaults(),
        Arc::clone(&master_switch),
    );

    if enabled {
        info!("Master switch ON, scanning live");
    } else {
        info!("Master switch OFF, pass --enabled to trade");
    }

    let scan_interval = Duration::from_millis(config.sniper.scan_interval_ms);
    let scan_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(scan_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            scanner.tick().await;
        }
    });

    wait_for_shutdown().await?;
    info!("Shutting down");

    master_switch.store(false, Ordering::Release);
    feed_stop.store(true, Ordering::SeqCst);
    odds_stop.store(true, Ordering::SeqCst);
    scan_task.abort();
    reconciler_task.abort();
    balance_task.abort();
    odds_task.abort();

    // Give the feed a moment to close the socket with 1000.
    let _ = tokio::time::timeout(Duration::from_secs(3), feed_task).await;

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
