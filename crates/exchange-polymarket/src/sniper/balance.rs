//! Working-balance tracking for dry-run and live modes.
//!
//! Dry-run replays the trade ledger over the configured starting capital.
//! Live captures the on-chain USDC balance at startup and re-synchronizes
//! every 10 seconds. After a win, redeem polling watches for the payout to
//! arrive on-chain before the scanner trusts the balance again.
//!
//! The working balance is an atomic scalar: the scanner deducts, the
//! reconciler credits/refunds, and the sync task overwrites from remote
//! truth.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use sniper_data::{TradeAction, TradeRepository, TradeResult};

use super::atomic::AtomicF64;
use super::order_client::OrderClient;

/// Redeem polling gives up after this long (ms).
const REDEEM_TIMEOUT_MS: i64 = 180_000;

/// Fraction of the expected payout that counts as "arrived" (fees/slippage).
const REDEEM_TOLERANCE: f64 = 0.8;

/// Verified-balance cache TTL (ms), normal and while redeem-polling.
const VERIFY_TTL_MS: i64 = 5_000;
const VERIFY_TTL_POLLING_MS: i64 = 10_000;

#[derive(Debug, Default)]
struct RedeemPoll {
    active: bool,
    start_ms: i64,
    expected_target: f64,
}

#[derive(Debug, Default)]
struct VerifyCache {
    last_verified_ms: i64,
    last_verified_balance: f64,
}

/// Balance manager shared across scanner, reconciler, and the sync task.
pub struct BalanceManager {
    dry_run: bool,
    order_client: Arc<OrderClient>,
    balance: AtomicF64,
    live_balance: AtomicF64,
    initial_balance: AtomicF64,
    last_live_sync_ms: AtomicI64,
    initial_captured: AtomicBool,
    redeem: Mutex<RedeemPoll>,
    verify: Mutex<VerifyCache>,
}

impl BalanceManager {
    /// Creates the manager; call [`Self::init`] before trading.
    #[must_use]
    pub fn new(dry_run: bool, config_initial_balance: f64, order_client: Arc<OrderClient>) -> Self {
        Self {
            dry_run,
            order_client,
            balance: AtomicF64::new(0.0),
            live_balance: AtomicF64::new(-1.0),
            initial_balance: AtomicF64::new(config_initial_balance),
            last_live_sync_ms: AtomicI64::new(0),
            initial_captured: AtomicBool::new(false),
            redeem: Mutex::new(RedeemPoll::default()),
            verify: Mutex::new(VerifyCache::default()),
        }
    }

    /// Establishes the starting balance.
    ///
    /// Live mode captures the current on-chain balance as the session's
    /// initial capital; dry-run replays the ledger over the configured
    /// starting amount.
    pub async fn init(&self, repo: &TradeRepository) {
        if self.dry_run || !self.order_client.is_live() {
            self.recalc_from_db(repo).await;
            return;
        }
        if self.initial_captured.load(Ordering::Acquire) {
            return;
        }

        match self.order_client.fetch_live_balance().await {
            Ok(live) => {
                self.initial_balance.store(live);
                self.balance.store(live);
                self.live_balance.store(live);
                self.initial_captured.store(true, Ordering::Release);
                self.last_live_sync_ms
                    .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
                info!(balance = format!("{live:.2}"), "Live starting capital captured");
            }
            Err(e) => {
                let fallback = self.initial_balance.load();
                self.balance.store(fallback);
                warn!(error = %e, fallback = format!("{fallback:.2}"),
                      "Live balance unavailable, using configured initial");
            }
        }
    }

    /// Rebuilds the dry-run balance from the trade ledger.
    ///
    /// Stake is deducted for every non-HOLD trade; wins pay
    /// `actual_size × $1`; cancellations refund the stake.
    pub async fn recalc_from_db(&self, repo: &TradeRepository) {
        let initial = self.initial_balance.load();
        let mut balance = initial;
        let mut count = 0usize;

        match repo.find_all().await {
            Ok(trades) => {
                for trade in &trades {
                    if trade.action() == Some(TradeAction::Hold) {
                        continue;
                    }
                    balance -= trade.bet_amount;
                    match trade.result() {
                        Some(TradeResult::Win) => balance += win_payout(trade.actual_size, trade.bet_amount, trade.odds),
                        Some(TradeResult::Cancelled) => balance += trade.bet_amount,
                        _ => {}
                    }
                }
                count = trades.len();
            }
            Err(e) => warn!(error = %e, "Ledger replay failed, starting from initial"),
        }

        self.balance.store(balance.max(0.0));
        info!(
            balance = format!("{balance:.2}"),
            initial = format!("{initial:.2}"),
            trades = count,
            "Balance restored from ledger"
        );
    }

    /// Current working balance.
    #[must_use]
    pub fn balance(&self) -> f64 {
        self.balance.load()
    }

    /// Session starting capital.
    #[must_use]
    pub fn initial_balance(&self) -> f64 {
        self.initial_balance.load()
    }

    /// Last observed on-chain balance (working balance when never synced).
    #[must_use]
    pub fn live_balance(&self) -> f64 {
        let lb = self.live_balance.load();
        if lb >= 0.0 {
            lb
        } else {
            self.balance.load()
        }
    }

    /// Deducts a stake at order time. Never goes below zero.
    pub fn deduct(&self, amount: f64) -> f64 {
        self.balance.update(|b| (b - amount).max(0.0))
    }

    /// Credits a win payout.
    pub fn credit(&self, payout: f64) -> f64 {
        self.balance.update(|b| b + payout)
    }

    /// Refunds a cancelled trade's stake.
    pub fn refund(&self, amount: f64) -> f64 {
        self.balance.update(|b| b + amount)
    }

    /// Overwrites the working balance from the on-chain truth (live mode).
    pub async fn sync_from_live(&self) {
        if self.dry_run || !self.order_client.is_live() {
            return;
        }
        match self.order_client.fetch_live_balance().await {
            Ok(live) => {
                let prev = self.live_balance.load();
                self.live_balance.store(live);
                self.balance.store(live);
                self.last_live_sync_ms
                    .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
                if prev >= 0.0 && (live - prev).abs() > 0.01 {
                    info!(
                        from = format!("{prev:.2}"),
                        to = format!("{live:.2}"),
                        "Balance synchronized"
                    );
                }
            }
            Err(e) => debug!(error = %e, "Balance sync failed"),
        }
    }

    /// Starts watching for a win payout to land on-chain.
    ///
    /// Completion target is the current live balance plus 80% of the
    /// expected payout. Fees and slippage eat the rest.
    pub async fn start_redeem_polling(&self, expected_payout: f64) {
        if self.dry_run || !self.order_client.is_live() {
            return;
        }
        let current = match self.order_client.fetch_live_balance().await {
            Ok(live) => live,
            Err(_) => self.balance.load(),
        };

        let mut redeem = self.redeem.lock();
        redeem.expected_target = current + expected_payout * REDEEM_TOLERANCE;
        redeem.start_ms = chrono::Utc::now().timestamp_millis();
        redeem.active = true;
        info!(
            current = format!("{current:.2}"),
            target = format!("{:.2}", redeem.expected_target),
            payout = format!("{expected_payout:.2}"),
            "Redeem polling started"
        );
    }

    /// Whether a win payout is still being waited on.
    #[must_use]
    pub fn is_redeem_pending(&self) -> bool {
        self.redeem.lock().active
    }

    /// True when running against the live CLOB.
    #[must_use]
    pub fn is_live_mode(&self) -> bool {
        !self.dry_run && self.order_client.is_live()
    }

    /// Authoritative pre-order balance.
    ///
    /// Throttled to one remote read per 5 s (10 s while redeem-polling).
    /// While polling, the returned balance may still be short of the
    /// expected payout — the scanner's minimum-balance gate handles that.
    pub async fn get_verified_balance(&self) -> f64 {
        if self.dry_run || !self.order_client.is_live() {
            return self.balance.load();
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let polling = self.redeem.lock().active;
        let ttl = if polling { VERIFY_TTL_POLLING_MS } else { VERIFY_TTL_MS };
        {
            let cache = self.verify.lock();
            if now_ms - cache.last_verified_ms < ttl && cache.last_verified_balance > 0.0 {
                return cache.last_verified_balance;
            }
        }

        let current = match self.order_client.fetch_live_balance().await {
            Ok(live) => live,
            Err(_) => self.balance.load(),
        };

        let verified = self.apply_redeem_check(current, now_ms);
        let mut cache = self.verify.lock();
        cache.last_verified_ms = now_ms;
        cache.last_verified_balance = verified;
        verified
    }

    /// Resolves the redeem-polling state against a fresh live balance.
    ///
    /// Split out of `get_verified_balance` so the transition rules are
    /// testable without a remote endpoint.
    fn apply_redeem_check(&self, current_live: f64, now_ms: i64) -> f64 {
        let mut redeem = self.redeem.lock();
        if !redeem.active {
            self.balance.store(current_live);
            self.live_balance.store(current_live);
            return current_live;
        }

        let elapsed = now_ms - redeem.start_ms;
        if current_live >= redeem.expected_target {
            redeem.active = false;
            info!(
                balance = format!("{current_live:.2}"),
                secs = elapsed / 1000,
                "Redeem arrival detected"
            );
        } else if elapsed > REDEEM_TIMEOUT_MS {
            redeem.active = false;
            warn!(
                balance = format!("{current_live:.2}"),
                "Redeem polling timed out (3 min)"
            );
        } else {
            debug!(
                balance = format!("{current_live:.2}"),
                target = format!("{:.2}", redeem.expected_target),
                "Redeem still pending"
            );
        }

        self.balance.store(current_live);
        self.live_balance.store(current_live);
        current_live
    }
}

/// Win payout: one dollar per conditional token. Legacy rows without an
/// actual size fall back to the odds-implied payout.
fn win_payout(actual_size: f64, bet_amount: f64, odds: f64) -> f64 {
    if actual_size > 0.0 {
        actual_size
    } else if odds > 0.0 {
        bet_amount / odds
    } else {
        0.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sniper_core::PolymarketConfig;
    use std::time::Duration;

    fn manager(dry_run: bool) -> BalanceManager {
        let client = Arc::new(
            OrderClient::new(&PolymarketConfig::default(), dry_run, Duration::from_secs(2))
                .unwrap(),
        );
        BalanceManager::new(dry_run, 50.0, client)
    }

    #[test]
    fn deduct_credit_refund_arithmetic() {
        let mgr = manager(true);
        mgr.balance.store(50.0);

        assert!((mgr.deduct(2.5) - 47.5).abs() < 1e-9);
        assert!((mgr.credit(5.4) - 52.9).abs() < 1e-9);
        assert!((mgr.refund(2.5) - 55.4).abs() < 1e-9);
    }

    #[test]
    fn deduct_never_overdraws() {
        let mgr = manager(true);
        mgr.balance.store(1.0);
        assert!((mgr.deduct(10.0) - 0.0).abs() < f64::EPSILON);
        assert!(mgr.balance() >= 0.0);
    }

    #[test]
    fn win_payout_standardizes_on_actual_size() {
        assert!((win_payout(21.73, 10.0, 0.45) - 21.73).abs() < 1e-9);
        // Legacy row without a size falls back to odds-implied payout.
        assert!((win_payout(0.0, 9.0, 0.45) - 20.0).abs() < 1e-9);
        assert!((win_payout(0.0, 9.0, 0.0) - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn dry_run_verified_balance_is_working_balance() {
        let mgr = manager(true);
        mgr.balance.store(42.0);
        assert!((mgr.get_verified_balance().await - 42.0).abs() < 1e-9);
    }

    #[test]
    fn redeem_polling_completes_when_target_reached() {
        let mgr = manager(true);
        {
            let mut redeem = mgr.redeem.lock();
            redeem.active = true;
            redeem.start_ms = 1_000_000;
            redeem.expected_target = 60.0;
        }

        // Below target, within the window: still pending.
        let v = mgr.apply_redeem_check(55.0, 1_030_000);
        assert!((v - 55.0).abs() < 1e-9);
        assert!(mgr.is_redeem_pending());

        // Target reached: polling ends.
        let v = mgr.apply_redeem_check(61.0, 1_060_000);
        assert!((v - 61.0).abs() < 1e-9);
        assert!(!mgr.is_redeem_pending());
    }

    #[test]
    fn redeem_polling_times_out_after_three_minutes() {
        let mgr = manager(true);
        {
            let mut redeem = mgr.redeem.lock();
            redeem.active = true;
            redeem.start_ms = 1_000_000;
            redeem.expected_target = 60.0;
        }

        let v = mgr.apply_redeem_check(55.0, 1_000_000 + REDEEM_TIMEOUT_MS + 1);
        assert!((v - 55.0).abs() < 1e-9);
        assert!(!mgr.is_redeem_pending());
    }
}
