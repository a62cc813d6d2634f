//! The periodic scan loop: filter cascade, EV decision, order execution.
//!
//! One pass every ~100 ms. The cascade short-circuits at the first failing
//! filter and records its label; labels are dashboard vocabulary and are
//! never parsed.
//!
//! Strictly one trade per candle window. The window burns on order
//! acceptance and on FOK exhaustion, so a window that ate the retry budget
//! is never re-entered.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use sniper_data::{NewTrade, TradeAction, TradeRepository, TradeResult};

use super::atomic::AtomicF64;
use super::balance::BalanceManager;
use super::circuit_breaker::CircuitBreaker;
use super::cusum::CusumDetector;
use super::ev::{Direction, EvCalculator, EvResult};
use super::filters::{
    candle_elapsed_secs, candle_position, early_entry_allowed, time_bonus, CrossCounter,
    MomentumRing, RangeTracker, VelocityTracker,
};
use super::odds_feed::OddsHandle;
use super::order_client::{OrderClient, Side};
use super::price_feed::PriceFeedHandle;
use super::regime::dynamic_min_move;
use crate::gamma::GammaClient;
use crate::models::MarketOdds;

/// Ask spread above this means the book is too wide.
const MAX_SPREAD: f64 = 1.05;

/// Never pay more than this per token; above it the market has already
/// priced the move in.
const ODDS_CEILING: f64 = 0.60;

/// Scanner stands down under this balance.
const MIN_BALANCE: f64 = 1.0;

/// Base EV gap requirement before win-rate/regime adjustment.
const BASE_GAP: f64 = 0.03;

/// Open crosses within one candle that mark chop.
const MAX_CROSSES: u32 = 5;

/// FOK retry budget (attempts = budget + 1).
const FOK_RETRY_BUDGET: u32 = 3;

/// Pause between FOK attempts.
const FOK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Circuit-breaker inspection cadence (ms).
const BREAKER_CHECK_MS: i64 = 30_000;

/// Win-rate cache refresh cadence (ms).
const WIN_RATE_REFRESH_MS: i64 = 30_000;

// =============================================================================
// Metrics
// =============================================================================

/// Volatile scan metrics, read by the dashboard surface.
#[derive(Debug, Default)]
pub struct ScanMetrics {
    total_scans: AtomicU64,
    scans_per_sec: AtomicU64,
    epoch_second: AtomicI64,
    scans_in_epoch: AtomicU64,
    last_scan_us: AtomicU64,
    last_filter: RwLock<String>,
    atr_pct: AtomicF64,
    dynamic_min_move: AtomicF64,
    regime: RwLock<String>,
    cusum_pos: AtomicF64,
    cusum_neg: AtomicF64,
    cusum_triggered: AtomicBool,
    cusum_threshold: AtomicF64,
}

/// Point-in-time copy for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_scans: u64,
    pub scans_per_sec: u64,
    pub last_scan_duration_us: u64,
    pub last_filter: String,
    pub atr_pct: f64,
    pub dynamic_min_move: f64,
    pub regime: String,
    pub cusum_pos: f64,
    pub cusum_neg: f64,
    pub cusum_triggered: bool,
    pub cusum_threshold: f64,
}

impl ScanMetrics {
    fn record_scan(&self, now_ms: i64) {
        self.total_scans.fetch_add(1, Ordering::Relaxed);

        // Rolling one-second epoch for scans/sec.
        let second = now_ms / 1000;
        let epoch = self.epoch_second.load(Ordering::Relaxed);
        if second != epoch
            && self
                .epoch_second
                .compare_exchange(epoch, second, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            let count = self.scans_in_epoch.swap(0, Ordering::Relaxed);
            self.scans_per_sec.store(count, Ordering::Relaxed);
        }
        self.scans_in_epoch.fetch_add(1, Ordering::Relaxed);
    }

    fn record_filter(&self, label: &str) {
        *self.last_filter.write() = label.to_string();
    }

    /// Snapshot for the dashboard.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_scans: self.total_scans.load(Ordering::Relaxed),
            scans_per_sec: self.scans_per_sec.load(Ordering::Relaxed),
            last_scan_duration_us: self.last_scan_us.load(Ordering::Relaxed),
            last_filter: self.last_filter.read().clone(),
            atr_pct: self.atr_pct.load(),
            dynamic_min_move: self.dynamic_min_move.load(),
            regime: self.regime.read().clone(),
            cusum_pos: self.cusum_pos.load(),
            cusum_neg: self.cusum_neg.load(),
            cusum_triggered: self.cusum_triggered.load(Ordering::Relaxed),
            cusum_threshold: self.cusum_threshold.load(),
        }
    }
}

// =============================================================================
// Pure gate helpers
// =============================================================================

/// Spread and odds-ceiling gates; returns the bet-side target ask.
fn odds_gate(odds: &MarketOdds, is_up: bool) -> Result<f64, &'static str> {
    if odds.spread() > MAX_SPREAD {
        return Err("스프레드");
    }
    let target = if is_up { odds.up_odds } else { odds.down_odds };
    if target > ODDS_CEILING {
        return Err("오즈상한");
    }
    Ok(target)
}

/// Win-rate adjustment on the base gap: hot streaks loosen, cold streaks
/// tighten.
fn win_rate_adjustment(win_rate: f64) -> f64 {
    if win_rate >= 0.65 {
        -0.01
    } else if win_rate >= 0.55 {
        0.0
    } else if win_rate >= 0.45 {
        0.02
    } else {
        0.04
    }
}

/// Momentum consistency aligned with the signed move.
fn directed_momentum(consistency: f64, price_diff_pct: f64) -> f64 {
    if price_diff_pct >= 0.0 {
        consistency
    } else {
        -consistency
    }
}

// =============================================================================
// Scanner
// =============================================================================

/// Per-candle mutable filter state; lives on the scan task only.
struct ScanState {
    last_traded_window: i64,
    last_reset_window: i64,
    momentum: MomentumRing,
    crosses: CrossCounter,
    range: RangeTracker,
    velocity: VelocityTracker,
    cusum: CusumDetector,
    win_rate: f64,
    win_rate_refreshed_ms: i64,
    breaker_checked_ms: i64,
}

impl ScanState {
    fn new() -> Self {
        Self {
            last_traded_window: 0,
            last_reset_window: 0,
            momentum: MomentumRing::default(),
            crosses: CrossCounter::default(),
            range: RangeTracker::default(),
            velocity: VelocityTracker::default(),
            cusum: CusumDetector::new(),
            win_rate: 0.50,
            win_rate_refreshed_ms: 0,
            breaker_checked_ms: 0,
        }
    }

    fn reset_candle_filters(&mut self, window: i64) {
        self.last_reset_window = window;
        self.momentum.reset();
        self.crosses.reset();
        self.range.reset();
        self.cusum.reset();
    }
}

/// The scan orchestrator.
pub struct Scanner {
    price_feed: PriceFeedHandle,
    odds: OddsHandle,
    balance: Arc<BalanceManager>,
    order_client: Arc<OrderClient>,
    repo: TradeRepository,
    ev: EvCalculator,
    breaker: CircuitBreaker,
    metrics: Arc<ScanMetrics>,
    enabled: Arc<AtomicBool>,
    state: ScanState,
}

impl Scanner {
    /// Wires the scanner to its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        price_feed: PriceFeedHandle,
        odds: OddsHandle,
        balance: Arc<BalanceManager>,
        order_client: Arc<OrderClient>,
        repo: TradeRepository,
        ev: EvCalculator,
        breaker: CircuitBreaker,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            price_feed,
            odds,
            balance,
            order_client,
            repo,
            ev,
            breaker,
            metrics: Arc::new(ScanMetrics::default()),
            enabled,
            state: ScanState::new(),
        }
    }

    /// Shared metrics handle for the dashboard surface.
    #[must_use]
    pub fn metrics(&self) -> Arc<ScanMetrics> {
        Arc::clone(&self.metrics)
    }

    /// One scan pass.
    pub async fn tick(&mut self) {
        let started = std::time::Instant::now();
        let now = chrono::Utc::now();
        let now_ms = now.timestamp_millis();
        self.metrics.record_scan(now_ms);

        if let Some(label) = self.run_cascade(now, now_ms).await {
            self.metrics.record_filter(label);
        }

        self.metrics
            .last_scan_us
            .store(started.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    /// The filter cascade; returns the first failing filter's label, or
    /// `None` when a trade fired.
    async fn run_cascade(
        &mut self,
        now: chrono::DateTime<chrono::Utc>,
        now_ms: i64,
    ) -> Option<&'static str> {
        // 1. Master switch.
        if !self.enabled.load(Ordering::Acquire) {
            return Some("스위치");
        }

        // 2. Feed health.
        if !self.price_feed.is_connected() {
            return Some("연결");
        }
        if !self.price_feed.is_warmed_up() {
            return Some("워밍업");
        }

        let price = self.price_feed.price();
        let open = self.price_feed.candle_open();
        if price <= 0.0 || open <= 0.0 {
            return Some("가격");
        }

        // 3. Candle rollover resets the per-candle filters.
        let window = GammaClient::window_start_epoch(now);
        if window != self.state.last_reset_window {
            self.state.reset_candle_filters(window);
        }

        // 4. Circuit breaker (inspected every 30 s).
        if now_ms - self.state.breaker_checked_ms > BREAKER_CHECK_MS {
            self.state.breaker_checked_ms = now_ms;
            self.inspect_breaker(now_ms).await;
        }
        if self.breaker.can_trade(now_ms).is_err() {
            return Some("서킷");
        }

        // 5. One trade per window.
        if window == self.state.last_traded_window {
            return Some("쿨다운");
        }

        // 6-10. Move, velocity, momentum, chop, range trackers.
        let price_diff_pct = (price - open) / open * 100.0;
        let velocity = self.state.velocity.update(price, now_ms);
        self.state.momentum.push(price_diff_pct);
        self.state.crosses.push(price_diff_pct);
        self.state.range.push(price);

        if self.state.crosses.count() >= MAX_CROSSES {
            return Some("횡보");
        }

        // 11. CUSUM drift confirmation.
        let atr_pct = self.price_feed.atr_pct();
        let atr_ready = self.price_feed.atr_ready();
        let regime = self.price_feed.regime();
        let thresholds = regime.thresholds();

        let cusum_threshold = CusumDetector::threshold(atr_pct, atr_ready, thresholds.cusum_mult);
        self.state.cusum.update(price, cusum_threshold);
        self.publish_regime_metrics(atr_pct, atr_ready, regime.label(), cusum_threshold, &thresholds);
        if self.state.cusum.stalled() {
            return Some("CUSUM");
        }

        // 12-13. Regime-scaled entry threshold.
        let min_move = dynamic_min_move(atr_pct, atr_ready, &thresholds);
        if price_diff_pct.abs() < min_move {
            return Some("변동부족");
        }

        // Range gate: a pinched 60-tick range means a trapped price.
        let range_pct = self.state.range.range_pct();
        let min_range = if atr_ready {
            atr_pct * thresholds.range_mult
        } else {
            min_move * 0.8
        };
        if range_pct > 0.0 && range_pct < min_range {
            return Some("레인지");
        }

        // 14. Candle phase.
        let elapsed = candle_elapsed_secs(now);
        let position = candle_position(elapsed);
        if position == 0 || position == -1 {
            return Some("캔들");
        }

        // Odds are needed from here on; cache read only.
        let Some(odds) = self.odds.get_odds() else {
            return Some("오즈");
        };
        let is_up = price_diff_pct > 0.0;

        // 16 (spread + ceiling); also feeds the early-entry tier check.
        let target_odds = match odds_gate(&odds, is_up) {
            Ok(t) => t,
            Err(label) => return Some(label),
        };

        // 15. Early-entry tiers inside the first 40 seconds.
        if elapsed < 40 && !early_entry_allowed(elapsed, price_diff_pct.abs(), target_odds) {
            return Some("조기진입");
        }

        // 17. Throttled verified balance.
        let balance = self.balance.get_verified_balance().await;
        if balance < MIN_BALANCE {
            return Some("잔액");
        }

        // 18. Momentum gate.
        let consistency = self.state.momentum.consistency();
        if consistency.abs() < thresholds.momentum_min {
            return Some("모멘텀");
        }
        if (price_diff_pct > 0.0) != (consistency > 0.0) {
            return Some("모멘텀");
        }

        // 19-20. EV decision under the adaptive gap.
        self.refresh_win_rate(now_ms).await;
        let bonus = time_bonus(elapsed);
        let momentum_score = directed_momentum(consistency, price_diff_pct);

        let result = self.ev.calc_forward(
            price_diff_pct,
            odds.up_odds,
            odds.down_odds,
            velocity,
            momentum_score,
            bonus,
            balance,
        );

        let adaptive_gap = BASE_GAP + win_rate_adjustment(self.state.win_rate) + thresholds.gap_adj;
        if result.direction == Direction::Hold {
            return Some("EV");
        }
        if result.gap < adaptive_gap {
            return Some("갭");
        }

        // 21. Fire.
        info!(
            direction = %result.direction,
            stake = format!("{:.2}", result.bet_amount),
            odds = format!("{:.0}¢", target_odds * 100.0),
            ev = format!("+{:.1}%", result.ev * 100.0),
            gap = format!("{:.1}%", result.gap * 100.0),
            momentum = format!("{:.0}%", consistency.abs() * 100.0),
            "Placing bet"
        );

        self.execute(&result, &odds, price, open, price_diff_pct, window, balance, now_ms)
            .await
    }

    fn publish_regime_metrics(
        &self,
        atr_pct: f64,
        atr_ready: bool,
        regime_label: &str,
        cusum_threshold: f64,
        thresholds: &super::regime::RegimeThresholds,
    ) {
        self.metrics.atr_pct.store(atr_pct);
        self.metrics
            .dynamic_min_move
            .store(dynamic_min_move(atr_pct, atr_ready, thresholds));
        *self.metrics.regime.write() = regime_label.to_string();
        self.metrics.cusum_pos.store(self.state.cusum.s_pos());
        self.metrics.cusum_neg.store(self.state.cusum.s_neg());
        self.metrics
            .cusum_triggered
            .store(self.state.cusum.triggered(), Ordering::Relaxed);
        self.metrics.cusum_threshold.store(cusum_threshold);
    }

    async fn inspect_breaker(&mut self, now_ms: i64) {
        match self.repo.find_recent_resolved(10).await {
            Ok(trades) => {
                let results: Vec<(i64, bool)> = trades
                    .iter()
                    .map(|t| (t.id, t.result() == Some(TradeResult::Lose)))
                    .collect();
                if self.breaker.inspect(&results, now_ms) {
                    warn!("Circuit breaker armed: 3 consecutive losses, 5 minute halt");
                }
            }
            Err(e) => tracing::debug!(error = %e, "Breaker inspection query failed"),
        }
    }

    async fn refresh_win_rate(&mut self, now_ms: i64) {
        if now_ms - self.state.win_rate_refreshed_ms < WIN_RATE_REFRESH_MS {
            return;
        }
        self.state.win_rate_refreshed_ms = now_ms;
        if let Ok(recent) = self.repo.find_recent_resolved(50).await {
            if recent.len() >= 5 {
                let wins = recent
                    .iter()
                    .filter(|t| t.result() == Some(TradeResult::Win))
                    .count();
                self.state.win_rate = wins as f64 / recent.len() as f64;
            }
        }
    }

    /// FOK submission with in-call retry under slippage escalation.
    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &mut self,
        ev: &EvResult,
        odds: &MarketOdds,
        price: f64,
        open: f64,
        price_diff_pct: f64,
        window: i64,
        balance_at_bet: f64,
        scan_start_ms: i64,
    ) -> Option<&'static str> {
        let is_up = ev.direction == Direction::Up;
        let (token_id, target_odds) = if is_up {
            (odds.up_token_id.clone(), odds.up_odds)
        } else {
            (odds.down_token_id.clone(), odds.down_odds)
        };
        let action = if is_up { TradeAction::BuyYes } else { TradeAction::BuyNo };

        for retry in 0..=FOK_RETRY_BUDGET {
            let limit = OrderClient::slipped_price(target_odds, Side::Buy, retry);
            if limit > ODDS_CEILING {
                warn!(
                    limit = format!("{:.0}¢", limit * 100.0),
                    retry,
                    "FOK ceiling reached, burning candle window"
                );
                self.state.last_traded_window = window;
                return Some("FOK상한");
            }

            let order = self
                .order_client
                .place_order(&token_id, ev.bet_amount, target_odds, Side::Buy, retry)
                .await;

            if order.is_matched() {
                let scan_ms = chrono::Utc::now().timestamp_millis() - scan_start_ms;
                self.state.last_traded_window = window;
                let balance_after = self.balance.deduct(order.actual_amount);

                let trade = NewTrade {
                    coin: "BTC".to_string(),
                    timeframe: "5M".to_string(),
                    action,
                    result: TradeResult::Pending,
                    bet_amount: order.actual_amount,
                    odds: target_odds,
                    entry_price: price,
                    open_price: open,
                    estimated_prob: ev.estimated_prob,
                    ev: ev.ev,
                    gap: ev.gap,
                    price_diff_pct,
                    balance_after,
                    market_id: odds.condition_id.clone(),
                    reason: ev.reason.clone(),
                    detail: format!(
                        "orderId={} | scanMs={} | oddsFetchMs={} | momentum={:.2}",
                        order.order_id.as_deref().unwrap_or("unknown"),
                        scan_ms,
                        odds.fetch_duration_ms,
                        self.state.momentum.consistency(),
                    ),
                    strategy: ev.strategy.clone(),
                    scan_to_trade_ms: scan_ms,
                    order_status: order.status.clone(),
                    order_id: order.order_id.clone().unwrap_or_default(),
                    balance_at_bet,
                    token_id: token_id.clone(),
                    actual_size: order.actual_size,
                };

                // Synchronous persist: the reconciler must see this row.
                match self.repo.insert(&trade).await {
                    Ok(id) => info!(
                        trade_id = id,
                        action = %action,
                        amount = format!("{:.2}", order.actual_amount),
                        size = format!("{:.1}", order.actual_size),
                        limit = format!("{:.0}¢", target_odds * 100.0),
                        "Trade recorded"
                    ),
                    Err(e) => tracing::error!(error = %e, "Trade persist failed"),
                }

                // Live balance settles a couple seconds after the fill.
                let balance = Arc::clone(&self.balance);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    balance.sync_from_live().await;
                });

                return None;
            }

            // Failed attempt: keep a CANCELLED row for observability.
            let fail = NewTrade {
                coin: "BTC".to_string(),
                timeframe: "5M".to_string(),
                action,
                result: TradeResult::Cancelled,
                bet_amount: ev.bet_amount,
                odds: limit,
                entry_price: price,
                open_price: open,
                estimated_prob: ev.estimated_prob,
                ev: ev.ev,
                gap: ev.gap,
                price_diff_pct,
                balance_after: self.balance.balance(),
                market_id: odds.condition_id.clone(),
                reason: format!("FOK 미체결 #{retry}"),
                detail: order.error.clone().unwrap_or_default(),
                strategy: "FOK_FAIL".to_string(),
                scan_to_trade_ms: 0,
                order_status: order.status.clone(),
                order_id: order.order_id.clone().unwrap_or_default(),
                balance_at_bet,
                token_id: token_id.clone(),
                actual_size: 0.0,
            };
            if let Err(e) = self.repo.insert(&fail).await {
                tracing::error!(error = %e, "FOK_FAIL persist failed");
            }
            warn!(retry, status = %order.status, "FOK not matched, escalating");

            tokio::time::sleep(FOK_RETRY_DELAY).await;
        }

        // Retry budget exhausted: burn the window to stop the loop.
        self.state.last_traded_window = window;
        Some("FOK상한")
    }
}

// =============================================================================
// Tests
// =============================================================================
