//! Settlement reconciliation for pending trades.
//!
//! Every 5 s each PENDING trade whose candle has closed is checked against
//! the market's own resolution: real money settles on the market's oracle,
//! not on our feed. Resolution sources, in order:
//!
//! 1. `/markets/<conditionId>`, then the event-by-slug fallback, reading
//!    `tokens[].winner` (with a `outcomePrices ≥ 0.99` fallback parse);
//! 2. balance delta (live only): a jump past half the expected payout can
//!    only be the win arriving (the converse proves nothing);
//! 3. a 20-minute timeout cancels the trade and refunds the stake.
//!
//! Wins credit `actual_size × $1`, hand the condition to the redemption
//! worker, and start redeem polling on the balance manager. The
//! PENDING → terminal transition is guarded in SQL, so a second pass over
//! the same trade is a no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use sniper_data::{TradeAction, TradeRecord, TradeRepository, TradeResult};

use crate::gamma::{GammaClient, WINDOW_SECS};
use crate::models::GammaMarket;

use super::balance::BalanceManager;
use super::klines::KlinesClient;
use super::price_feed::PriceFeedHandle;
use super::redeem::RedeemWorker;

/// Unresolvable trades cancel after this many minutes past candle close.
const SETTLEMENT_TIMEOUT_MIN: i64 = 20;

/// Balance-delta WIN inference needs at least this fraction of the payout.
const BALANCE_DELTA_FRACTION: f64 = 0.5;

/// An `outcomePrices` entry at or above this is a settled winner.
const SETTLED_PRICE: f64 = 0.99;

/// Market resolution extracted from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    YesWon,
    NoWon,
}

/// The settlement reconciler task.
pub struct Reconciler {
    repo: TradeRepository,
    gamma: GammaClient,
    balance: Arc<BalanceManager>,
    price_feed: PriceFeedHandle,
    klines: KlinesClient,
    redeem: RedeemWorker,
}

impl Reconciler {
    /// Wires the reconciler to its collaborators.
    #[must_use]
    pub fn new(
        repo: TradeRepository,
        gamma: GammaClient,
        balance: Arc<BalanceManager>,
        price_feed: PriceFeedHandle,
        klines: KlinesClient,
        redeem: RedeemWorker,
    ) -> Self {
        Self {
            repo,
            gamma,
            balance,
            price_feed,
            klines,
            redeem,
        }
    }

    /// One reconciliation sweep, oldest trade first.
    pub async fn sweep(&self) {
        let pending = match self.repo.find_pending().await {
            Ok(trades) => trades,
            Err(e) => {
                debug!(error = %e, "Pending query failed");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let now = Utc::now();
        for trade in &pending {
            if trade.action() == Some(TradeAction::Hold) {
                continue;
            }
            self.reconcile_one(trade, now).await;
        }
    }

    async fn reconcile_one(&self, trade: &TradeRecord, now: DateTime<Utc>) {
        let window_epoch = GammaClient::window_start_epoch(trade.created_at);
        let close_epoch = window_epoch + WINDOW_SECS;
        let close_time = DateTime::<Utc>::from_timestamp(close_epoch, 0).unwrap_or(now);

        if now < close_time {
            return;
        }
        let mins_since_close = (now - close_time).num_minutes();

        // Primary: the market's own resolution.
        if let Some(resolution) = self.query_resolution(trade, window_epoch).await {
            let bet_on_yes = trade.action() == Some(TradeAction::BuyYes);
            let won = decide_win(bet_on_yes, resolution);
            let exit_price = self.resolve_exit_price(close_epoch, mins_since_close).await;
            self.apply_result(trade, won, exit_price, "POLYMARKET").await;
            return;
        }

        // Secondary: on-chain balance delta. Live only, WIN inference only;
        // an unchanged balance is ambiguous.
        if self.balance_delta_win(trade) {
            let exit_price = self.resolve_exit_price(close_epoch, mins_since_close).await;
            self.apply_result(trade, true, exit_price, "BALANCE_DELTA").await;
            return;
        }

        // Timeout: refund and cancel.
        if mins_since_close >= SETTLEMENT_TIMEOUT_MIN {
            warn!(
                trade_id = trade.id,
                mins = mins_since_close,
                "Settlement unresolvable, cancelling with refund"
            );
            let exit_price = self.resolve_exit_price(close_epoch, mins_since_close).await;
            let balance_after = self.balance.refund(trade.bet_amount);
            let _ = self
                .repo
                .apply_result(trade.id, TradeResult::Cancelled, exit_price, 0.0, balance_after, Utc::now())
                .await;
            return;
        }

        if mins_since_close >= 2 && mins_since_close % 2 == 0 {
            debug!(trade_id = trade.id, mins = mins_since_close, "Awaiting settlement");
        }
    }

    /// Primary resolution: market by condition id, then by rebuilt slug.
    async fn query_resolution(&self, trade: &TradeRecord, window_epoch: i64) -> Option<Resolution> {
        if !trade.market_id.is_empty() && trade.market_id != "unknown" {
            if let Ok(market) = self.gamma.market_by_condition(&trade.market_id).await {
                if let Some(resolution) = resolution_from_market(&market) {
                    return Some(resolution);
                }
            }
        }

        let slug = GammaClient::slug_for_epoch(window_epoch);
        match self.gamma.market_by_slug(&slug).await {
            Ok(market) => resolution_from_market(&market),
            Err(e) => {
                debug!(trade_id = trade.id, error = %e, "Resolution lookup failed");
                None
            }
        }
    }

    /// WIN inference from a live balance jump past half the payout.
    fn balance_delta_win(&self, trade: &TradeRecord) -> bool {
        if !self.balance.is_live_mode() || trade.balance_at_bet <= 0.0 {
            return false;
        }
        let expected_payout = if trade.actual_size > 0.0 {
            trade.actual_size
        } else {
            return false;
        };
        let delta = self.balance.live_balance() - trade.balance_at_bet;
        delta > expected_payout * BALANCE_DELTA_FRACTION
    }

    async fn apply_result(&self, trade: &TradeRecord, won: bool, exit_price: f64, source: &str) {
        let resolved_at = Utc::now();

        if won {
            // One dollar per conditional token.
            let payout = if trade.actual_size > 0.0 {
                trade.actual_size
            } else if trade.odds > 0.0 {
                trade.bet_amount / trade.odds
            } else {
                0.0
            };
            let pnl = payout - trade.bet_amount;
            let balance_after = self.balance.credit(payout);

            let applied = self
                .repo
                .apply_result(trade.id, TradeResult::Win, exit_price, pnl, balance_after, resolved_at)
                .await
                .unwrap_or(false);

            if applied {
                info!(
                    trade_id = trade.id,
                    source,
                    action = %trade.action,
                    pnl = format!("+{pnl:.2}"),
                    balance = format!("{balance_after:.2}"),
                    "WIN"
                );
                self.redeem.enqueue(&trade.market_id, false);
                self.balance.start_redeem_polling(payout).await;
            }
        } else {
            let pnl = -trade.bet_amount;
            let balance_after = self.balance.balance();
            let applied = self
                .repo
                .apply_result(trade.id, TradeResult::Lose, exit_price, pnl, balance_after, resolved_at)
                .await
                .unwrap_or(false);

            if applied {
                info!(
                    trade_id = trade.id,
                    source,
                    action = %trade.action,
                    pnl = format!("{pnl:.2}"),
                    "LOSE"
                );
            }
        }
    }

    /// Display-only exit price: oracle close snapshot, then the exchange
    /// kline, then the live price. Never used to decide the outcome.
    async fn resolve_exit_price(&self, close_epoch: i64, mins_since_close: i64) -> f64 {
        if let Some(close) = self.price_feed.close_at(close_epoch) {
            if close > 0.0 {
                return close;
            }
        }

        if mins_since_close >= 2 {
            let window_start_ms = (close_epoch - WINDOW_SECS) * 1000;
            if let Some(kline) = self.klines.fetch_5m(window_start_ms).await {
                if kline.close > 0.0 {
                    return kline.close;
                }
            }
        }

        if mins_since_close >= 5 {
            return self.price_feed.price();
        }

        0.0
    }
}

/// Extracts the resolved outcome from a catalog market.
///
/// `closed` with an explicit `winner` token is authoritative; failing
/// that, an outcome priced at ≥ 0.99 is treated as settled. "Yes" and
/// "Up" both map to the YES side.
fn resolution_from_market(market: &GammaMarket) -> Option<Resolution> {
    if !market.closed {
        return None;
    }

    if let Some(outcome) = market.winning_outcome() {
        return Some(outcome_to_resolution(outcome));
    }

    // Fallback: two-element outcomePrices with a settled side.
    if let Some((up_price, down_price)) = market.parse_outcome_prices() {
        if up_price >= SETTLED_PRICE {
            return Some(Resolution::YesWon);
        }
        if down_price >= SETTLED_PRICE {
            return Some(Resolution::NoWon);
        }
    }

    None
}

/// `won = bet_on_yes == (resolution == YesWon)`: equality of sides.
fn decide_win(bet_on_yes: bool, resolution: Resolution) -> bool {
    bet_on_yes == (resolution == Resolution::YesWon)
}

fn outcome_to_resolution(outcome: &str) -> Resolution {
    if outcome.eq_ignore_ascii_case("yes") || outcome.eq_ignore_ascii_case("up") {
        Resolution::YesWon
    } else {
        Resolution::NoWon
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn market(closed: bool, tokens: &str, prices: Option<&str>) -> GammaMarket {
        let prices_field = prices
            .map(|p| format!(r#""outcomePrices": "{p}","#))
            .unwrap_or_default();
        serde_json::from_str(&format!(
            r#"{{
                "conditionId": "0xc0ffee",
                {prices_field}
                "closed": {closed},
                "tokens": {tokens}
            }}"#
        ))
        .unwrap()
    }

    // -------------------------------------------------------------------------
    // Resolution parsing
    // -------------------------------------------------------------------------

    #[test]
    fn open_market_has_no_resolution() {
        let m = market(false, r#"[{"outcome": "Up", "winner": true}]"#, None);
        assert_eq!(resolution_from_market(&m), None);
    }

    #[test]
    fn winner_token_resolves() {
        let m = market(
            true,
            r#"[{"outcome": "Up", "winner": true}, {"outcome": "Down", "winner": false}]"#,
            None,
        );
        assert_eq!(resolution_from_market(&m), Some(Resolution::YesWon));

        let m = market(
            true,
            r#"[{"outcome": "Up", "winner": false}, {"outcome": "Down", "winner": true}]"#,
            None,
        );
        assert_eq!(resolution_from_market(&m), Some(Resolution::NoWon));
    }

    #[test]
    fn yes_outcome_maps_to_yes_side() {
        let m = market(true, r#"[{"outcome": "Yes", "winner": true}]"#, None);
        assert_eq!(resolution_from_market(&m), Some(Resolution::YesWon));
    }

    #[test]
    fn outcome_prices_fallback_requires_settled_price() {
        let m = market(true, "[]", Some(r#"[\"0.995\", \"0.005\"]"#));
        assert_eq!(resolution_from_market(&m), Some(Resolution::YesWon));

        let m = market(true, "[]", Some(r#"[\"0.01\", \"0.99\"]"#));
        assert_eq!(resolution_from_market(&m), Some(Resolution::NoWon));

        // Mid prices prove nothing.
        let m = market(true, "[]", Some(r#"[\"0.55\", \"0.45\"]"#));
        assert_eq!(resolution_from_market(&m), None);
    }

    #[test]
    fn closed_without_winner_or_prices_stays_unresolved() {
        let m = market(true, r#"[{"outcome": "Up", "winner": null}]"#, None);
        assert_eq!(resolution_from_market(&m), None);
    }

    // -------------------------------------------------------------------------
    // Outcome → win mapping
    // -------------------------------------------------------------------------

    #[test]
    fn buy_yes_wins_only_on_yes_resolution() {
        assert!(decide_win(true, Resolution::YesWon));
        assert!(!decide_win(true, Resolution::NoWon));
    }

    #[test]
    fn buy_no_wins_only_on_no_resolution() {
        assert!(decide_win(false, Resolution::NoWon));
        assert!(!decide_win(false, Resolution::YesWon));
    }
}
