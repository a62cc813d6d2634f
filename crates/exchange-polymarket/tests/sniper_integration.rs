//! End-to-end checks over the scan pipeline's pure parts: a synthetic tick
//! stream through the price feed, the filter stack, the EV decision, and
//! the dry-run order path.

use std::sync::Arc;
use std::time::Duration;

use sniper_core::PolymarketConfig;
use sniper_polymarket::gamma::GammaClient;
use sniper_polymarket::sniper::cusum::CusumDetector;
use sniper_polymarket::sniper::ev::{Direction, EvCalculator, EvConfig};
use sniper_polymarket::sniper::filters::{
    candle_position, time_bonus, CrossCounter, MomentumRing, RangeTracker,
};
use sniper_polymarket::sniper::order_client::Side;
use sniper_polymarket::sniper::price_feed::PriceFeedHandle;
use sniper_polymarket::sniper::regime::{dynamic_min_move, VolRegime};
use sniper_polymarket::sniper::OrderClient;

/// A steady uptrending candle drives every filter green and the EV
/// calculator to an UP decision sized within the configured bounds.
#[test]
fn trending_candle_passes_the_filter_stack() {
    let open = 100_000.0;
    let mut momentum = MomentumRing::default();
    let mut crosses = CrossCounter::default();
    let mut range = RangeTracker::default();
    let mut cusum = CusumDetector::new();

    // 20 ticks drifting up 6 bps each: a clean directional candle.
    let mut price = open;
    for _ in 0..20 {
        price *= 1.000_06;
        let diff_pct = (price - open) / open * 100.0;
        momentum.push(diff_pct);
        crosses.push(diff_pct);
        range.push(price);
        cusum.update(price, CusumDetector::threshold(0.07, true, 0.40));
    }

    let price_diff_pct = (price - open) / open * 100.0;
    assert!(price_diff_pct > 0.10);

    // Filters.
    assert!(momentum.consistency() >= 0.40, "momentum gate");
    assert!(crosses.count() < 5, "chop gate");
    assert!(cusum.triggered(), "cusum gate");
    assert!(!cusum.stalled());

    let thresholds = VolRegime::Normal.thresholds();
    let min_move = dynamic_min_move(0.07, true, &thresholds);
    assert!(price_diff_pct.abs() >= min_move, "entry threshold");
    assert!(range.range_pct() >= 0.07 * thresholds.range_mult, "range gate");

    // Decision at 2 minutes into the candle with a 45¢ up ask.
    let ev = EvCalculator::new(EvConfig::default());
    let result = ev.calc_forward(
        price_diff_pct,
        0.45,
        0.58,
        0.02,
        momentum.consistency(),
        time_bonus(120),
        50.0,
    );

    assert_eq!(result.direction, Direction::Up);
    assert!(result.ev > 0.05);
    assert!(result.gap > 0.03);
    assert!(result.bet_amount >= 1.0 && result.bet_amount <= 10.0);
}

/// A choppy candle is rejected before any odds are even considered.
#[test]
fn choppy_candle_is_rejected() {
    let open = 100_000.0;
    let mut crosses = CrossCounter::default();
    let mut cusum = CusumDetector::new();

    for i in 0..20 {
        let price = if i % 2 == 0 { open + 8.0 } else { open - 8.0 };
        let diff_pct = (price - open) / open * 100.0;
        crosses.push(diff_pct);
        cusum.update(price, CusumDetector::threshold(0.07, true, 0.40));
    }

    assert!(crosses.count() >= 5, "chop must trip the cross counter");
    assert!(cusum.stalled(), "oscillation must not arm CUSUM");
}

/// Tick-replay through the price feed reproduces candle state and feeds the
/// same inputs the scanner would see.
#[test]
fn price_feed_replay_supports_the_scan_inputs() {
    let handle = PriceFeedHandle::new();
    let base = 1_750_000_200i64; // % 300 == 0

    // Five candles of widening ranges to build ATR.
    for candle in 0..5i64 {
        let start = base + candle * 300;
        for step in 0..10i64 {
            let wobble = (step % 3) as f64 * 12.0;
            let price = 100_000.0 + candle as f64 * 40.0 + step as f64 * 8.0 + wobble;
            handle.apply_tick(start + step * 30, price);
        }
    }

    assert!(handle.is_warmed_up());
    assert!(handle.atr_ready());
    assert!(handle.atr_pct() > 0.0);
    assert_eq!(handle.candle_boundary(), base + 4 * 300);
    assert!(handle.candle_open() > 0.0);

    // Every completed candle left a close snapshot.
    for candle in 1..5i64 {
        assert!(handle.close_at(base + candle * 300).is_some());
    }
}

/// Dry-run order flow: FOK slippage, sizing, and the synthetic match.
#[tokio::test]
async fn dry_run_order_round_trip() {
    let client = Arc::new(
        OrderClient::new(&PolymarketConfig::default(), true, Duration::from_secs(2)).unwrap(),
    );
    client.prepare_token_ids("111222333", "444555666");

    let result = client
        .place_order("111222333", 5.0, 0.45, Side::Buy, 0)
        .await;

    assert!(result.is_matched());
    assert_eq!(result.status, "MATCHED");
    // One tick of slippage: limit 46¢; 5/0.46 floored to 10.86 tokens.
    assert!((result.actual_size - 10.86).abs() < 1e-9);
    assert!((result.actual_amount - 10.86 * 0.46).abs() < 1e-9);
}

/// The FOK ceiling arithmetic the scanner enforces: base 54¢ walks
/// 55/57/59 and the fourth attempt would cross 60¢.
#[test]
fn fok_escalation_crosses_the_ceiling_on_the_fourth_attempt() {
    let base = 0.54;
    let limits: Vec<f64> = (0..=3)
        .map(|retry| OrderClient::slipped_price(base, Side::Buy, retry))
        .collect();
    assert_eq!(limits, vec![0.55, 0.57, 0.59, 0.61]);
    assert!(limits[..3].iter().all(|&l| l <= 0.60));
    assert!(limits[3] > 0.60);
}

/// Candle phase edges and the slug boundary, together: at the window edge
/// the slug flips and the phase gates close the book.
#[test]
fn window_edges_line_up() {
    use chrono::TimeZone;

    let boundary = chrono::Utc.timestamp_opt(1_750_000_500, 0).unwrap();
    let before = boundary - chrono::Duration::seconds(1);

    assert_ne!(
        GammaClient::slug_for_time(before),
        GammaClient::slug_for_time(boundary)
    );

    // 299 s into a candle: close-of-book guard. 0 s: oracle-sync window.
    assert_eq!(candle_position(299), -1);
    assert_eq!(candle_position(0), 0);
    assert_eq!(candle_position(120), 2);
}
