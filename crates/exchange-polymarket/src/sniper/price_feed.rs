//! Real-time BTC/USD oracle feed over the Polymarket RTDS WebSocket.
//!
//! Maintains the state the scanner reads every tick: latest price, a ring
//! of recent ticks, per-candle OHLC, close snapshots per 5-minute boundary,
//! an EMA-smoothed ATR(14) over completed candles, and the derived
//! volatility regime.
//!
//! A supervisor check runs every 10 s inside the read loop: if the socket
//! is silent for 30 s it is treated as a zombie and force-reconnected with
//! exponential backoff (5-60 s). Dropped or malformed frames are ignored;
//! speed over completeness.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::atomic::AtomicF64;
use super::regime::VolRegime;

/// Ticks kept in the ring (~10 minutes at oracle cadence).
const RING_CAPACITY: usize = 600;

/// Candle width in seconds.
const CANDLE_SECS: i64 = 300;

/// True ranges kept for ATR.
const ATR_PERIOD: usize = 14;

/// ATR is undefined until this many true ranges exist.
const ATR_MIN_SAMPLES: usize = 3;

/// Close snapshots older than this are evicted (seconds).
const CLOSE_RETENTION_SECS: i64 = 3600;

/// A price is "fresh" when younger than this (ms).
const FRESH_PRICE_MS: i64 = 10_000;

/// Silence longer than this marks the connection a zombie (ms).
const ZOMBIE_MS: i64 = 30_000;

/// Errors from the oracle feed.
#[derive(Debug, Error)]
pub enum PriceFeedError {
    /// WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection was closed by the peer.
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Configuration for the oracle feed.
#[derive(Debug, Clone)]
pub struct PriceFeedConfig {
    /// RTDS WebSocket URL.
    pub ws_url: String,
    /// Symbol to retain (lowercased comparison).
    pub symbol: String,
    /// Application-level ping cadence.
    pub ping_interval: Duration,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws-live-data.polymarket.com".to_string(),
            symbol: "btc/usd".to_string(),
            ping_interval: Duration::from_secs(20),
        }
    }
}

/// RTDS message envelope.
#[derive(Debug, Deserialize)]
struct RtdsMessage {
    #[serde(default)]
    topic: String,
    payload: Option<RtdsPayload>,
}

#[derive(Debug, Deserialize)]
struct RtdsPayload {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    value: f64,
    #[serde(default)]
    timestamp: i64,
}

// =============================================================================
// Shared state
// =============================================================================

/// Candle and ring state behind the mutex; everything scalar the scanner
/// polls is mirrored into atomics on the handle.
struct CandleTracker {
    ring: VecDeque<(i64, f64)>,
    last_boundary: i64,
    open: f64,
    high: f64,
    low: f64,
    prev_close: f64,
    true_ranges: VecDeque<f64>,
    close_snapshots: HashMap<i64, f64>,
}

impl CandleTracker {
    fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(RING_CAPACITY),
            last_boundary: 0,
            open: 0.0,
            high: 0.0,
            low: f64::MAX,
            prev_close: 0.0,
            true_ranges: VecDeque::with_capacity(ATR_PERIOD),
            close_snapshots: HashMap::new(),
        }
    }

    /// Tick nearest to `target` by absolute timestamp distance.
    fn closest_price(&self, target: i64) -> f64 {
        let mut best = 0.0;
        let mut best_diff = i64::MAX;
        for &(ts, price) in &self.ring {
            let diff = (ts - target).abs();
            if diff < best_diff {
                best_diff = diff;
                best = price;
            }
        }
        best
    }

    /// Latest tick strictly before `boundary`.
    fn latest_price_before(&self, boundary: i64) -> f64 {
        let mut best = 0.0;
        let mut best_ts = 0;
        for &(ts, price) in &self.ring {
            if ts < boundary && ts > best_ts {
                best_ts = ts;
                best = price;
            }
        }
        best
    }
}

struct FeedState {
    latest_price: AtomicF64,
    price_received_ms: AtomicI64,
    connected: AtomicBool,
    warmed_up: AtomicBool,
    atr_pct: AtomicF64,
    atr_raw: AtomicF64,
    atr_samples: AtomicI64,
    tracker: Mutex<CandleTracker>,
}

/// Cheap-to-clone read handle over the feed state.
#[derive(Clone)]
pub struct PriceFeedHandle {
    state: Arc<FeedState>,
}

impl PriceFeedHandle {
    /// Creates a handle with empty state (the feed task fills it).
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(FeedState {
                latest_price: AtomicF64::new(0.0),
                price_received_ms: AtomicI64::new(0),
                connected: AtomicBool::new(false),
                warmed_up: AtomicBool::new(false),
                atr_pct: AtomicF64::new(0.0),
                atr_raw: AtomicF64::new(0.0),
                atr_samples: AtomicI64::new(0),
                tracker: Mutex::new(CandleTracker::new()),
            }),
        }
    }

    /// Latest oracle price (0 before the first tick).
    #[must_use]
    pub fn price(&self) -> f64 {
        self.state.latest_price.load()
    }

    /// Milliseconds since the last tick was received.
    #[must_use]
    pub fn price_age_ms(&self) -> i64 {
        let received = self.state.price_received_ms.load(Ordering::Acquire);
        if received == 0 {
            return i64::MAX;
        }
        chrono::Utc::now().timestamp_millis() - received
    }

    /// Connected means: socket open AND a fresh price.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire) && self.price_age_ms() < FRESH_PRICE_MS
    }

    /// True once the first candle boundary has passed (open is trustworthy).
    #[must_use]
    pub fn is_warmed_up(&self) -> bool {
        self.state.warmed_up.load(Ordering::Acquire)
    }

    /// Current candle's open price.
    #[must_use]
    pub fn candle_open(&self) -> f64 {
        self.state.tracker.lock().open
    }

    /// Current candle's boundary (floor(epoch/300)*300), 0 before any tick.
    #[must_use]
    pub fn candle_boundary(&self) -> i64 {
        self.state.tracker.lock().last_boundary
    }

    /// Close snapshot recorded at a boundary, if retained.
    #[must_use]
    pub fn close_at(&self, boundary: i64) -> Option<f64> {
        self.state.tracker.lock().close_snapshots.get(&boundary).copied()
    }

    /// ATR(14) as a percentage of the last close.
    #[must_use]
    pub fn atr_pct(&self) -> f64 {
        self.state.atr_pct.load()
    }

    /// ATR(14) in dollars.
    #[must_use]
    pub fn atr_raw(&self) -> f64 {
        self.state.atr_raw.load()
    }

    /// ATR needs at least three completed true ranges.
    #[must_use]
    pub fn atr_ready(&self) -> bool {
        self.state.atr_samples.load(Ordering::Acquire) >= ATR_MIN_SAMPLES as i64
    }

    /// Volatility regime from ATR%; NORMAL until ATR is ready.
    #[must_use]
    pub fn regime(&self) -> VolRegime {
        if !self.atr_ready() {
            return VolRegime::Normal;
        }
        VolRegime::classify(self.atr_pct())
    }

    /// Ingests one oracle tick.
    ///
    /// `ts_sec` is the oracle timestamp in epoch seconds; receipt time is
    /// wall clock. Public so the feed task and tests share one entry point.
    pub fn apply_tick(&self, ts_sec: i64, price: f64) {
        self.state.latest_price.store(price);
        self.state
            .price_received_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);

        let mut tracker = self.state.tracker.lock();

        if price > tracker.high {
            tracker.high = price;
        }
        if price < tracker.low {
            tracker.low = price;
        }

        tracker.ring.push_back((ts_sec, price));
        while tracker.ring.len() > RING_CAPACITY {
            tracker.ring.pop_front();
        }

        self.update_boundary(&mut tracker, ts_sec, price);
    }

    fn update_boundary(&self, tracker: &mut CandleTracker, ts_sec: i64, price: f64) {
        let boundary = (ts_sec / CANDLE_SECS) * CANDLE_SECS;

        if tracker.last_boundary == 0 {
            tracker.last_boundary = boundary;
            tracker.open = tracker.closest_price(boundary);
            if tracker.open <= 0.0 {
                tracker.open = price;
            }
            info!(open = format!("{:.2}", tracker.open), boundary, "Initial 5m open set");
            return;
        }

        if boundary == tracker.last_boundary {
            return;
        }

        // Previous candle's close: latest tick before the new boundary.
        let close_price = tracker.latest_price_before(boundary);
        if close_price > 0.0 {
            tracker.close_snapshots.insert(boundary, close_price);
        }

        // True range for the candle that just completed.
        if tracker.high > 0.0 && tracker.low < f64::MAX && close_price > 0.0 {
            let tr = if tracker.prev_close > 0.0 {
                (tracker.high - tracker.low)
                    .max((tracker.high - tracker.prev_close).abs())
                    .max((tracker.low - tracker.prev_close).abs())
            } else {
                tracker.high - tracker.low
            };
            tracker.true_ranges.push_back(tr);
            while tracker.true_ranges.len() > ATR_PERIOD {
                tracker.true_ranges.pop_front();
            }

            if tracker.true_ranges.len() >= ATR_MIN_SAMPLES {
                let multiplier = 2.0 / (tracker.true_ranges.len() as f64 + 1.0);
                let mut atr = 0.0;
                let mut first = true;
                for &tr_val in &tracker.true_ranges {
                    if first {
                        atr = tr_val;
                        first = false;
                    } else {
                        atr = (tr_val - atr) * multiplier + atr;
                    }
                }
                self.state.atr_raw.store(atr);
                self.state.atr_pct.store((atr / close_price) * 100.0);
                debug!(
                    atr = format!("{atr:.2}"),
                    atr_pct = format!("{:.4}", (atr / close_price) * 100.0),
                    samples = tracker.true_ranges.len(),
                    "ATR updated"
                );
            }
            self.state
                .atr_samples
                .store(tracker.true_ranges.len() as i64, Ordering::Release);
            tracker.prev_close = close_price;
        }

        // New candle.
        tracker.high = 0.0;
        tracker.low = f64::MAX;
        tracker.last_boundary = boundary;
        tracker.open = tracker.closest_price(boundary);
        if tracker.open <= 0.0 {
            tracker.open = price;
        }

        if !self.state.warmed_up.swap(true, Ordering::AcqRel) {
            info!(open = format!("{:.2}", tracker.open), boundary, "Warmup complete, first accurate 5m open");
        }

        let cutoff = boundary - CLOSE_RETENTION_SECS;
        tracker.close_snapshots.retain(|&b, _| b >= cutoff);
    }

    fn set_connected(&self, connected: bool) {
        self.state.connected.store(connected, Ordering::Release);
    }
}

impl Default for PriceFeedHandle {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Feed task
// =============================================================================

/// Long-lived oracle WebSocket reader with supervised reconnection.
pub struct PriceFeed {
    config: PriceFeedConfig,
    handle: PriceFeedHandle,
    should_stop: Arc<AtomicBool>,
    reconnect_attempts: u32,
}

impl PriceFeed {
    /// Creates the feed task around a shared handle.
    #[must_use]
    pub fn new(config: PriceFeedConfig, handle: PriceFeedHandle) -> Self {
        Self {
            config,
            handle,
            should_stop: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: 0,
        }
    }

    /// Returns a flag that stops the feed when set.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.should_stop)
    }

    /// Subscription frame for the Chainlink crypto price topic.
    fn subscribe_frame() -> String {
        serde_json::json!({
            "action": "subscribe",
            "subscriptions": [{
                "topic": "crypto_prices_chainlink",
                "type": "*",
                "filters": ""
            }]
        })
        .to_string()
    }

    /// Runs the feed until stopped, reconnecting forever.
    pub async fn run(&mut self) {
        loop {
            if self.should_stop.load(Ordering::SeqCst) {
                info!("Price feed stopping on request");
                return;
            }

            match self.connect_and_stream().await {
                Ok(()) => {
                    info!("Price feed exiting cleanly");
                    return;
                }
                Err(e) => {
                    self.handle.set_connected(false);
                    self.reconnect_attempts += 1;
                    // 429-avoidance floor of 5 s, cap at 60 s.
                    let delay = 2u64
                        .saturating_pow(self.reconnect_attempts.min(16))
                        .clamp(5, 60);
                    warn!(
                        error = %e,
                        attempt = self.reconnect_attempts,
                        delay_secs = delay,
                        "Oracle WS reconnecting"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
            }
        }
    }

    async fn connect_and_stream(&mut self) -> Result<(), PriceFeedError> {
        info!(url = %self.config.ws_url, "Connecting to oracle feed");
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.config.ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::text(Self::subscribe_frame())).await?;
        self.handle.set_connected(true);
        self.reconnect_attempts = 0;
        info!("Oracle feed connected, subscription sent");

        let mut ping_tick = tokio::time::interval(self.config.ping_interval);
        let mut supervisor_tick = tokio::time::interval(Duration::from_secs(10));
        // The first interval tick fires immediately; skip it.
        ping_tick.tick().await;
        supervisor_tick.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text),
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            self.handle.set_connected(false);
                            return Err(PriceFeedError::Closed(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            self.handle.set_connected(false);
                            return Err(PriceFeedError::WebSocket(e));
                        }
                        None => {
                            self.handle.set_connected(false);
                            return Err(PriceFeedError::Closed("stream ended".to_string()));
                        }
                    }
                }
                _ = ping_tick.tick() => {
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                _ = supervisor_tick.tick() => {
                    if self.should_stop.load(Ordering::SeqCst) {
                        // Normal closure (1000) on shutdown.
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "shutdown".into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        return Ok(());
                    }
                    // Zombie detection: open socket, no data.
                    if self.handle.price_age_ms() > ZOMBIE_MS
                        && self.handle.state.price_received_ms.load(Ordering::Acquire) > 0
                    {
                        error!("Zombie oracle connection (30s silent), forcing reconnect");
                        self.handle.set_connected(false);
                        let _ = write.send(Message::Close(None)).await;
                        return Err(PriceFeedError::Closed("zombie connection".to_string()));
                    }
                }
            }
        }
    }

    /// Parses one RTDS frame; anything malformed is dropped silently.
    fn handle_message(&self, text: &str) {
        let Ok(msg) = serde_json::from_str::<RtdsMessage>(text) else {
            return;
        };
        if msg.topic != "crypto_prices_chainlink" {
            return;
        }
        let Some(payload) = msg.payload else { return };
        if !payload.symbol.eq_ignore_ascii_case(&self.config.symbol) {
            return;
        }
        if payload.value <= 0.0 {
            return;
        }

        // Millisecond timestamps are normalized to seconds.
        let ts_sec = if payload.timestamp > 1_000_000_000_000 {
            payload.timestamp / 1000
        } else {
            payload.timestamp
        };

        self.handle.apply_tick(ts_sec, payload.value);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_ticks(handle: &PriceFeedHandle, ticks: &[(i64, f64)]) {
        for &(ts, price) in ticks {
            handle.apply_tick(ts, price);
        }
    }

    // -------------------------------------------------------------------------
    // Boundary and open/close snapshots
    // -------------------------------------------------------------------------

    #[test]
    fn boundary_tracks_latest_tick() {
        let handle = PriceFeedHandle::new();
        handle.apply_tick(1_000_007, 100_000.0);
        assert_eq!(handle.candle_boundary(), (1_000_007 / 300) * 300);

        handle.apply_tick(1_000_319, 100_100.0);
        assert_eq!(handle.candle_boundary(), (1_000_319 / 300) * 300);
    }

    #[test]
    fn warmup_only_after_first_transition() {
        let handle = PriceFeedHandle::new();
        handle.apply_tick(1_000_000, 100_000.0);
        handle.apply_tick(1_000_100, 100_050.0);
        assert!(!handle.is_warmed_up());

        handle.apply_tick(1_000_200 + 300, 100_200.0);
        assert!(handle.is_warmed_up());
    }

    #[test]
    fn close_snapshot_is_latest_tick_before_boundary() {
        let handle = PriceFeedHandle::new();
        // Candle [999_900, 1_000_200): three ticks, last one at 1_000_190.
        feed_ticks(
            &handle,
            &[(999_910, 100.0), (1_000_050, 105.0), (1_000_190, 103.0)],
        );
        // Transition into the next candle.
        handle.apply_tick(1_000_205, 104.0);

        assert_eq!(handle.close_at(1_000_200), Some(103.0));
    }

    #[test]
    fn open_is_nearest_tick_to_boundary() {
        let handle = PriceFeedHandle::new();
        feed_ticks(
            &handle,
            &[(999_910, 100.0), (1_000_195, 101.5), (1_000_199, 102.0)],
        );
        // Nearest by absolute distance to the 1_000_200 boundary wins:
        // the 1_000_199 tick beats the 1_000_209 one.
        handle.apply_tick(1_000_209, 104.0);
        assert!((handle.candle_open() - 102.0).abs() < 1e-9);
    }

    #[test]
    fn replaying_ticks_is_deterministic() {
        let ticks: Vec<(i64, f64)> = (0..40)
            .map(|i| (1_000_000 + i * 30, 100_000.0 + f64::from(i as i32) * 7.5))
            .collect();

        let a = PriceFeedHandle::new();
        let b = PriceFeedHandle::new();
        feed_ticks(&a, &ticks);
        feed_ticks(&b, &ticks);

        assert_eq!(a.candle_boundary(), b.candle_boundary());
        assert!((a.candle_open() - b.candle_open()).abs() < 1e-12);
        assert!((a.atr_pct() - b.atr_pct()).abs() < 1e-12);
        for boundary in (1_000_200..1_001_200).step_by(300) {
            assert_eq!(a.close_at(boundary), b.close_at(boundary));
        }
    }

    // -------------------------------------------------------------------------
    // ATR
    // -------------------------------------------------------------------------

    #[test]
    fn atr_undefined_until_three_true_ranges() {
        let handle = PriceFeedHandle::new();
        // Three candles = two transitions = two TRs, not ready yet.
        for candle in 0..3 {
            let base = 1_000_000 + candle * 300;
            handle.apply_tick(base + 10, 100_000.0);
            handle.apply_tick(base + 150, 100_080.0);
        }
        assert!(!handle.atr_ready());

        // Two more candles push the TR count to three.
        for candle in 3..5 {
            let base = 1_000_000 + candle * 300;
            handle.apply_tick(base + 10, 100_000.0);
            handle.apply_tick(base + 150, 100_080.0);
        }
        assert!(handle.atr_ready());
        assert!(handle.atr_pct() > 0.0);
    }

    #[test]
    fn regime_is_normal_before_atr_ready() {
        let handle = PriceFeedHandle::new();
        assert_eq!(handle.regime(), VolRegime::Normal);
    }

    // -------------------------------------------------------------------------
    // Connection status
    // -------------------------------------------------------------------------

    #[test]
    fn connected_requires_fresh_price() {
        let handle = PriceFeedHandle::new();
        handle.set_connected(true);
        // No tick yet → age is effectively infinite.
        assert!(!handle.is_connected());

        handle.apply_tick(1_000_000, 100_000.0);
        assert!(handle.is_connected());
    }

    // -------------------------------------------------------------------------
    // Frame parsing
    // -------------------------------------------------------------------------

    #[test]
    fn frame_parsing_filters_symbol_and_normalizes_millis() {
        let handle = PriceFeedHandle::new();
        let feed = PriceFeed::new(PriceFeedConfig::default(), handle.clone());

        feed.handle_message(
            r#"{"topic":"crypto_prices_chainlink","payload":{"symbol":"eth/usd","value":3500.0,"timestamp":1000000}}"#,
        );
        assert!((handle.price() - 0.0).abs() < f64::EPSILON);

        feed.handle_message(
            r#"{"topic":"crypto_prices_chainlink","payload":{"symbol":"BTC/USD","value":108500.5,"timestamp":1700000000123}}"#,
        );
        assert!((handle.price() - 108_500.5).abs() < 1e-9);
        assert_eq!(handle.candle_boundary(), (1_700_000_000 / 300) * 300);
    }

    #[test]
    fn malformed_frames_are_dropped_silently() {
        let handle = PriceFeedHandle::new();
        let feed = PriceFeed::new(PriceFeedConfig::default(), handle.clone());
        feed.handle_message("not json at all");
        feed.handle_message(r#"{"topic":"other_topic"}"#);
        feed.handle_message(
            r#"{"topic":"crypto_prices_chainlink","payload":{"symbol":"btc/usd","value":-1.0,"timestamp":1}}"#,
        );
        assert!((handle.price() - 0.0).abs() < f64::EPSILON);
    }
}
