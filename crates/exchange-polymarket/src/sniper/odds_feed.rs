//! Background odds prefetcher for the active 5-minute market.
//!
//! The scan loop must never block on HTTP, so a dedicated task polls the
//! catalog and both order books every ~100 ms and publishes a wholesale
//! [`MarketOdds`] snapshot. Rollover is detected strictly by slug change,
//! and the cache is invalidated before anything in the new window can read
//! it. On any fetch failure the previous snapshot is retained, except
//! across a rollover, where a stale market would be worse than none.
//!
//! No catalog-price fallback: `outcomePrices` diverges from the executable
//! book by whole cents, so only `/book` asks are ever published.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::gamma::GammaClient;
use crate::models::{GammaEvent, MarketOdds, OrderBook};

use super::order_client::OrderClient;

/// Minimum ask depth (tokens) for a level to count as executable.
const MIN_BOOK_DEPTH: f64 = 5.0;

/// Shared snapshot state.
struct OddsState {
    snapshot: RwLock<Option<MarketOdds>>,
    slug: RwLock<String>,
    published_ms: AtomicI64,
    last_fetch_duration_ms: AtomicU64,
}

/// Read handle for the scanner: never blocks, never fetches.
#[derive(Clone)]
pub struct OddsHandle {
    state: Arc<OddsState>,
}

impl OddsHandle {
    /// Current snapshot; `None` before the first successful prefetch of a
    /// window.
    #[must_use]
    pub fn get_odds(&self) -> Option<MarketOdds> {
        self.state.snapshot.read().clone()
    }

    /// Age of the published snapshot in milliseconds, -1 when empty.
    #[must_use]
    pub fn cache_age_ms(&self) -> i64 {
        let published = self.state.published_ms.load(Ordering::Acquire);
        if published == 0 {
            return -1;
        }
        chrono::Utc::now().timestamp_millis() - published
    }

    /// Duration of the most recent successful fetch.
    #[must_use]
    pub fn last_fetch_duration_ms(&self) -> u64 {
        self.state.last_fetch_duration_ms.load(Ordering::Acquire)
    }
}

/// The prefetch task.
pub struct OddsFeed {
    http: reqwest::Client,
    gamma_url: String,
    clob_url: String,
    interval: Duration,
    state: Arc<OddsState>,
    order_client: Arc<OrderClient>,
    should_stop: Arc<AtomicBool>,
}

impl OddsFeed {
    /// Creates the feed and its read handle.
    ///
    /// `order_client` receives token-id pre-parse pushes on rollover.
    #[must_use]
    pub fn new(
        http_timeout: Duration,
        interval: Duration,
        order_client: Arc<OrderClient>,
    ) -> (Self, OddsHandle) {
        let state = Arc::new(OddsState {
            snapshot: RwLock::new(None),
            slug: RwLock::new(String::new()),
            published_ms: AtomicI64::new(0),
            last_fetch_duration_ms: AtomicU64::new(0),
        });

        let feed = Self {
            http: reqwest::Client::builder()
                .connect_timeout(http_timeout)
                .timeout(http_timeout)
                .build()
                .unwrap_or_default(),
            gamma_url: crate::gamma::GAMMA_API_URL.to_string(),
            clob_url: super::order_client::CLOB_URL.to_string(),
            interval,
            state: Arc::clone(&state),
            order_client,
            should_stop: Arc::new(AtomicBool::new(false)),
        };

        (feed, OddsHandle { state })
    }

    /// Overrides API endpoints (tests).
    #[must_use]
    pub fn with_endpoints(mut self, gamma_url: impl Into<String>, clob_url: impl Into<String>) -> Self {
        self.gamma_url = gamma_url.into();
        self.clob_url = clob_url.into();
        self
    }

    /// Returns a flag that stops the feed when set.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.should_stop)
    }

    /// Runs the prefetch loop until stopped.
    pub async fn run(self) {
        info!(interval_ms = self.interval.as_millis() as u64, "Odds prefetch started");
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            if self.should_stop.load(Ordering::SeqCst) {
                info!("Odds prefetch stopping");
                return;
            }
            self.prefetch_once().await;
        }
    }

    /// One prefetch pass: rollover check, catalog fetch, two book fetches,
    /// snapshot publish.
    pub async fn prefetch_once(&self) {
        let current_slug = GammaClient::slug_for_time(chrono::Utc::now());

        {
            let mut slug = self.state.slug.write();
            if *slug != current_slug {
                info!(slug = %current_slug, "New 5m window, odds cache invalidated");
                *self.state.snapshot.write() = None;
                self.state.published_ms.store(0, Ordering::Release);
                *slug = current_slug.clone();
            }
        }

        let started = std::time::Instant::now();

        let Some((condition_id, up_token_id, down_token_id)) =
            self.fetch_market(&current_slug).await
        else {
            return;
        };

        // Keep the signing path warm: token words parse once per window.
        self.order_client.prepare_token_ids(&up_token_id, &down_token_id);

        let up_ask = self.fetch_best_ask(&up_token_id).await;
        let down_ask = self.fetch_best_ask(&down_token_id).await;

        let (Some(up), Some(down)) = (up_ask, down_ask) else {
            debug!("Order book empty or too thin, keeping previous snapshot");
            return;
        };

        // Asks outside the open interval are settlement artifacts.
        if up <= 0.01 || up >= 0.99 || down <= 0.01 || down >= 0.99 {
            return;
        }

        let fetch_duration_ms = started.elapsed().as_millis() as u64;
        let odds = MarketOdds {
            up_odds: up,
            down_odds: down,
            condition_id,
            up_token_id,
            down_token_id,
            fetch_duration_ms,
        };

        debug!(
            up = format!("{:.0}¢", up * 100.0),
            down = format!("{:.0}¢", down * 100.0),
            ms = fetch_duration_ms,
            "Odds snapshot published"
        );

        *self.state.snapshot.write() = Some(odds);
        self.state
            .published_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
        self.state
            .last_fetch_duration_ms
            .store(fetch_duration_ms, Ordering::Release);
    }

    /// Catalog lookup: first event, first market, condition + token ids.
    async fn fetch_market(&self, slug: &str) -> Option<(String, String, String)> {
        let url = format!("{}/events?slug={}", self.gamma_url, slug);
        let events: Vec<GammaEvent> = match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok()?,
            Ok(resp) => {
                debug!(status = %resp.status(), "Catalog fetch failed");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "Catalog fetch failed");
                return None;
            }
        };

        let market = events.into_iter().next()?.markets.into_iter().next()?;
        let (up, down) = market.parse_clob_token_ids()?;
        Some((market.condition_id, up, down))
    }

    /// Depth-constrained best ask for one token.
    async fn fetch_best_ask(&self, token_id: &str) -> Option<f64> {
        let url = format!("{}/book?token_id={}", self.clob_url, token_id);
        let book: OrderBook = match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok()?,
            Ok(_) | Err(_) => return None,
        };
        let ask = book.best_ask(MIN_BOOK_DEPTH);
        if ask.is_none() {
            warn!(token_id = %token_id, "Order book has no executable ask");
        }
        ask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sniper_core::PolymarketConfig;

    fn handle_with_feed() -> (OddsFeed, OddsHandle) {
        let client = Arc::new(
            OrderClient::new(&PolymarketConfig::default(), true, Duration::from_secs(2)).unwrap(),
        );
        OddsFeed::new(Duration::from_secs(2), Duration::from_millis(100), client)
    }

    #[test]
    fn empty_handle_reports_no_odds() {
        let (_feed, handle) = handle_with_feed();
        assert!(handle.get_odds().is_none());
        assert_eq!(handle.cache_age_ms(), -1);
        assert_eq!(handle.last_fetch_duration_ms(), 0);
    }

    #[test]
    fn snapshot_publish_and_read() {
        let (feed, handle) = handle_with_feed();
        *feed.state.snapshot.write() = Some(MarketOdds {
            up_odds: 0.45,
            down_odds: 0.58,
            condition_id: "0xc0ffee".to_string(),
            up_token_id: "111".to_string(),
            down_token_id: "222".to_string(),
            fetch_duration_ms: 20,
        });
        feed.state
            .published_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);

        let odds = handle.get_odds().unwrap();
        assert!((odds.up_odds - 0.45).abs() < 1e-9);
        assert!(handle.cache_age_ms() >= 0);
    }

    #[tokio::test]
    async fn rollover_invalidates_before_any_read() {
        let (feed, handle) = handle_with_feed();

        // A snapshot from a previous (fake) slug.
        *feed.state.snapshot.write() = Some(MarketOdds {
            up_odds: 0.45,
            down_odds: 0.58,
            condition_id: "old".to_string(),
            up_token_id: "111".to_string(),
            down_token_id: "222".to_string(),
            fetch_duration_ms: 20,
        });
        *feed.state.slug.write() = "btc-updown-5m-0".to_string();

        // Point the feed at unroutable endpoints: the fetch after
        // invalidation fails, so the cleared cache must stay cleared.
        let feed = feed.with_endpoints("http://127.0.0.1:1", "http://127.0.0.1:1");
        feed.prefetch_once().await;

        assert!(handle.get_odds().is_none());
        assert_eq!(*feed.state.slug.read(), GammaClient::slug_for_time(chrono::Utc::now()));
    }
}
