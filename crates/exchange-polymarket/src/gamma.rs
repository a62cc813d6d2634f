//! Gamma API client for 5-minute market discovery and resolution reads.
//!
//! The 5-minute BTC up/down market for a window is addressed by a
//! deterministic slug derived from the window's Eastern-Time start epoch.

use crate::models::{GammaEvent, GammaMarket};
use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::US::Eastern;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Gamma API base URL.
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Seconds in one 5-minute window.
pub const WINDOW_SECS: i64 = 300;

/// Gamma API client.
pub struct GammaClient {
    /// HTTP client.
    http: Client,
    /// Base URL for API.
    base_url: String,
    /// Rate limiter (requests per minute).
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl GammaClient {
    /// Creates a new client with default settings.
    ///
    /// Rate limited to 60 requests per minute by default; the reconciler is
    /// the only sustained caller.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_rate_limit(timeout, nonzero!(60u32))
    }

    /// Creates a new client with a custom rate limit.
    #[must_use]
    pub fn with_rate_limit(timeout: Duration, requests_per_minute: NonZeroU32) -> Self {
        let quota = Quota::per_minute(requests_per_minute);
        Self {
            http: Client::builder()
                .connect_timeout(timeout)
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: GAMMA_API_URL.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Waits for rate limit and makes a GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gamma API error {}: {}", status, text));
        }

        Ok(response.json::<T>().await?)
    }

    /// The Eastern-Time-normalized start of the 5-minute window containing
    /// `time`, as a Unix second.
    #[must_use]
    pub fn window_start_epoch(time: DateTime<Utc>) -> i64 {
        let et = time.with_timezone(&Eastern);
        let window_min = (et.minute() / 5) * 5;
        et.with_minute(window_min)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .map_or_else(|| (time.timestamp() / WINDOW_SECS) * WINDOW_SECS, |t| t.timestamp())
    }

    /// Generates the event slug for a window start epoch.
    ///
    /// Format: `btc-updown-5m-<epochSec>`.
    #[must_use]
    pub fn slug_for_epoch(window_epoch: i64) -> String {
        format!("btc-updown-5m-{window_epoch}")
    }

    /// Slug of the window containing `time`.
    #[must_use]
    pub fn slug_for_time(time: DateTime<Utc>) -> String {
        Self::slug_for_epoch(Self::window_start_epoch(time))
    }

    /// Fetches the event for a slug. The API returns an array; the first
    /// entry is the 5-minute event.
    ///
    /// # Errors
    /// Returns an error on transport failure or when no event matches.
    pub async fn event_by_slug(&self, slug: &str) -> Result<GammaEvent> {
        let path = format!("/events?slug={slug}");
        let events: Vec<GammaEvent> = self.get(&path).await?;
        events
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No event found for slug: {}", slug))
    }

    /// Fetches the first market of the event for a slug.
    ///
    /// # Errors
    /// Returns an error on transport failure or when the event is empty.
    pub async fn market_by_slug(&self, slug: &str) -> Result<GammaMarket> {
        let event = self.event_by_slug(slug).await?;
        event
            .markets
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No market in event for slug: {}", slug))
    }

    /// Fetches a market directly by its condition ID.
    ///
    /// # Errors
    /// Returns an error on transport failure or when the market is unknown.
    pub async fn market_by_condition(&self, condition_id: &str) -> Result<GammaMarket> {
        let path = format!("/markets/{condition_id}");
        self.get(&path).await
    }
}
