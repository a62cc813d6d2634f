//! Binance 5-minute kline fallback for settlement display prices.
//!
//! Used only when the oracle close snapshot is gone (restart, eviction),
//! never for win/lose decisions, which come from the market's own
//! resolution.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

/// Binance spot REST base.
const BINANCE_API_URL: &str = "https://api.binance.com";

/// One 5m candle's open and close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    pub open: f64,
    pub close: f64,
}

/// Minimal kline reader.
#[derive(Debug, Clone)]
pub struct KlinesClient {
    http: reqwest::Client,
    base_url: String,
}

impl KlinesClient {
    /// Creates a client with the given timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .connect_timeout(timeout)
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: BINANCE_API_URL.to_string(),
        }
    }

    /// Overrides the base URL (tests).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Fetches the BTCUSDT 5m candle starting at `start_ms`.
    pub async fn fetch_5m(&self, start_ms: i64) -> Option<Kline> {
        let url = format!(
            "{}/api/v3/klines?symbol=BTCUSDT&interval=5m&startTime={}&limit=1",
            self.base_url, start_ms
        );

        let response = match self.http.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(status = %r.status(), "Klines fetch failed");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "Klines fetch failed");
                return None;
            }
        };

        let data: Value = response.json().await.ok()?;
        parse_kline(&data)
    }
}

/// `[[openTime, open, high, low, close, …]]` with string-encoded prices.
fn parse_kline(data: &Value) -> Option<Kline> {
    let row = data.as_array()?.first()?.as_array()?;
    let open = row.get(1)?.as_str()?.parse::<f64>().ok()?;
    let close = row.get(4)?.as_str()?.parse::<f64>().ok()?;
    Some(Kline { open, close })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kline_row() {
        let data: Value = serde_json::from_str(
            r#"[[1700000000000, "108000.10", "108200.00", "107900.00", "108150.55", "12.3"]]"#,
        )
        .unwrap();
        let kline = parse_kline(&data).unwrap();
        assert!((kline.open - 108_000.10).abs() < 1e-9);
        assert!((kline.close - 108_150.55).abs() < 1e-9);
    }

    #[test]
    fn empty_response_is_none() {
        let data: Value = serde_json::from_str("[]").unwrap();
        assert!(parse_kline(&data).is_none());
    }

    #[test]
    fn malformed_row_is_none() {
        let data: Value = serde_json::from_str(r#"[[1700000000000]]"#).unwrap();
        assert!(parse_kline(&data).is_none());
    }
}
