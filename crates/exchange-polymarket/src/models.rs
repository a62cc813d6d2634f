//! Polymarket data models.
//!
//! Wire types for the Gamma catalog API and the CLOB order-book endpoint,
//! plus the internal odds snapshot published by the odds feed.

use serde::{Deserialize, Serialize};

// =============================================================================
// Gamma catalog types
// =============================================================================

/// Gamma API event response (contains markets).
#[derive(Debug, Clone, Deserialize)]
pub struct GammaEvent {
    pub slug: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

/// Gamma API market data for a 5-minute binary option.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    /// Condition ID for the market.
    #[serde(rename = "conditionId")]
    pub condition_id: String,

    /// JSON string array: "[\"0.53\", \"0.47\"]".
    #[serde(rename = "outcomePrices", default)]
    pub outcome_prices: Option<String>,

    /// JSON string array: "[\"token_id_up\", \"token_id_down\"]".
    #[serde(rename = "clobTokenIds", default)]
    pub clob_token_ids: Option<String>,

    /// Whether the market has closed (settlement complete or in progress).
    #[serde(default)]
    pub closed: bool,

    /// Question/title of the market.
    pub question: Option<String>,

    /// Outcome tokens with winner flags, present once resolution starts.
    #[serde(default)]
    pub tokens: Vec<MarketToken>,
}

/// An outcome token as reported by the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketToken {
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub winner: Option<bool>,
}

impl GammaMarket {
    /// Parses CLOB token IDs from the string-encoded JSON array.
    ///
    /// The first entry is the Up token, the second the Down token.
    #[must_use]
    pub fn parse_clob_token_ids(&self) -> Option<(String, String)> {
        let raw = self.clob_token_ids.as_deref()?;
        let ids: Vec<String> = serde_json::from_str(raw).ok()?;
        if ids.len() >= 2 {
            Some((ids[0].clone(), ids[1].clone()))
        } else {
            None
        }
    }

    /// Parses outcome prices from the string-encoded JSON array.
    #[must_use]
    pub fn parse_outcome_prices(&self) -> Option<(f64, f64)> {
        let raw = self.outcome_prices.as_deref()?;
        let prices: Vec<String> = serde_json::from_str(raw).ok()?;
        if prices.len() >= 2 {
            let up = prices[0].parse::<f64>().ok()?;
            let down = prices[1].parse::<f64>().ok()?;
            Some((up, down))
        } else {
            None
        }
    }

    /// Returns the winning outcome name, if resolution has landed.
    #[must_use]
    pub fn winning_outcome(&self) -> Option<&str> {
        self.tokens
            .iter()
            .find(|t| t.winner == Some(true))
            .map(|t| t.outcome.as_str())
    }
}

// =============================================================================
// CLOB order book
// =============================================================================

/// One price level of the book.
#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    #[serde(deserialize_with = "de_string_or_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_string_or_f64")]
    pub size: f64,
}

/// Order book as returned by `GET /book?token_id=<id>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Best ask under a minimum depth constraint: the numerically lowest
    /// ask whose size is at least `min_depth` tokens.
    #[must_use]
    pub fn best_ask(&self, min_depth: f64) -> Option<f64> {
        self.asks
            .iter()
            .filter(|l| l.price > 0.0 && l.size >= min_depth)
            .map(|l| l.price)
            .fold(None, |best, p| match best {
                Some(b) if b <= p => Some(b),
                _ => Some(p),
            })
    }
}

/// The CLOB returns prices and sizes as JSON strings; tolerate both.
fn de_string_or_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Odds snapshot
// =============================================================================

/// Snapshot of the active market's executable odds.
///
/// Published wholesale by the odds feed; cleared on slug rollover. Prices
/// are the depth-constrained best asks, i.e. what a FOK BUY would match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOdds {
    /// Best ask on the Up token.
    pub up_odds: f64,
    /// Best ask on the Down token.
    pub down_odds: f64,
    /// Market condition ID.
    pub condition_id: String,
    /// Up CLOB token ID.
    pub up_token_id: String,
    /// Down CLOB token ID.
    pub down_token_id: String,
    /// Wall-clock duration of the fetch that produced this snapshot.
    pub fetch_duration_ms: u64,
}

impl MarketOdds {
    /// Combined ask spread; above ~1.05 the book is too wide to bet into.
    #[must_use]
    pub fn spread(&self) -> f64 {
        self.up_odds + self.down_odds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Gamma parsing
    // -------------------------------------------------------------------------

    fn market_json(tokens: &str) -> String {
        format!(
            r#"{{
                "conditionId": "0xc0ffee",
                "outcomePrices": "[\"0.45\", \"0.58\"]",
                "clobTokenIds": "[\"111\", \"222\"]",
                "closed": true,
                "question": "Bitcoin Up or Down?",
                "tokens": {tokens}
            }}"#
        )
    }

    #[test]
    fn parses_string_encoded_token_ids() {
        let market: GammaMarket = serde_json::from_str(&market_json("[]")).unwrap();
        let (up, down) = market.parse_clob_token_ids().unwrap();
        assert_eq!(up, "111");
        assert_eq!(down, "222");
    }

    #[test]
    fn parses_string_encoded_outcome_prices() {
        let market: GammaMarket = serde_json::from_str(&market_json("[]")).unwrap();
        let (up, down) = market.parse_outcome_prices().unwrap();
        assert!((up - 0.45).abs() < 1e-9);
        assert!((down - 0.58).abs() < 1e-9);
    }

    #[test]
    fn winning_outcome_from_tokens() {
        let market: GammaMarket = serde_json::from_str(&market_json(
            r#"[{"outcome": "Up", "winner": true}, {"outcome": "Down", "winner": false}]"#,
        ))
        .unwrap();
        assert_eq!(market.winning_outcome(), Some("Up"));
    }

    #[test]
    fn no_winner_before_resolution() {
        let market: GammaMarket = serde_json::from_str(&market_json(
            r#"[{"outcome": "Up", "winner": null}, {"outcome": "Down", "winner": null}]"#,
        ))
        .unwrap();
        assert_eq!(market.winning_outcome(), None);
    }

    #[test]
    fn missing_token_ids_is_none() {
        let market: GammaMarket =
            serde_json::from_str(r#"{"conditionId": "0x1", "clobTokenIds": "[\"only-one\"]"}"#)
                .unwrap();
        assert!(market.parse_clob_token_ids().is_none());
    }

    // -------------------------------------------------------------------------
    // Order book
    // -------------------------------------------------------------------------

    #[test]
    fn best_ask_is_lowest_with_depth() {
        let book: OrderBook = serde_json::from_str(
            r#"{
                "bids": [{"price": "0.40", "size": "100"}],
                "asks": [
                    {"price": "0.60", "size": "50"},
                    {"price": "0.45", "size": "10"},
                    {"price": "0.44", "size": "2"}
                ]
            }"#,
        )
        .unwrap();
        // 0.44 is lower but only 2 tokens deep; 0.45 wins at min depth 5.
        assert_eq!(book.best_ask(5.0), Some(0.45));
    }

    #[test]
    fn best_ask_none_when_book_too_thin() {
        let book: OrderBook = serde_json::from_str(
            r#"{"bids": [], "asks": [{"price": "0.50", "size": "3"}]}"#,
        )
        .unwrap();
        assert_eq!(book.best_ask(5.0), None);
    }

    #[test]
    fn book_accepts_numeric_levels() {
        let book: OrderBook =
            serde_json::from_str(r#"{"asks": [{"price": 0.52, "size": 9.0}]}"#).unwrap();
        assert_eq!(book.best_ask(5.0), Some(0.52));
    }

    // -------------------------------------------------------------------------
    // Odds snapshot
    // -------------------------------------------------------------------------

    #[test]
    fn spread_sums_both_asks() {
        let odds = MarketOdds {
            up_odds: 0.45,
            down_odds: 0.58,
            condition_id: "0xc0ffee".to_string(),
            up_token_id: "111".to_string(),
            down_token_id: "222".to_string(),
            fetch_duration_ms: 12,
        };
        assert!((odds.spread() - 1.03).abs() < 1e-9);
    }
}
