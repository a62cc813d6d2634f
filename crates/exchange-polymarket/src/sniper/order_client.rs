//! Fill-or-kill order pipeline for the Polymarket CLOB.
//!
//! Everything static about an order is prepared once at construction:
//! signer address derivation, maker/funder resolution, the EIP-712 domain
//! separator, the pre-padded 32-byte words, and the decoded HMAC key. The
//! active window's two token ids are pre-parsed into words by the odds feed
//! so the per-order hash path does no big-integer work.
//!
//! Domain failures (rejections, auth errors, transport errors) come back as
//! a failed [`OrderResult`]; the scanner decides what a failure costs.

use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use sniper_core::PolymarketConfig;

use super::clob_auth::L2Auth;
use super::eip712::{
    self, compute_domain_separator, compute_order_struct_hash, compute_signing_hash,
    token_id_word, Eip712Error, StaticOrderWords, EXCHANGE_CONTRACT, POLYGON_CHAIN_ID, SIDE_BUY,
    SIDE_SELL,
};

/// Polymarket CLOB base URL.
pub const CLOB_URL: &str = "https://clob.polymarket.com";

/// Minimum order size in tokens enforced by the exchange.
pub const MIN_SIZE: f64 = 5.0;

/// First attempt pays one tick of slippage.
const BASE_SLIPPAGE_TICKS: u32 = 1;

/// Each FOK retry escalates by two more ticks.
const RETRY_SLIPPAGE_TICKS: u32 = 2;

// =============================================================================
// Errors and results
// =============================================================================

/// Errors from order client construction and balance reads.
#[derive(Debug, Error)]
pub enum OrderClientError {
    /// Live mode requested without a complete credential set.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// EIP-712 setup failed.
    #[error("Signing setup failed: {0}")]
    Signing(#[from] Eip712Error),

    /// L2 auth setup failed.
    #[error("Auth setup failed: {0}")]
    Auth(#[from] super::clob_auth::ClobAuthError),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Balance endpoint returned an unusable payload.
    #[error("Balance parse error: {0}")]
    BalanceParse(String),
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Side::Buy => SIDE_BUY,
            Side::Sell => SIDE_SELL,
        }
    }
}

/// Outcome of one order submission attempt.
#[derive(Debug, Clone)]
pub struct OrderResult {
    /// Whether the HTTP round trip succeeded with a 2xx.
    pub success: bool,
    /// Exchange order id, when one was issued.
    pub order_id: Option<String>,
    /// Raw error body or local failure description.
    pub error: Option<String>,
    /// USDC actually committed (`actual_size × limit`).
    pub actual_amount: f64,
    /// Token count actually ordered.
    pub actual_size: f64,
    /// Exchange status, uppercased (`MATCHED`, `LIVE`, `REJECTED`, ...).
    pub status: String,
}

impl OrderResult {
    /// True when the FOK order matched in full.
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.success && self.status == "MATCHED"
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            error: Some(error.into()),
            actual_amount: 0.0,
            actual_size: 0.0,
            status: "REJECTED".to_string(),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Pre-parsed token-id words for the active window.
#[derive(Default)]
struct TokenWordCache {
    up_id: String,
    up_word: [u8; 32],
    down_id: String,
    down_word: [u8; 32],
}

impl TokenWordCache {
    fn word_for(&self, token_id: &str) -> [u8; 32] {
        if token_id == self.up_id {
            self.up_word
        } else if token_id == self.down_id {
            self.down_word
        } else {
            token_id_word(token_id)
        }
    }
}

/// Everything needed to sign and authenticate live orders.
struct LiveSigning {
    private_key: SecretString,
    signer: String,
    maker: String,
    sig_type: u8,
    domain_separator: [u8; 32],
    words: StaticOrderWords,
    auth: L2Auth,
}

/// CLOB order client.
pub struct OrderClient {
    http: reqwest::Client,
    base_url: String,
    dry_run: bool,
    live: Option<LiveSigning>,
    token_cache: RwLock<TokenWordCache>,
}

impl std::fmt::Debug for OrderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderClient")
            .field("base_url", &self.base_url)
            .field("dry_run", &self.dry_run)
            .field("live", &self.live.as_ref().map(|l| l.signer.clone()))
            .finish_non_exhaustive()
    }
}

impl OrderClient {
    /// Builds the client, performing all one-time signing preparation.
    ///
    /// Credentials may be absent in dry-run mode; live order submission and
    /// balance reads then report not-configured failures.
    ///
    /// # Errors
    /// Returns an error when credentials are present but malformed, or the
    /// HTTP client cannot be built.
    pub fn new(
        config: &PolymarketConfig,
        dry_run: bool,
        http_timeout: Duration,
    ) -> Result<Self, OrderClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(http_timeout)
            .timeout(http_timeout)
            .build()?;

        let live = if config.is_live_ready() {
            let signer = eip712::derive_address(&config.private_key)?;
            let (maker, sig_type) = if config.funder.is_empty() {
                (signer.clone(), 0u8)
            } else {
                (config.funder.clone(), 1u8)
            };
            let domain_separator = compute_domain_separator(POLYGON_CHAIN_ID, EXCHANGE_CONTRACT)?;
            let words = StaticOrderWords::build(&maker, &signer, sig_type)?;
            let auth = L2Auth::new(
                signer.clone(),
                config.api_key.clone(),
                &config.api_secret,
                config.passphrase.clone(),
            )?;

            info!(signer = %signer, maker = %maker, sig_type, "Order client initialized");

            Some(LiveSigning {
                private_key: SecretString::from(config.private_key.clone()),
                signer,
                maker,
                sig_type,
                domain_separator,
                words,
                auth,
            })
        } else {
            if !dry_run {
                warn!("Live mode without complete CLOB credentials, orders will fail");
            }
            None
        };

        Ok(Self {
            http,
            base_url: CLOB_URL.to_string(),
            dry_run,
            live,
            token_cache: RwLock::new(TokenWordCache::default()),
        })
    }

    /// Overrides the base URL (tests).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// True when live submission is possible.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.dry_run && self.live.is_some()
    }

    /// Signer address, when credentials are configured.
    #[must_use]
    pub fn signer_address(&self) -> Option<&str> {
        self.live.as_ref().map(|l| l.signer.as_str())
    }

    /// Signature type in use (0 = EOA, 1 = proxy funder).
    #[must_use]
    pub fn signature_type(&self) -> u8 {
        self.live.as_ref().map_or(0, |l| l.sig_type)
    }

    /// Pre-parses the active window's token ids into 32-byte words.
    ///
    /// Called by the odds feed whenever the market rolls over.
    pub fn prepare_token_ids(&self, up_token_id: &str, down_token_id: &str) {
        let mut cache = self.token_cache.write();
        if cache.up_id != up_token_id {
            cache.up_id = up_token_id.to_string();
            cache.up_word = token_id_word(up_token_id);
        }
        if cache.down_id != down_token_id {
            cache.down_id = down_token_id.to_string();
            cache.down_word = token_id_word(down_token_id);
        }
    }

    /// The limit price a given attempt would pay after slippage escalation.
    ///
    /// `slippageTicks = 1 + retry × 2`, one tick = $0.01, clamped to
    /// [0.01, 0.99] and rounded to the cent grid.
    #[must_use]
    pub fn slipped_price(price: f64, side: Side, retry_count: u32) -> f64 {
        let ticks = f64::from(BASE_SLIPPAGE_TICKS + retry_count * RETRY_SLIPPAGE_TICKS);
        let raw = match side {
            Side::Buy => price + ticks * 0.01,
            Side::Sell => price - ticks * 0.01,
        };
        let clamped = raw.clamp(0.01, 0.99);
        (clamped * 100.0).round() / 100.0
    }

    /// Token size and USDC commitment for a stake at a limit price.
    ///
    /// `size = max(5, floor((amount / limit) × 100) / 100)`.
    #[must_use]
    pub fn order_size(amount: f64, limit: f64) -> (f64, f64) {
        let size = ((amount / limit) * 100.0).floor() / 100.0;
        let size = size.max(MIN_SIZE);
        (size, size * limit)
    }

    /// Submits a fill-or-kill order.
    ///
    /// `retry_count` escalates the limit price; the scanner owns the retry
    /// loop and the 0.60 ceiling. In dry-run mode the same sizing math runs
    /// and a synthetic `MATCHED` result is returned.
    pub async fn place_order(
        &self,
        token_id: &str,
        amount: f64,
        price: f64,
        side: Side,
        retry_count: u32,
    ) -> OrderResult {
        let limit = Self::slipped_price(price, side, retry_count);
        let (size, actual_amount) = Self::order_size(amount, limit);

        debug!(
            base = format!("{:.0}¢", price * 100.0),
            limit = format!("{:.0}¢", limit * 100.0),
            retry = retry_count,
            "FOK slippage"
        );

        if self.dry_run {
            info!(
                side = side.as_str(),
                amount = format!("{actual_amount:.2}"),
                size = format!("{size:.2}"),
                limit = format!("{limit:.2}"),
                "[DRY-RUN] simulated order"
            );
            return OrderResult {
                success: true,
                order_id: Some(format!("DRY-{}", chrono::Utc::now().timestamp_millis())),
                error: None,
                actual_amount,
                actual_size: size,
                status: "MATCHED".to_string(),
            };
        }

        match self.execute_live_order(token_id, limit, size, side).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Live order failed");
                OrderResult::failure(e.to_string())
            }
        }
    }

    async fn execute_live_order(
        &self,
        token_id: &str,
        limit: f64,
        size: f64,
        side: Side,
    ) -> Result<OrderResult, OrderClientError> {
        let Some(live) = &self.live else {
            return Err(OrderClientError::MissingCredentials(
                "private key / api credentials not configured".to_string(),
            ));
        };

        // Raw USDC/token amounts with exchange-grid flooring. Decimal keeps
        // the cent and micro-unit math exact.
        let size_d = Decimal::from_f64(size).unwrap_or_default();
        let limit_d = Decimal::from_f64(limit).unwrap_or_default().round_dp(2);
        let micro = dec!(1_000_000);

        let maker_raw = (size_d * limit_d * micro)
            .round()
            .to_u64()
            .map(|v| (v / 10_000) * 10_000)
            .unwrap_or(0);
        let taker_raw = (size_d * micro)
            .round()
            .to_u64()
            .map(|v| (v / 100) * 100)
            .unwrap_or(0);

        if maker_raw == 0 || taker_raw == 0 {
            return Ok(OrderResult::failure(format!(
                "Invalid amount calculation: maker={maker_raw} taker={taker_raw} size={size} limit={limit}"
            )));
        }

        let salt = chrono::Utc::now().timestamp_millis() as u64;
        let token_word = self.token_cache.read().word_for(token_id);

        let struct_hash = compute_order_struct_hash(
            &live.words,
            salt,
            &token_word,
            maker_raw,
            taker_raw,
            side.as_u8(),
        );
        let digest = compute_signing_hash(&live.domain_separator, &struct_hash);
        let signature = eip712::sign_hash(&digest, live.private_key.expose_secret())?;

        let payload = json!({
            "order": {
                "salt": salt,
                "maker": live.maker,
                "signer": live.signer,
                "taker": "0x0000000000000000000000000000000000000000",
                "tokenId": token_id,
                "makerAmount": maker_raw.to_string(),
                "takerAmount": taker_raw.to_string(),
                "expiration": "0",
                "nonce": "0",
                "feeRateBps": eip712::FEE_RATE_BPS.to_string(),
                "side": side.as_str(),
                "signatureType": live.sig_type,
                "signature": signature,
            },
            "owner": live.auth.api_key(),
            "orderType": "FOK",
            "postOnly": false,
        });
        let body = payload.to_string();

        let headers = live.auth.headers("POST", "/order", &body)?;

        let response = self
            .http
            .post(format!("{}/order", self.base_url))
            .header("POLY_ADDRESS", &headers.address)
            .header("POLY_API_KEY", &headers.api_key)
            .header("POLY_PASSPHRASE", &headers.passphrase)
            .header("POLY_TIMESTAMP", &headers.timestamp)
            .header("POLY_SIGNATURE", &headers.signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status_code = response.status();
        let text = response.text().await.unwrap_or_default();

        if status_code.is_success() {
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
            let order_id = parsed
                .get("orderID")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let status = parsed
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_uppercase();

            if status == "MATCHED" {
                info!(order_id = %order_id, side = side.as_str(),
                      amount = format!("{:.2}", size * limit), size = format!("{size:.2}"),
                      "FOK matched");
            } else {
                warn!(order_id = %order_id, status = %status, "Order accepted but not matched");
            }

            Ok(OrderResult {
                success: true,
                order_id: Some(order_id),
                error: None,
                actual_amount: size * limit,
                actual_size: size,
                status,
            })
        } else {
            error!(status = %status_code, body = %text, "Order rejected");
            Ok(OrderResult::failure(text))
        }
    }

    /// Reads the live USDC collateral balance.
    ///
    /// The endpoint sometimes answers in micro-units; any raw value above
    /// one million is interpreted as micro-USDC.
    ///
    /// # Errors
    /// Returns an error on transport failure, auth failure, or an
    /// unparseable payload.
    pub async fn fetch_live_balance(&self) -> Result<f64, OrderClientError> {
        let Some(live) = &self.live else {
            return Err(OrderClientError::MissingCredentials(
                "api credentials not configured".to_string(),
            ));
        };

        let path = "/balance-allowance";
        let url = format!(
            "{}{}?asset_type=COLLATERAL&signature_type={}",
            self.base_url, path, live.sig_type
        );
        let headers = live.auth.headers("GET", path, "")?;

        let response = self
            .http
            .get(url)
            .header("POLY_ADDRESS", &headers.address)
            .header("POLY_API_KEY", &headers.api_key)
            .header("POLY_PASSPHRASE", &headers.passphrase)
            .header("POLY_TIMESTAMP", &headers.timestamp)
            .header("POLY_SIGNATURE", &headers.signature)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(OrderClientError::BalanceParse(format!(
                "balance endpoint {status}: {text}"
            )));
        }

        let raw = parse_balance_payload(&text)
            .ok_or_else(|| OrderClientError::BalanceParse(text.clone()))?;
        Ok(normalize_balance(raw))
    }

    /// Completes the TCP+TLS handshake so the first live order skips it.
    pub async fn warm_up(&self) {
        let start = std::time::Instant::now();
        let url = format!("{}/tick-size?token_id=placeholder", self.base_url);
        match self.http.get(url).send().await {
            Ok(_) => info!(elapsed_ms = start.elapsed().as_millis() as u64, "CLOB connection pre-warmed"),
            Err(e) => warn!(error = %e, "CLOB pre-warm failed (first order pays the handshake)"),
        }
    }
}

/// Extracts the numeric balance from `{"balance": ...}` or a bare value.
fn parse_balance_payload(text: &str) -> Option<f64> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        match value.get("balance") {
            Some(serde_json::Value::Number(n)) => return n.as_f64(),
            Some(serde_json::Value::String(s)) => return s.parse().ok(),
            _ => {
                if let Some(n) = value.as_f64() {
                    return Some(n);
                }
            }
        }
    }
    text.trim().trim_matches('"').parse().ok()
}

/// Raw values above one million are micro-USDC.
fn normalize_balance(raw: f64) -> f64 {
    if raw > 1_000_000.0 {
        raw / 1e6
    } else {
        raw
    }
}

// =============================================================================
// Tests
// =============================================================================
