use serde::{Deserialize, Serialize};

/// Top-level application configuration.
///
/// Loaded by [`crate::ConfigLoader`] from `config/Config.toml` merged with
/// `APP_`-prefixed environment variables; credentials are additionally
/// overridable through their own env vars (see `ConfigLoader`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sniper: SniperConfig,
    #[serde(default)]
    pub polymarket: PolymarketConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SniperConfig {
    /// Simulate orders and balance instead of hitting the live CLOB.
    pub dry_run: bool,
    /// Starting capital for dry-run mode (USDC).
    pub initial_balance: f64,
    /// Scan loop period in milliseconds.
    pub scan_interval_ms: u64,
    /// Odds prefetch period in milliseconds.
    pub odds_prefetch_interval_ms: u64,
    /// Connect/read timeout for hot-path HTTP calls in milliseconds.
    pub http_timeout_ms: u64,
    /// Minimum stake per bet (USDC).
    pub min_bet: f64,
    /// Maximum stake per bet (USDC).
    pub max_bet: f64,
}

impl Default for SniperConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            initial_balance: 50.0,
            scan_interval_ms: 100,
            odds_prefetch_interval_ms: 100,
            http_timeout_ms: 2000,
            min_bet: 1.0,
            max_bet: 10.0,
        }
    }
}

/// Polymarket CLOB credentials.
///
/// Empty strings mean "not configured"; live order submission requires all
/// of private key, api key, secret, and passphrase. `funder` is set when a
/// proxy wallet holds the funds (signature type 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolymarketConfig {
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub funder: String,
    /// Polygon JSON-RPC endpoint used for redemption transactions.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
}

fn default_rpc_url() -> String {
    "https://polygon-rpc.com".to_string()
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: String::new(),
            funder: String::new(),
            rpc_url: default_rpc_url(),
        }
    }
}

impl PolymarketConfig {
    /// Returns true when live order submission is fully configured.
    #[must_use]
    pub fn is_live_ready(&self) -> bool {
        !self.private_key.is_empty()
            && !self.api_key.is_empty()
            && !self.api_secret.is_empty()
            && !self.passphrase.is_empty()
    }
}

/// Trade store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Oracle feed endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Real-time data service WebSocket (Chainlink crypto prices).
    pub ws_url: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws-live-data.polymarket.com".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sniper: SniperConfig::default(),
            polymarket: PolymarketConfig::default(),
            database: DatabaseConfig {
                url: "postgresql://localhost/poly_sniper".to_string(),
                max_connections: default_max_connections(),
            },
            feed: FeedConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniper_defaults_match_service_fallbacks() {
        let cfg = SniperConfig::default();
        assert!(cfg.dry_run);
        assert_eq!(cfg.scan_interval_ms, 100);
        assert_eq!(cfg.odds_prefetch_interval_ms, 100);
        assert_eq!(cfg.http_timeout_ms, 2000);
        assert!((cfg.initial_balance - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn polymarket_live_ready_requires_all_credentials() {
        let mut cfg = PolymarketConfig::default();
        assert!(!cfg.is_live_ready());

        cfg.private_key = "0xabc".to_string();
        cfg.api_key = "key".to_string();
        cfg.api_secret = "secret".to_string();
        assert!(!cfg.is_live_ready());

        cfg.passphrase = "pass".to_string();
        assert!(cfg.is_live_ready());
    }
}
