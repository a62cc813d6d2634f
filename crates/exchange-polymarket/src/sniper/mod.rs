//! The BTC 5-minute sniper pipeline.
//!
//! ```text
//! Oracle WS ──► PriceFeed ──┐
//!                           ├──► Scanner ──► OrderClient ──► CLOB
//! Gamma/CLOB ─► OddsFeed ───┘        │
//!                                    ▼
//!                              TradeRepository
//!                                    │
//!                   Reconciler ◄─────┘
//!                        │
//!                        ├──► BalanceManager (credit / refund / polling)
//!                        └──► RedeemWorker ──► CTF redeemPositions
//! ```

pub mod atomic;
pub mod balance;
pub mod circuit_breaker;
pub mod clob_auth;
pub mod cusum;
pub mod eip712;
pub mod ev;
pub mod filters;
pub mod klines;
pub mod odds_feed;
pub mod order_client;
pub mod polygon_tx;
pub mod price_feed;
pub mod reconciler;
pub mod redeem;
pub mod regime;
pub mod scanner;

pub use balance::BalanceManager;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use cusum::CusumDetector;
pub use ev::{Direction, EvCalculator, EvConfig, EvResult};
pub use odds_feed::OddsFeed;
pub use order_client::{OrderClient, OrderClientError, OrderResult};
pub use price_feed::{PriceFeed, PriceFeedConfig, PriceFeedHandle};
pub use reconciler::Reconciler;
pub use redeem::{CtfRedeemer, NoopRedeemer, RedeemOutcome, RedeemWorker, Redeemer};
pub use regime::{RegimeThresholds, VolRegime};
pub use scanner::{ScanMetrics, Scanner};
