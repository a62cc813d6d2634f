//! Polymarket integration and the BTC 5-minute sniper engine.
//!
//! The engine scans a Chainlink oracle feed for short-horizon directional
//! moves, prices them against the live 5-minute up/down market, and fires
//! fill-or-kill orders when the estimated edge clears adaptive thresholds.
//!
//! ## Modules
//!
//! - `gamma`: market catalog discovery (event slugs, resolution reads)
//! - `models`: catalog/order-book wire types and the odds snapshot
//! - `sniper`: the trading pipeline (price feed, odds feed, EV, orders,
//!   scanner, reconciler, balance, redemption)

pub mod gamma;
pub mod models;
pub mod sniper;

pub use gamma::GammaClient;
pub use models::{GammaEvent, GammaMarket, MarketOdds, OrderBook};
