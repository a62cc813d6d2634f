//! Shared configuration types for the BTC 5-minute sniper.

pub mod config;
pub mod config_loader;

pub use config::{AppConfig, DatabaseConfig, FeedConfig, PolymarketConfig, SniperConfig};
pub use config_loader::ConfigLoader;
