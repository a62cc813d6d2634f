//! Trade persistence for the BTC 5-minute sniper.
//!
//! One table, two writers: the scanner inserts PENDING rows, the reconciler
//! transitions them to a terminal result. Reads are ordered by `created_at`
//! or filtered by `result`, which is all the dashboard aggregations need.

pub mod database;
pub mod models;
pub mod repositories;

pub use database::DatabaseClient;
pub use models::{NewTrade, TradeAction, TradeRecord, TradeResult};
pub use repositories::trade_repo::TradeRepository;
