//! Trade row model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the binary market was bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    /// Bought the Up/Yes token.
    BuyYes,
    /// Bought the Down/No token.
    BuyNo,
    /// No position taken (analysis row).
    Hold,
}

impl TradeAction {
    /// Stable string form used in the database and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::BuyYes => "BUY_YES",
            TradeAction::BuyNo => "BUY_NO",
            TradeAction::Hold => "HOLD",
        }
    }

    /// Parses the database string form.
    #[must_use]
    pub fn from_str_db(s: &str) -> Option<Self> {
        match s {
            "BUY_YES" => Some(TradeAction::BuyYes),
            "BUY_NO" => Some(TradeAction::BuyNo),
            "HOLD" => Some(TradeAction::Hold),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeResult {
    /// Awaiting settlement.
    Pending,
    /// Settled as a win.
    Win,
    /// Settled as a loss.
    Lose,
    /// FOK exhaustion or settlement timeout; stake refunded.
    Cancelled,
}

impl TradeResult {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeResult::Pending => "PENDING",
            TradeResult::Win => "WIN",
            TradeResult::Lose => "LOSE",
            TradeResult::Cancelled => "CANCELLED",
        }
    }

    /// Parses the database string form.
    #[must_use]
    pub fn from_str_db(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TradeResult::Pending),
            "WIN" => Some(TradeResult::Win),
            "LOSE" => Some(TradeResult::Lose),
            "CANCELLED" => Some(TradeResult::Cancelled),
            _ => None,
        }
    }

    /// Returns true once the trade can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeResult::Pending)
    }
}

impl std::fmt::Display for TradeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted trade.
///
/// Column names follow the original service's schema; action/result are
/// stored as their string forms.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub coin: String,
    pub timeframe: String,
    pub action: String,
    pub result: String,
    pub bet_amount: f64,
    pub odds: f64,
    pub entry_price: f64,
    pub open_price: f64,
    pub exit_price: f64,
    pub estimated_prob: f64,
    pub ev: f64,
    pub gap: f64,
    pub price_diff_pct: f64,
    pub pnl: f64,
    pub balance_after: f64,
    pub market_id: String,
    pub reason: String,
    pub detail: String,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub scan_to_trade_ms: i64,
    pub order_status: String,
    pub order_id: String,
    pub balance_at_bet: f64,
    pub token_id: String,
    pub actual_size: f64,
}

impl TradeRecord {
    /// Typed accessor for the action column.
    #[must_use]
    pub fn action(&self) -> Option<TradeAction> {
        TradeAction::from_str_db(&self.action)
    }

    /// Typed accessor for the result column.
    #[must_use]
    pub fn result(&self) -> Option<TradeResult> {
        TradeResult::from_str_db(&self.result)
    }
}

/// Insert-side view of a trade (no id, no resolution fields yet).
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub coin: String,
    pub timeframe: String,
    pub action: TradeAction,
    pub result: TradeResult,
    pub bet_amount: f64,
    pub odds: f64,
    pub entry_price: f64,
    pub open_price: f64,
    pub estimated_prob: f64,
    pub ev: f64,
    pub gap: f64,
    pub price_diff_pct: f64,
    pub balance_after: f64,
    pub market_id: String,
    pub reason: String,
    pub detail: String,
    pub strategy: String,
    pub scan_to_trade_ms: i64,
    pub order_status: String,
    pub order_id: String,
    pub balance_at_bet: f64,
    pub token_id: String,
    pub actual_size: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_through_db_strings() {
        for action in [TradeAction::BuyYes, TradeAction::BuyNo, TradeAction::Hold] {
            assert_eq!(TradeAction::from_str_db(action.as_str()), Some(action));
        }
        assert_eq!(TradeAction::from_str_db("SELL_YES"), None);
    }

    #[test]
    fn result_terminality() {
        assert!(!TradeResult::Pending.is_terminal());
        assert!(TradeResult::Win.is_terminal());
        assert!(TradeResult::Lose.is_terminal());
        assert!(TradeResult::Cancelled.is_terminal());
    }
}
