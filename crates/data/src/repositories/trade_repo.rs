//! Trade repository.
//!
//! Scanner inserts PENDING rows; the reconciler performs the one-way
//! PENDING → terminal transition. Nothing else writes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{NewTrade, TradeRecord, TradeResult};

const ALL_COLUMNS: &str = "id, coin, timeframe, action, result, bet_amount, odds, entry_price, \
     open_price, exit_price, estimated_prob, ev, gap, price_diff_pct, pnl, balance_after, \
     market_id, reason, detail, strategy, created_at, resolved_at, scan_to_trade_ms, \
     order_status, order_id, balance_at_bet, token_id, actual_size";

/// Repository for trade operations.
#[derive(Debug, Clone)]
pub struct TradeRepository {
    pool: PgPool,
}

impl TradeRepository {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new trade and returns the generated ID.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn insert(&self, trade: &NewTrade) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO trades
                (coin, timeframe, action, result, bet_amount, odds, entry_price, open_price,
                 estimated_prob, ev, gap, price_diff_pct, balance_after, market_id, reason,
                 detail, strategy, scan_to_trade_ms, order_status, order_id, balance_at_bet,
                 token_id, actual_size)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23)
            RETURNING id
            "#,
        )
        .bind(&trade.coin)
        .bind(&trade.timeframe)
        .bind(trade.action.as_str())
        .bind(trade.result.as_str())
        .bind(trade.bet_amount)
        .bind(trade.odds)
        .bind(trade.entry_price)
        .bind(trade.open_price)
        .bind(trade.estimated_prob)
        .bind(trade.ev)
        .bind(trade.gap)
        .bind(trade.price_diff_pct)
        .bind(trade.balance_after)
        .bind(&trade.market_id)
        .bind(&trade.reason)
        .bind(&trade.detail)
        .bind(&trade.strategy)
        .bind(trade.scan_to_trade_ms)
        .bind(&trade.order_status)
        .bind(&trade.order_id)
        .bind(trade.balance_at_bet)
        .bind(&trade.token_id)
        .bind(trade.actual_size)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// All PENDING trades, oldest first (the reconciler's work queue).
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn find_pending(&self) -> Result<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {ALL_COLUMNS} FROM trades WHERE result = 'PENDING' ORDER BY created_at ASC",
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Most recently resolved trades (WIN/LOSE only), newest first.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn find_recent_resolved(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {ALL_COLUMNS} FROM trades
             WHERE result IN ('WIN', 'LOSE')
             ORDER BY resolved_at DESC NULLS LAST
             LIMIT $1",
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Every trade ever recorded, oldest first (dry-run balance replay).
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn find_all(&self) -> Result<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {ALL_COLUMNS} FROM trades ORDER BY created_at ASC",
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Transitions a PENDING trade to a terminal result.
    ///
    /// The WHERE clause keeps the transition one-way: applying a result to
    /// an already-terminal trade is a no-op.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn apply_result(
        &self,
        id: i64,
        result: TradeResult,
        exit_price: f64,
        pnl: f64,
        balance_after: f64,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE trades
            SET result = $2, exit_price = $3, pnl = $4, balance_after = $5, resolved_at = $6
            WHERE id = $1 AND result = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(result.as_str())
        .bind(exit_price)
        .bind(pnl)
        .bind(balance_after)
        .bind(resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_list_matches_record_field_count() {
        // TradeRecord has 28 fields; a drifting column list shows up here
        // before it shows up as a runtime decode error.
        assert_eq!(ALL_COLUMNS.split(',').count(), 28);
    }
}
