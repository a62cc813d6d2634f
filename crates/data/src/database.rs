use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connection handle for the trade store.
#[derive(Debug, Clone)]
pub struct DatabaseClient {
    pool: PgPool,
}

impl DatabaseClient {
    /// Creates a new database client connected to the specified `PostgreSQL` database.
    ///
    /// # Errors
    /// Returns an error if the database connection cannot be established.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the trades table if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the DDL statement fails.
    pub async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS trades (
                id               BIGSERIAL PRIMARY KEY,
                coin             TEXT NOT NULL DEFAULT 'BTC',
                timeframe        TEXT NOT NULL DEFAULT '5M',
                action           TEXT NOT NULL,
                result           TEXT NOT NULL DEFAULT 'PENDING',
                bet_amount       DOUBLE PRECISION NOT NULL DEFAULT 0,
                odds             DOUBLE PRECISION NOT NULL DEFAULT 0,
                entry_price      DOUBLE PRECISION NOT NULL DEFAULT 0,
                open_price       DOUBLE PRECISION NOT NULL DEFAULT 0,
                exit_price       DOUBLE PRECISION NOT NULL DEFAULT 0,
                estimated_prob   DOUBLE PRECISION NOT NULL DEFAULT 0,
                ev               DOUBLE PRECISION NOT NULL DEFAULT 0,
                gap              DOUBLE PRECISION NOT NULL DEFAULT 0,
                price_diff_pct   DOUBLE PRECISION NOT NULL DEFAULT 0,
                pnl              DOUBLE PRECISION NOT NULL DEFAULT 0,
                balance_after    DOUBLE PRECISION NOT NULL DEFAULT 0,
                market_id        TEXT NOT NULL DEFAULT '',
                reason           TEXT NOT NULL DEFAULT '',
                detail           TEXT NOT NULL DEFAULT '',
                strategy         TEXT NOT NULL DEFAULT '',
                created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
                resolved_at      TIMESTAMPTZ,
                scan_to_trade_ms BIGINT NOT NULL DEFAULT 0,
                order_status     TEXT NOT NULL DEFAULT '',
                order_id         TEXT NOT NULL DEFAULT '',
                balance_at_bet   DOUBLE PRECISION NOT NULL DEFAULT 0,
                token_id         TEXT NOT NULL DEFAULT '',
                actual_size      DOUBLE PRECISION NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trades_result_created
             ON trades (result, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
