use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pnl_core::{
    FetchLogEntry, FetchStats, FetchStatus, PortfolioSnapshot, TokenHolding, TokenPrice, WalletRecord,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{CacheStore, HealthStatus, PersistenceError, Result};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS wallet_balances (
        address TEXT PRIMARY KEY,
        group_id TEXT NOT NULL,
        native_balance NUMERIC NOT NULL,
        tokens_json TEXT NOT NULL,
        last_updated TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS token_prices (
        mint TEXT PRIMARY KEY,
        symbol TEXT NOT NULL,
        name TEXT NOT NULL,
        price NUMERIC NOT NULL,
        change_24h NUMERIC,
        market_cap NUMERIC,
        image TEXT,
        last_updated TIMESTAMPTZ NOT NULL,
        source TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fetch_logs (
        id UUID PRIMARY KEY,
        subject TEXT NOT NULL,
        logged_at TIMESTAMPTZ NOT NULL,
        operation TEXT NOT NULL,
        status TEXT NOT NULL,
        error_detail TEXT,
        latency_ms BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_fetch_logs_logged_at ON fetch_logs (logged_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS portfolio_snapshots (
        id UUID PRIMARY KEY,
        address TEXT NOT NULL,
        taken_at TIMESTAMPTZ NOT NULL,
        native_balance NUMERIC NOT NULL,
        tokens_json TEXT NOT NULL,
        total_usd_value NUMERIC NOT NULL,
        kind TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_portfolio_snapshots_address ON portfolio_snapshots (address, taken_at)",
];

/// PostgreSQL-backed [`CacheStore`]
#[derive(Debug, Clone)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Connect and make sure the schema exists
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::PoolCreation(format!("PostgreSQL connection error: {}", e)))?;

        info!("PostgreSQL pool initialized: max_connections={}", max_connections);

        let client = Self { pool };
        client.init_schema().await?;
        Ok(client)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Database schema verified");
        Ok(())
    }

    /// Pool size and idle connection count
    pub fn get_pool_metrics(&self) -> (u32, u32) {
        (self.pool.size(), self.pool.num_idle() as u32)
    }
}

fn wallet_from_row(row: &PgRow) -> Result<WalletRecord> {
    let tokens_json: String = row.try_get("tokens_json")?;
    let status: String = row.try_get("status")?;
    let retry_count: i32 = row.try_get("retry_count")?;

    Ok(WalletRecord {
        address: row.try_get("address")?,
        group_id: row.try_get("group_id")?,
        native_balance: row.try_get("native_balance")?,
        tokens: serde_json::from_str::<Vec<TokenHolding>>(&tokens_json)?,
        last_updated: row.try_get("last_updated")?,
        status: status.parse::<FetchStatus>()?,
        error_message: row.try_get("error_message")?,
        retry_count: retry_count.max(0) as u32,
    })
}

fn price_from_row(row: &PgRow) -> Result<TokenPrice> {
    Ok(TokenPrice {
        mint: row.try_get("mint")?,
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        change_24h: row.try_get("change_24h")?,
        market_cap: row.try_get("market_cap")?,
        image: row.try_get("image")?,
        last_updated: row.try_get("last_updated")?,
        source: row.try_get("source")?,
    })
}

fn log_from_row(row: &PgRow) -> Result<FetchLogEntry> {
    let operation: String = row.try_get("operation")?;
    let status: String = row.try_get("status")?;
    let latency_ms: i64 = row.try_get("latency_ms")?;

    Ok(FetchLogEntry {
        id: row.try_get("id")?,
        subject: row.try_get("subject")?,
        timestamp: row.try_get("logged_at")?,
        operation: operation.parse()?,
        status: status.parse()?,
        error_detail: row.try_get("error_detail")?,
        latency_ms: latency_ms.max(0) as u64,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<PortfolioSnapshot> {
    let tokens_json: String = row.try_get("tokens_json")?;
    let kind: String = row.try_get("kind")?;

    Ok(PortfolioSnapshot {
        id: row.try_get::<Uuid, _>("id")?,
        address: row.try_get("address")?,
        timestamp: row.try_get("taken_at")?,
        native_balance: row.try_get::<Decimal, _>("native_balance")?,
        tokens: serde_json::from_str(&tokens_json)?,
        total_usd_value: row.try_get("total_usd_value")?,
        kind: kind.parse()?,
    })
}

const WALLET_COLUMNS: &str =
    "address, group_id, native_balance, tokens_json, last_updated, status, error_message, retry_count";
const PRICE_COLUMNS: &str = "mint, symbol, name, price, change_24h, market_cap, image, last_updated, source";
const LOG_COLUMNS: &str = "id, subject, logged_at, operation, status, error_detail, latency_ms";
const SNAPSHOT_COLUMNS: &str = "id, address, taken_at, native_balance, tokens_json, total_usd_value, kind";

#[async_trait]
impl CacheStore for PostgresClient {
    async fn upsert_wallet_balance(&self, record: &WalletRecord) -> Result<()> {
        let tokens_json = serde_json::to_string(&record.tokens)?;

        sqlx::query(
            r#"
            INSERT INTO wallet_balances
            (address, group_id, native_balance, tokens_json, last_updated, status, error_message, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (address)
            DO UPDATE SET
                group_id = EXCLUDED.group_id,
                native_balance = EXCLUDED.native_balance,
                tokens_json = EXCLUDED.tokens_json,
                last_updated = EXCLUDED.last_updated,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                retry_count = EXCLUDED.retry_count
            "#,
        )
        .bind(&record.address)
        .bind(&record.group_id)
        .bind(record.native_balance)
        .bind(tokens_json)
        .bind(record.last_updated)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.retry_count as i32)
        .execute(&self.pool)
        .await?;

        debug!("Upserted wallet balance for {}", record.address);
        Ok(())
    }

    async fn get_wallet_balance(&self, address: &str) -> Result<Option<WalletRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM wallet_balances WHERE address = $1", WALLET_COLUMNS))
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn get_all_wallet_balances(&self) -> Result<Vec<WalletRecord>> {
        let rows = sqlx::query(&format!("SELECT {} FROM wallet_balances ORDER BY address", WALLET_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(wallet_from_row).collect()
    }

    async fn upsert_token_price(&self, price: &TokenPrice) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_prices
            (mint, symbol, name, price, change_24h, market_cap, image, last_updated, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (mint)
            DO UPDATE SET
                symbol = EXCLUDED.symbol,
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                change_24h = EXCLUDED.change_24h,
                market_cap = EXCLUDED.market_cap,
                image = EXCLUDED.image,
                last_updated = EXCLUDED.last_updated,
                source = EXCLUDED.source
            "#,
        )
        .bind(&price.mint)
        .bind(&price.symbol)
        .bind(&price.name)
        .bind(price.price)
        .bind(price.change_24h)
        .bind(price.market_cap)
        .bind(&price.image)
        .bind(price.last_updated)
        .bind(&price.source)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_token_price(&self, mint: &str) -> Result<Option<TokenPrice>> {
        let row = sqlx::query(&format!("SELECT {} FROM token_prices WHERE mint = $1", PRICE_COLUMNS))
            .bind(mint)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(price_from_row).transpose()
    }

    async fn get_all_token_prices(&self) -> Result<Vec<TokenPrice>> {
        let rows = sqlx::query(&format!("SELECT {} FROM token_prices ORDER BY mint", PRICE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(price_from_row).collect()
    }

    async fn get_stale_token_prices(&self, max_age_minutes: i64) -> Result<Vec<TokenPrice>> {
        let cutoff = Utc::now() - ChronoDuration::minutes(max_age_minutes);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM token_prices WHERE last_updated < $1 ORDER BY last_updated",
            PRICE_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(price_from_row).collect()
    }

    async fn insert_fetch_log(&self, entry: &FetchLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fetch_logs (id, subject, logged_at, operation, status, error_detail, latency_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.subject)
        .bind(entry.timestamp)
        .bind(entry.operation.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.error_detail)
        .bind(entry.latency_ms.min(i64::MAX as u64) as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_recent_fetch_logs(&self, limit: u32) -> Result<Vec<FetchLogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fetch_logs ORDER BY logged_at DESC LIMIT $1",
            LOG_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    async fn get_error_logs(&self, limit: u32) -> Result<Vec<FetchLogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fetch_logs WHERE status = 'error' ORDER BY logged_at DESC LIMIT $1",
            LOG_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    async fn get_fetch_stats(&self, since: DateTime<Utc>) -> Result<FetchStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'success') AS success_count,
                COUNT(*) FILTER (WHERE status = 'error') AS error_count,
                COALESCE(AVG(latency_ms)::float8, 0) AS average_latency_ms
            FROM fetch_logs
            WHERE logged_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let success_count: i64 = row.try_get("success_count")?;
        let error_count: i64 = row.try_get("error_count")?;

        Ok(FetchStats {
            since,
            success_count: success_count.max(0) as u64,
            error_count: error_count.max(0) as u64,
            average_latency_ms: row.try_get("average_latency_ms")?,
        })
    }

    async fn insert_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        let tokens_json = serde_json::to_string(&snapshot.tokens)?;

        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots
            (id, address, taken_at, native_balance, tokens_json, total_usd_value, kind)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(snapshot.id)
        .bind(&snapshot.address)
        .bind(snapshot.timestamp)
        .bind(snapshot.native_balance)
        .bind(tokens_json)
        .bind(snapshot.total_usd_value)
        .bind(snapshot.kind.as_str())
        .execute(&self.pool)
        .await?;

        debug!("Stored {} snapshot for {}", snapshot.kind.as_str(), snapshot.address);
        Ok(())
    }

    async fn get_portfolio_snapshots(&self, address: &str, limit: u32) -> Result<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM portfolio_snapshots WHERE address = $1 ORDER BY taken_at DESC LIMIT $2",
            SNAPSHOT_COLUMNS
        ))
        .bind(address)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn get_earliest_snapshot(&self, address: &str) -> Result<Option<PortfolioSnapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM portfolio_snapshots WHERE address = $1 ORDER BY taken_at ASC LIMIT 1",
            SNAPSHOT_COLUMNS
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn health_check(&self) -> HealthStatus {
        let start_time = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => HealthStatus::healthy("postgres", start_time.elapsed().as_millis() as u64),
            Err(e) => HealthStatus::unhealthy(
                "postgres",
                start_time.elapsed().as_millis() as u64,
                e.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnl_core::{FetchOperation, SnapshotKind};

    // Runs only against a disposable database: DATABASE_URL=postgres://... cargo test
    async fn test_client() -> Option<PostgresClient> {
        let url = std::env::var("DATABASE_URL").ok()?;
        Some(PostgresClient::new(&url, 2).await.expect("database should be reachable"))
    }

    #[tokio::test]
    async fn test_wallet_round_trip_and_upsert() {
        let Some(client) = test_client().await else {
            return;
        };
        let address = format!("test-{}", Uuid::new_v4());
        let mut record = WalletRecord::success(
            &address,
            "g1",
            Decimal::new(25, 1),
            vec![TokenHolding::new("M1", Decimal::new(100, 0), 6)],
        );
        client.upsert_wallet_balance(&record).await.unwrap();
        record.retry_count = 4;
        client.upsert_wallet_balance(&record).await.unwrap();

        let loaded = client.get_wallet_balance(&address).await.unwrap().unwrap();
        assert_eq!(loaded.native_balance, Decimal::new(25, 1));
        assert_eq!(loaded.tokens, record.tokens);
        assert_eq!(loaded.retry_count, 4);
    }

    #[tokio::test]
    async fn test_logs_and_snapshots() {
        let Some(client) = test_client().await else {
            return;
        };
        let subject = format!("test-{}", Uuid::new_v4());
        let since = Utc::now() - ChronoDuration::seconds(5);
        client
            .insert_fetch_log(&FetchLogEntry::error(&subject, FetchOperation::Balance, "boom", 12))
            .await
            .unwrap();
        let stats = client.get_fetch_stats(since).await.unwrap();
        assert!(stats.error_count >= 1);

        let record = WalletRecord::success(&subject, "g1", Decimal::ONE, vec![]);
        let snapshot = PortfolioSnapshot::from_record(&record, Decimal::TEN, SnapshotKind::Initial);
        client.insert_portfolio_snapshot(&snapshot).await.unwrap();
        let earliest = client.get_earliest_snapshot(&subject).await.unwrap().unwrap();
        assert_eq!(earliest.id, snapshot.id);
        assert_eq!(earliest.total_usd_value, Decimal::TEN);
    }

    #[tokio::test]
    async fn test_health_check() {
        let Some(client) = test_client().await else {
            return;
        };
        assert!(client.health_check().await.is_healthy());
    }
}
