use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pnl_core::{FetchLogEntry, FetchStats, PortfolioSnapshot, TokenPrice, WalletRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory_store;
pub mod postgres_client;

pub use memory_store::MemoryStore;
pub use postgres_client::PostgresClient;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Pool creation error: {0}")]
    PoolCreation(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

impl From<pnl_core::PnLError> for PersistenceError {
    fn from(err: pnl_core::PnLError) -> Self {
        PersistenceError::InvalidData(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    /// `"healthy"` or `"unhealthy"`
    pub status: String,
    pub backend: String,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

impl HealthStatus {
    pub fn healthy(backend: &str, latency_ms: u64) -> Self {
        Self {
            status: "healthy".to_string(),
            backend: backend.to_string(),
            latency_ms,
            detail: None,
        }
    }

    pub fn unhealthy(backend: &str, latency_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            status: "unhealthy".to_string(),
            backend: backend.to_string(),
            latency_ms,
            detail: Some(detail.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Local cache of everything the ingestion engine fetches.
///
/// Wallets are keyed by address and prices by mint; both are upserts.
/// Fetch logs and snapshots are append-only.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn upsert_wallet_balance(&self, record: &WalletRecord) -> Result<()>;
    async fn get_wallet_balance(&self, address: &str) -> Result<Option<WalletRecord>>;
    /// Ordered by address
    async fn get_all_wallet_balances(&self) -> Result<Vec<WalletRecord>>;

    async fn upsert_token_price(&self, price: &TokenPrice) -> Result<()>;
    async fn get_token_price(&self, mint: &str) -> Result<Option<TokenPrice>>;
    async fn get_all_token_prices(&self) -> Result<Vec<TokenPrice>>;
    /// Prices last updated more than `max_age_minutes` ago
    async fn get_stale_token_prices(&self, max_age_minutes: i64) -> Result<Vec<TokenPrice>>;

    async fn insert_fetch_log(&self, entry: &FetchLogEntry) -> Result<()>;
    /// Newest first
    async fn get_recent_fetch_logs(&self, limit: u32) -> Result<Vec<FetchLogEntry>>;
    /// Newest first, errors only
    async fn get_error_logs(&self, limit: u32) -> Result<Vec<FetchLogEntry>>;
    async fn get_fetch_stats(&self, since: DateTime<Utc>) -> Result<FetchStats>;

    async fn insert_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()>;
    /// Newest first
    async fn get_portfolio_snapshots(&self, address: &str, limit: u32) -> Result<Vec<PortfolioSnapshot>>;
    async fn get_earliest_snapshot(&self, address: &str) -> Result<Option<PortfolioSnapshot>>;

    async fn health_check(&self) -> HealthStatus;
}
