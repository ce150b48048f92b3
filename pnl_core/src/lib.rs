pub mod aggregator;
pub mod models;

pub use aggregator::{combine, pnl_percentage, wallet_pnl, CombinedPnl, TokenPnl, WalletPnl, DEFAULT_TOP_N};
pub use models::{
    FetchLogEntry, FetchOperation, FetchStats, FetchStatus, LogStatus, PortfolioSnapshot, SnapshotKind,
    TokenHolding, TokenPrice, WalletRecord,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

/// Wrapped SOL mint, used to price the native balance
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";
pub const NATIVE_SYMBOL: &str = "SOL";
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

#[derive(Error, Debug)]
pub enum PnLError {
    #[error("Price fetching error: {0}")]
    PriceFetch(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("No snapshot found for wallet {0}")]
    MissingBasis(String),
}

pub type Result<T> = std::result::Result<T, PnLError>;

/// Trait for fetching current token prices
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Fetch current USD prices for multiple tokens. Mints the provider does
    /// not know are absent from the result.
    async fn fetch_prices(&self, token_mints: &[String]) -> Result<HashMap<String, Decimal>>;
}
