// Batch ingestion pipeline and the read-side services built on the cache store

use config_manager::ConfigurationError;
use jprice_client::JupiterClientError;
use persistence_layer::PersistenceError;
use pnl_core::PnLError;
use serde::{Deserialize, Serialize};
use solana_client::SolanaClientError;
use thiserror::Error;

pub mod address_source;
pub mod batch;
pub mod pnl_service;
pub mod prices;
pub mod services;
pub mod snapshots;
pub mod wallet_fetcher;

pub use address_source::{load_addresses, parse_addresses, AddressList, InvalidAddress};
pub use batch::{enrich_holdings, BatchOrchestrator, BatchSettings, BatchSummary, RunPermit};
pub use pnl_service::PnlService;
pub use prices::{PriceRefreshOutcome, PriceRefresher};
pub use services::{build_store, Providers, Services};
pub use snapshots::SnapshotService;
pub use wallet_fetcher::WalletFetcher;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("P&L calculation error: {0}")]
    PnL(#[from] PnLError),
    #[error("Solana client error: {0}")]
    SolanaClient(#[from] SolanaClientError),
    #[error("Price client error: {0}")]
    JupiterClient(#[from] JupiterClientError),
    #[error("Token metadata error: {0}")]
    TokenMetadata(#[from] dex_client::TokenMetadataError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),
    #[error("Address source error: {0}")]
    AddressSource(String),
    #[error("Invalid wallet address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Wallet processing timed out after {0} seconds")]
    Timeout(u64),
    #[error("A refresh run is already in progress")]
    AlreadyRunning,
    #[error("Run cancelled by shutdown")]
    Cancelled,
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl From<csv::Error> for OrchestratorError {
    fn from(err: csv::Error) -> Self {
        OrchestratorError::AddressSource(err.to_string())
    }
}

/// One wallet to ingest, as listed by the address source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletTarget {
    pub group_id: String,
    pub address: String,
}

impl WalletTarget {
    pub fn new(group_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            address: address.into(),
        }
    }
}
