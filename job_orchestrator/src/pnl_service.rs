//! Read-only PnL views over the cache store.

use persistence_layer::CacheStore;
use pnl_core::{combine, wallet_pnl, CombinedPnl, FetchStatus, PnLError, TokenPnl, WalletPnl, WalletRecord};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{OrchestratorError, Result};

#[derive(Clone)]
pub struct PnlService {
    store: Arc<dyn CacheStore>,
}

impl PnlService {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    async fn current_prices(&self) -> Result<HashMap<String, Decimal>> {
        Ok(self
            .store
            .get_all_token_prices()
            .await?
            .into_iter()
            .map(|p| (p.mint, p.price))
            .collect())
    }

    async fn compute(&self, record: &WalletRecord, prices: &HashMap<String, Decimal>) -> Result<Option<WalletPnl>> {
        let basis = self.store.get_earliest_snapshot(&record.address).await?;
        Ok(basis.map(|basis| wallet_pnl(record, &basis, prices)))
    }

    pub async fn wallet_pnl(&self, address: &str) -> Result<WalletPnl> {
        let record = self
            .store
            .get_wallet_balance(address)
            .await?
            .ok_or_else(|| OrchestratorError::WalletNotFound(address.to_string()))?;
        let prices = self.current_prices().await?;

        self.compute(&record, &prices)
            .await?
            .ok_or_else(|| PnLError::MissingBasis(address.to_string()).into())
    }

    pub async fn token_pnls(&self, address: &str) -> Result<Vec<TokenPnl>> {
        Ok(self.wallet_pnl(address).await?.tokens)
    }

    /// Totals across every wallet that has a basis snapshot and a current
    /// successful fetch.
    pub async fn combined_pnl(&self, top_n: usize) -> Result<CombinedPnl> {
        let records = self.store.get_all_wallet_balances().await?;
        let prices = self.current_prices().await?;

        let mut wallets = Vec::with_capacity(records.len());
        for record in records.iter().filter(|r| r.status == FetchStatus::Success) {
            match self.compute(record, &prices).await? {
                Some(pnl) => wallets.push(pnl),
                None => debug!(address = %record.address, "No basis snapshot, excluded from totals"),
            }
        }

        Ok(combine(&wallets, top_n))
    }
}
