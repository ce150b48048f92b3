//! Point-in-time valuations of stored wallets. The earliest snapshot of a
//! wallet is its PnL basis.

use jprice_client::MarketDataResolver;
use persistence_layer::CacheStore;
use pnl_core::{FetchStatus, PortfolioSnapshot, SnapshotKind, WalletRecord};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{OrchestratorError, Result};

#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<dyn CacheStore>,
    resolver: MarketDataResolver,
}

impl SnapshotService {
    pub fn new(store: Arc<dyn CacheStore>, resolver: MarketDataResolver) -> Self {
        Self { store, resolver }
    }

    pub async fn snapshot_wallet(&self, address: &str, kind: SnapshotKind) -> Result<PortfolioSnapshot> {
        let record = self
            .store
            .get_wallet_balance(address)
            .await?
            .ok_or_else(|| OrchestratorError::WalletNotFound(address.to_string()))?;
        let native_price = self.resolver.native_price().await?;
        self.insert(&record, native_price, kind).await
    }

    /// Snapshot every successfully fetched wallet at one native price
    pub async fn snapshot_all(&self, kind: SnapshotKind) -> Result<Vec<PortfolioSnapshot>> {
        let records = self.store.get_all_wallet_balances().await?;
        let native_price = self.resolver.native_price().await?;

        let mut snapshots = Vec::with_capacity(records.len());
        for record in records.iter().filter(|r| r.status == FetchStatus::Success) {
            snapshots.push(self.insert(record, native_price, kind).await?);
        }

        info!("Took {} {} snapshots", snapshots.len(), kind.as_str());
        Ok(snapshots)
    }

    /// Take the `Initial` snapshot unless the wallet already has a basis
    pub async fn ensure_initial(
        &self,
        record: &WalletRecord,
        native_price: Decimal,
    ) -> Result<Option<PortfolioSnapshot>> {
        if self.store.get_earliest_snapshot(&record.address).await?.is_some() {
            return Ok(None);
        }
        let snapshot = self.insert(record, native_price, SnapshotKind::Initial).await?;
        Ok(Some(snapshot))
    }

    async fn insert(&self, record: &WalletRecord, native_price: Decimal, kind: SnapshotKind) -> Result<PortfolioSnapshot> {
        let snapshot = PortfolioSnapshot::from_record(record, native_price, kind);
        self.store.insert_portfolio_snapshot(&snapshot).await?;
        debug!(
            address = %snapshot.address,
            total_usd_value = %snapshot.total_usd_value,
            "Stored {} snapshot",
            kind.as_str()
        );
        Ok(snapshot)
    }
}
