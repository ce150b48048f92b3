use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pnl_core::{FetchLogEntry, FetchStats, LogStatus, PortfolioSnapshot, TokenPrice, WalletRecord};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::{CacheStore, HealthStatus, Result};

#[derive(Default)]
struct MemoryState {
    wallets: BTreeMap<String, WalletRecord>,
    prices: BTreeMap<String, TokenPrice>,
    logs: Vec<FetchLogEntry>,
    snapshots: Vec<PortfolioSnapshot>,
}

/// Process-local [`CacheStore`], used when no database is configured
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fetch_log_count(&self) -> usize {
        self.state.read().await.logs.len()
    }
}

fn newest_first<T: Clone>(items: impl DoubleEndedIterator<Item = T>, limit: u32) -> Vec<T> {
    items.rev().take(limit as usize).collect()
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn upsert_wallet_balance(&self, record: &WalletRecord) -> Result<()> {
        self.state
            .write()
            .await
            .wallets
            .insert(record.address.clone(), record.clone());
        Ok(())
    }

    async fn get_wallet_balance(&self, address: &str) -> Result<Option<WalletRecord>> {
        Ok(self.state.read().await.wallets.get(address).cloned())
    }

    async fn get_all_wallet_balances(&self) -> Result<Vec<WalletRecord>> {
        Ok(self.state.read().await.wallets.values().cloned().collect())
    }

    async fn upsert_token_price(&self, price: &TokenPrice) -> Result<()> {
        self.state
            .write()
            .await
            .prices
            .insert(price.mint.clone(), price.clone());
        Ok(())
    }

    async fn get_token_price(&self, mint: &str) -> Result<Option<TokenPrice>> {
        Ok(self.state.read().await.prices.get(mint).cloned())
    }

    async fn get_all_token_prices(&self) -> Result<Vec<TokenPrice>> {
        Ok(self.state.read().await.prices.values().cloned().collect())
    }

    async fn get_stale_token_prices(&self, max_age_minutes: i64) -> Result<Vec<TokenPrice>> {
        let cutoff = Utc::now() - Duration::minutes(max_age_minutes);
        Ok(self
            .state
            .read()
            .await
            .prices
            .values()
            .filter(|p| p.last_updated < cutoff)
            .cloned()
            .collect())
    }

    async fn insert_fetch_log(&self, entry: &FetchLogEntry) -> Result<()> {
        self.state.write().await.logs.push(entry.clone());
        Ok(())
    }

    async fn get_recent_fetch_logs(&self, limit: u32) -> Result<Vec<FetchLogEntry>> {
        let state = self.state.read().await;
        Ok(newest_first(state.logs.iter().cloned(), limit))
    }

    async fn get_error_logs(&self, limit: u32) -> Result<Vec<FetchLogEntry>> {
        let state = self.state.read().await;
        Ok(newest_first(
            state.logs.iter().filter(|l| l.status == LogStatus::Error).cloned(),
            limit,
        ))
    }

    async fn get_fetch_stats(&self, since: DateTime<Utc>) -> Result<FetchStats> {
        let state = self.state.read().await;
        let window: Vec<&FetchLogEntry> = state.logs.iter().filter(|l| l.timestamp >= since).collect();

        let success_count = window.iter().filter(|l| l.status == LogStatus::Success).count() as u64;
        let error_count = window.len() as u64 - success_count;
        let average_latency_ms = if window.is_empty() {
            0.0
        } else {
            window.iter().map(|l| l.latency_ms as f64).sum::<f64>() / window.len() as f64
        };

        Ok(FetchStats {
            since,
            success_count,
            error_count,
            average_latency_ms,
        })
    }

    async fn insert_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        self.state.write().await.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn get_portfolio_snapshots(&self, address: &str, limit: u32) -> Result<Vec<PortfolioSnapshot>> {
        let state = self.state.read().await;
        let mut snapshots: Vec<PortfolioSnapshot> =
            state.snapshots.iter().filter(|s| s.address == address).cloned().collect();
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        snapshots.truncate(limit as usize);
        Ok(snapshots)
    }

    async fn get_earliest_snapshot(&self, address: &str) -> Result<Option<PortfolioSnapshot>> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.address == address)
            .min_by_key(|s| s.timestamp)
            .cloned())
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::healthy("memory", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnl_core::{FetchOperation, SnapshotKind, TokenHolding};
    use rust_decimal::Decimal;

    fn price(mint: &str, minutes_old: i64) -> TokenPrice {
        TokenPrice {
            mint: mint.to_string(),
            symbol: mint.to_string(),
            name: format!("{} Token", mint),
            price: Decimal::ONE,
            change_24h: None,
            market_cap: None,
            image: None,
            last_updated: Utc::now() - Duration::minutes(minutes_old),
            source: "jupiter".to_string(),
        }
    }

    #[tokio::test]
    async fn test_wallet_upsert_keeps_one_record_per_address() {
        let store = MemoryStore::new();
        let mut record = WalletRecord::success("A", "g", Decimal::ONE, vec![TokenHolding::new("M1", Decimal::TEN, 6)]);
        store.upsert_wallet_balance(&record).await.unwrap();
        record.native_balance = Decimal::TWO;
        store.upsert_wallet_balance(&record).await.unwrap();
        store
            .upsert_wallet_balance(&WalletRecord::success("B", "g", Decimal::ONE, vec![]))
            .await
            .unwrap();

        let all = store.get_all_wallet_balances().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].address, "A");
        assert_eq!(all[0].native_balance, Decimal::TWO);
    }

    #[tokio::test]
    async fn test_stale_prices_filter_by_age() {
        let store = MemoryStore::new();
        store.upsert_token_price(&price("FRESH", 1)).await.unwrap();
        store.upsert_token_price(&price("OLD", 30)).await.unwrap();

        let stale = store.get_stale_token_prices(5).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].mint, "OLD");
    }

    #[tokio::test]
    async fn test_logs_are_newest_first_and_counted() {
        let store = MemoryStore::new();
        let since = Utc::now() - Duration::minutes(1);
        store
            .insert_fetch_log(&FetchLogEntry::success("A", FetchOperation::Balance, 100))
            .await
            .unwrap();
        store
            .insert_fetch_log(&FetchLogEntry::error("B", FetchOperation::Tokens, "rpc down", 300))
            .await
            .unwrap();

        let recent = store.get_recent_fetch_logs(10).await.unwrap();
        assert_eq!(recent[0].subject, "B");
        let errors = store.get_error_logs(10).await.unwrap();
        assert_eq!(errors.len(), 1);

        let stats = store.get_fetch_stats(since).await.unwrap();
        assert_eq!((stats.success_count, stats.error_count), (1, 1));
        assert_eq!(stats.average_latency_ms, 200.0);
    }

    #[tokio::test]
    async fn test_earliest_snapshot_is_the_basis() {
        let store = MemoryStore::new();
        let record = WalletRecord::success("A", "g", Decimal::ONE, vec![]);
        let mut first = PortfolioSnapshot::from_record(&record, Decimal::TEN, SnapshotKind::Initial);
        first.timestamp = Utc::now() - Duration::days(1);
        let second = PortfolioSnapshot::from_record(&record, Decimal::TWO, SnapshotKind::Manual);
        store.insert_portfolio_snapshot(&second).await.unwrap();
        store.insert_portfolio_snapshot(&first).await.unwrap();

        let earliest = store.get_earliest_snapshot("A").await.unwrap().unwrap();
        assert_eq!(earliest.kind, SnapshotKind::Initial);
        let listed = store.get_portfolio_snapshots("A", 10).await.unwrap();
        assert_eq!(listed[0].kind, SnapshotKind::Manual);
        assert!(store.get_earliest_snapshot("B").await.unwrap().is_none());
    }
}
