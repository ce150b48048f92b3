//! Balance fetch for one wallet, with every outcome written to the fetch log
//! and the wallet record upserted either way.

use persistence_layer::CacheStore;
use pnl_core::{FetchLogEntry, FetchOperation, WalletRecord};
use solana_client::{BalanceReader, SolanaClientError};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::{OrchestratorError, Result, WalletTarget};

#[derive(Clone)]
pub struct WalletFetcher {
    reader: BalanceReader,
    store: Arc<dyn CacheStore>,
}

async fn timed<T>(fut: impl Future<Output = solana_client::Result<T>>) -> (solana_client::Result<T>, u64) {
    let start = Instant::now();
    let result = fut.await;
    (result, start.elapsed().as_millis() as u64)
}

impl WalletFetcher {
    pub fn new(reader: BalanceReader, store: Arc<dyn CacheStore>) -> Self {
        Self { reader, store }
    }

    /// Fetch native and token balances concurrently and persist the raw
    /// record. On failure an Error record replaces the previous one and the
    /// provider error is returned. A read cut short by shutdown leaves the
    /// stored record untouched and returns [`OrchestratorError::Cancelled`].
    pub async fn fetch(&self, target: &WalletTarget) -> Result<WalletRecord> {
        let address = target.address.as_str();

        let ((native, native_ms), (tokens, tokens_ms)) = tokio::join!(
            timed(self.reader.fetch_native_balance(address)),
            timed(self.reader.fetch_token_holdings(address)),
        );

        self.log_outcome(address, FetchOperation::Balance, native.as_ref().err(), native_ms)
            .await;
        self.log_outcome(address, FetchOperation::Tokens, tokens.as_ref().err(), tokens_ms)
            .await;

        match (native, tokens) {
            (Ok(native_balance), Ok(tokens)) => {
                let record = WalletRecord::success(address, &target.group_id, native_balance, tokens);
                self.store.upsert_wallet_balance(&record).await?;
                debug!(
                    address,
                    native_balance = %record.native_balance,
                    tokens = record.tokens.len(),
                    "Stored wallet balances"
                );
                Ok(record)
            }
            (Err(SolanaClientError::Cancelled), _) | (_, Err(SolanaClientError::Cancelled)) => {
                debug!(address, "Balance fetch cancelled by shutdown");
                Err(OrchestratorError::Cancelled)
            }
            (Err(e), _) | (_, Err(e)) => {
                self.mark_failed(target, &e.to_string()).await?;
                Err(e.into())
            }
        }
    }

    /// Replace the stored record with an Error record carrying `message`
    pub async fn mark_failed(&self, target: &WalletTarget, message: &str) -> Result<WalletRecord> {
        let previous = self.store.get_wallet_balance(&target.address).await?;
        let record = WalletRecord::failure(&target.address, &target.group_id, message, previous.as_ref());
        self.store.upsert_wallet_balance(&record).await?;
        warn!(
            address = %target.address,
            retry_count = record.retry_count,
            "Wallet fetch failed: {}",
            message
        );
        Ok(record)
    }

    pub async fn log(&self, entry: FetchLogEntry) {
        if let Err(e) = self.store.insert_fetch_log(&entry).await {
            warn!("Failed to write fetch log: {}", e);
        }
    }

    async fn log_outcome(
        &self,
        address: &str,
        operation: FetchOperation,
        error: Option<&SolanaClientError>,
        latency_ms: u64,
    ) {
        let entry = match error {
            None => FetchLogEntry::success(address, operation, latency_ms),
            Some(SolanaClientError::Cancelled) => return,
            Some(e) => FetchLogEntry::error(address, operation, e.to_string(), latency_ms),
        };
        self.log(entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use persistence_layer::MemoryStore;
    use pnl_core::{FetchStatus, LogStatus};
    use retry_utils::{FetchQueue, RetryConfig};
    use rust_decimal::Decimal;
    use solana_client::{AccountDataProvider, TokenAccount};
    use std::time::Duration;

    const ADDRESS: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    struct FixedProvider {
        fail: bool,
    }

    #[async_trait]
    impl AccountDataProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn get_balance(&self, _address: &str) -> solana_client::Result<u64> {
            if self.fail {
                return Err(SolanaClientError::InvalidResponse("node unhealthy".to_string()));
            }
            Ok(2_500_000_000)
        }

        async fn get_token_accounts_by_owner(
            &self,
            _owner: &str,
            program_id: &str,
        ) -> solana_client::Result<Vec<TokenAccount>> {
            if self.fail {
                return Err(SolanaClientError::InvalidResponse("node unhealthy".to_string()));
            }
            if program_id != solana_client::TOKEN_PROGRAM_ID {
                return Ok(vec![]);
            }
            Ok(vec![TokenAccount {
                pubkey: "acc1".to_string(),
                mint: "M1".to_string(),
                ui_amount: Decimal::from(100),
                decimals: 6,
            }])
        }
    }

    fn fetcher(fail: bool, store: Arc<MemoryStore>) -> WalletFetcher {
        fetcher_with_queue(fail, store, FetchQueue::new("test", Duration::from_millis(1)))
    }

    fn fetcher_with_queue(fail: bool, store: Arc<MemoryStore>, queue: FetchQueue) -> WalletFetcher {
        let reader = BalanceReader::new(
            Arc::new(FixedProvider { fail }),
            None,
            queue,
            RetryConfig::new(2, Duration::from_millis(1)),
        );
        WalletFetcher::new(reader, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_logs_both_operations_and_stores_record() {
        let store = Arc::new(MemoryStore::new());
        let record = fetcher(false, store.clone())
            .fetch(&WalletTarget::new("g1", ADDRESS))
            .await
            .unwrap();

        assert_eq!(record.native_balance, Decimal::new(25, 1));
        assert_eq!(record.tokens.len(), 1);

        let logs = store.get_recent_fetch_logs(10).await.unwrap();
        let mut ops: Vec<FetchOperation> = logs.iter().map(|l| l.operation).collect();
        ops.sort_by_key(|o| o.as_str());
        assert_eq!(ops, vec![FetchOperation::Balance, FetchOperation::Tokens]);
        assert!(logs.iter().all(|l| l.status == LogStatus::Success));

        let stored = store.get_wallet_balance(ADDRESS).await.unwrap().unwrap();
        assert_eq!(stored.status, FetchStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_increments_retry_count() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = fetcher(true, store.clone());
        let target = WalletTarget::new("g1", ADDRESS);

        assert!(fetcher.fetch(&target).await.is_err());
        assert!(fetcher.fetch(&target).await.is_err());

        let stored = store.get_wallet_balance(ADDRESS).await.unwrap().unwrap();
        assert_eq!(stored.status, FetchStatus::Error);
        assert_eq!(stored.retry_count, 2);
        assert_eq!(stored.native_balance, Decimal::ZERO);
        assert!(stored.error_message.unwrap().contains("node unhealthy"));
        assert_eq!(store.get_error_logs(10).await.unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_keeps_previous_record() {
        let store = Arc::new(MemoryStore::new());
        let target = WalletTarget::new("g1", ADDRESS);
        fetcher(false, store.clone()).fetch(&target).await.unwrap();
        let before = store.get_wallet_balance(ADDRESS).await.unwrap().unwrap();

        let (trigger, shutdown) = retry_utils::shutdown_channel();
        trigger.trigger();
        let queue = FetchQueue::with_shutdown("test", Duration::from_millis(1), shutdown);
        let err = fetcher_with_queue(false, store.clone(), queue)
            .fetch(&target)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Cancelled));
        let after = store.get_wallet_balance(ADDRESS).await.unwrap().unwrap();
        assert_eq!(after, before);
        assert!(store.get_error_logs(10).await.unwrap().is_empty());
    }
}
