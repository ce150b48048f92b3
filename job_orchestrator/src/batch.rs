//! Chunked batch ingestion: validate, fetch, resolve, enrich, persist.

use chrono::{Duration as ChronoDuration, Utc};
use dex_client::TokenMetadata;
use futures::future::join_all;
use jprice_client::{MarketDataResolver, ResolvedToken};
use persistence_layer::CacheStore;
use pnl_core::{FetchLogEntry, FetchOperation, FetchStatus, WalletRecord, NATIVE_MINT};
use retry_utils::Shutdown;
use serde::{Deserialize, Serialize};
use solana_client::validate_address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::snapshots::SnapshotService;
use crate::wallet_fetcher::WalletFetcher;
use crate::{OrchestratorError, Result, WalletTarget};

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub wallet_timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            inter_batch_delay: Duration::from_millis(2000),
            wallet_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub successful: usize,
    pub failed: usize,
    /// `"{address}: {message}"` per failed wallet
    pub errors: Vec<String>,
    /// Chunks actually processed
    pub chunks: usize,
    /// Wallets not attempted, or cut short, because shutdown fired
    pub skipped: usize,
}

/// Held for the duration of one run; a second run cannot start meanwhile
pub struct RunPermit {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    fetcher: WalletFetcher,
    resolver: MarketDataResolver,
    snapshots: SnapshotService,
    store: Arc<dyn CacheStore>,
    settings: BatchSettings,
    shutdown: Shutdown,
    run_lock: Arc<Mutex<()>>,
}

impl BatchOrchestrator {
    pub fn new(
        fetcher: WalletFetcher,
        resolver: MarketDataResolver,
        snapshots: SnapshotService,
        store: Arc<dyn CacheStore>,
        settings: BatchSettings,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            snapshots,
            store,
            settings,
            shutdown,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Claim the single run slot without waiting
    pub fn try_start(&self) -> Result<RunPermit> {
        self.run_lock
            .clone()
            .try_lock_owned()
            .map(|guard| RunPermit { _guard: guard })
            .map_err(|_| OrchestratorError::AlreadyRunning)
    }

    pub async fn run_batch(&self, wallets: &[WalletTarget], batch_size: usize) -> Result<BatchSummary> {
        let permit = self.try_start()?;
        Ok(self.run_with_permit(permit, wallets, batch_size).await)
    }

    /// Re-run only wallets that are missing, not in Success status, or
    /// older than `max_age`
    pub async fn run_stale(&self, wallets: &[WalletTarget], max_age: ChronoDuration) -> Result<BatchSummary> {
        let permit = self.try_start()?;
        let cutoff = Utc::now() - max_age;

        let mut stale = Vec::new();
        for target in wallets {
            let needs_refresh = match self.store.get_wallet_balance(&target.address).await? {
                None => true,
                Some(record) => record.status != FetchStatus::Success || record.last_updated < cutoff,
            };
            if needs_refresh {
                stale.push(target.clone());
            }
        }

        info!("{} of {} wallets are stale", stale.len(), wallets.len());
        Ok(self.run_with_permit(permit, &stale, self.settings.batch_size).await)
    }

    /// Process `wallets` in sequential chunks; wallets within a chunk run
    /// concurrently and all settle before the next chunk starts.
    pub async fn run_with_permit(&self, _permit: RunPermit, wallets: &[WalletTarget], batch_size: usize) -> BatchSummary {
        let batch_size = batch_size.max(1);
        let chunks: Vec<&[WalletTarget]> = wallets.chunks(batch_size).collect();
        let total_chunks = chunks.len();
        let mut summary = BatchSummary::default();
        let start_time = Instant::now();

        info!(
            "Starting batch run: {} wallets in {} chunks of up to {}",
            wallets.len(),
            total_chunks,
            batch_size
        );

        let mut attempted = 0;
        for (index, chunk) in chunks.into_iter().enumerate() {
            if self.shutdown.is_triggered() {
                let remaining = wallets.len() - attempted;
                summary.skipped += remaining;
                warn!("Shutdown requested, skipping {} remaining wallets", remaining);
                break;
            }

            debug!("Processing chunk {}/{} ({} wallets)", index + 1, total_chunks, chunk.len());
            let results = join_all(chunk.iter().map(|target| self.run_wallet(target))).await;
            attempted += chunk.len();
            summary.chunks += 1;

            for (target, result) in chunk.iter().zip(results) {
                match result {
                    Ok(_) => summary.successful += 1,
                    Err(OrchestratorError::Cancelled) => summary.skipped += 1,
                    Err(e) => {
                        summary.failed += 1;
                        summary.errors.push(format!("{}: {}", target.address, e));
                    }
                }
            }

            if index + 1 < total_chunks {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.inter_batch_delay) => {}
                    _ = shutdown.triggered() => {}
                }
            }
        }

        info!(
            "Batch run finished in {:?}: {} successful, {} failed, {} skipped",
            start_time.elapsed(),
            summary.successful,
            summary.failed,
            summary.skipped
        );
        summary
    }

    /// One wallet under the pipeline deadline. Every outcome except a
    /// shutdown cancellation is logged.
    async fn run_wallet(&self, target: &WalletTarget) -> Result<WalletRecord> {
        let start_time = Instant::now();
        let result = match tokio::time::timeout(self.settings.wallet_timeout, self.process_wallet(target)).await {
            Ok(result) => result,
            Err(_) => {
                let timeout = OrchestratorError::Timeout(self.settings.wallet_timeout.as_secs());
                if let Err(e) = self.fetcher.mark_failed(target, &timeout.to_string()).await {
                    error!("Failed to mark {} as timed out: {}", target.address, e);
                }
                Err(timeout)
            }
        };
        let latency_ms = start_time.elapsed().as_millis() as u64;
        if matches!(result, Err(OrchestratorError::Cancelled)) {
            debug!("Wallet {} cut short by shutdown", target.address);
            return result;
        }

        let entry = match &result {
            Ok(_) => FetchLogEntry::success(&target.address, FetchOperation::Wallet, latency_ms),
            Err(e) => FetchLogEntry::error(&target.address, FetchOperation::Wallet, e.to_string(), latency_ms),
        };
        self.fetcher.log(entry).await;
        result
    }

    async fn process_wallet(&self, target: &WalletTarget) -> Result<WalletRecord> {
        if let Err(e) = validate_address(&target.address) {
            let invalid = OrchestratorError::InvalidAddress {
                address: target.address.clone(),
                reason: e.to_string(),
            };
            self.fetcher.mark_failed(target, &invalid.to_string()).await?;
            return Err(invalid);
        }

        let record = self.fetcher.fetch(target).await?;

        let mints: Vec<String> = record.tokens.iter().map(|t| t.mint.clone()).collect();
        let market = self.resolver.resolve_market_data(&mints).await?;

        let record = enrich_holdings(record, &market.priced, &market.metadata);
        self.store.upsert_wallet_balance(&record).await?;

        if let Some(native) = market.priced.get(NATIVE_MINT) {
            self.snapshots.ensure_initial(&record, native.price).await?;
        }

        debug!(
            address = %record.address,
            token_usd_value = %record.token_usd_value(),
            "Wallet processed"
        );
        Ok(record)
    }
}

/// Attach symbol and name to each holding and value the priced ones
pub fn enrich_holdings(
    mut record: WalletRecord,
    resolved: &HashMap<String, ResolvedToken>,
    metadata: &HashMap<String, TokenMetadata>,
) -> WalletRecord {
    for holding in &mut record.tokens {
        if let Some(token) = resolved.get(&holding.mint) {
            holding.symbol = Some(token.symbol.clone());
            holding.name = Some(token.name.clone());
            holding.usd_value = Some(holding.amount * token.price);
        } else if let Some(meta) = metadata.get(&holding.mint) {
            holding.symbol = Some(meta.symbol.clone());
            holding.name = Some(meta.name.clone());
            holding.usd_value = None;
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnl_core::TokenHolding;
    use rust_decimal_macros::dec;

    fn resolved(mint: &str, symbol: &str, price: rust_decimal::Decimal) -> (String, ResolvedToken) {
        (
            mint.to_string(),
            ResolvedToken {
                mint: mint.to_string(),
                symbol: symbol.to_string(),
                name: format!("{} Token", symbol),
                price,
                change_24h: None,
                market_cap: None,
                image: None,
            },
        )
    }

    #[test]
    fn test_enrich_values_priced_and_labels_unpriced() {
        let record = WalletRecord::success(
            "A",
            "g",
            dec!(2.5),
            vec![
                TokenHolding::new("M1", dec!(100), 6),
                TokenHolding::new("M2", dec!(7), 9),
                TokenHolding::new("M3", dec!(1), 9),
            ],
        );
        let resolved: HashMap<_, _> = [resolved("M1", "ONE", dec!(0.5))].into_iter().collect();
        let metadata: HashMap<_, _> = [("M2".to_string(), TokenMetadata::unknown("M2"))].into_iter().collect();

        let enriched = enrich_holdings(record, &resolved, &metadata);

        assert_eq!(enriched.tokens[0].usd_value, Some(dec!(50.0)));
        assert_eq!(enriched.tokens[0].name.as_deref(), Some("ONE Token"));
        assert_eq!(enriched.tokens[1].symbol.as_deref(), Some("Unknown"));
        assert_eq!(enriched.tokens[1].usd_value, None);
        assert_eq!(enriched.tokens[2].symbol, None);
        assert_eq!(enriched.token_usd_value(), dec!(50.0));
    }

    #[test]
    fn test_default_settings() {
        let settings = BatchSettings::default();
        assert_eq!(settings.batch_size, 5);
        assert_eq!(settings.inter_batch_delay, Duration::from_millis(2000));
    }
}
