//! Wiring of clients, queue, store and services from a [`SystemConfig`].

use config_manager::SystemConfig;
use dex_client::{
    ChunkPolicy, JupiterTokenCatalog, JupiterTokenConfig, TokenCatalog, TokenMetadataService, TokenMetadataSettings,
};
use jprice_client::{JupiterClientConfig, JupiterPriceClient, MarketDataResolver};
use persistence_layer::{CacheStore, MemoryStore, PostgresClient};
use pnl_core::PriceFetcher;
use retry_utils::{FetchQueue, RetryConfig, Shutdown};
use solana_client::{AccountDataProvider, BalanceReader, SolanaClient, SolanaClientConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{
    load_addresses, AddressList, BatchOrchestrator, BatchSettings, PnlService, PriceRefresher, Result,
    SnapshotService, WalletFetcher,
};

/// Upstream data sources, injectable for tests
pub struct Providers {
    pub primary: Arc<dyn AccountDataProvider>,
    pub fallback: Option<Arc<dyn AccountDataProvider>>,
    pub catalog: Arc<dyn TokenCatalog>,
    pub prices: Arc<dyn PriceFetcher>,
}

impl Providers {
    pub fn from_config(config: &SystemConfig) -> Result<Self> {
        let primary = SolanaClient::new(
            "primary",
            SolanaClientConfig {
                rpc_url: config.solana.primary_rpc_url.clone(),
                rpc_timeout_seconds: config.solana.request_timeout_seconds,
            },
        )?;

        let fallback_url = config.solana.fallback_rpc_url.trim();
        let fallback: Option<Arc<dyn AccountDataProvider>> =
            if fallback_url.is_empty() || fallback_url == config.solana.primary_rpc_url {
                None
            } else {
                Some(Arc::new(SolanaClient::new(
                    "fallback",
                    SolanaClientConfig {
                        rpc_url: fallback_url.to_string(),
                        rpc_timeout_seconds: config.solana.request_timeout_seconds,
                    },
                )?))
            };

        let catalog = JupiterTokenCatalog::new(JupiterTokenConfig {
            token_list_url: config.jupiter.token_list_url.clone(),
            token_lookup_url: config.jupiter.token_lookup_url.clone(),
            request_timeout_seconds: config.jupiter.request_timeout_seconds,
        })?;

        let prices = JupiterPriceClient::new(JupiterClientConfig {
            price_api_url: config.jupiter.price_api_url.clone(),
            request_timeout_seconds: config.jupiter.request_timeout_seconds,
        })?;

        Ok(Self {
            primary: Arc::new(primary),
            fallback,
            catalog: Arc::new(catalog),
            prices: Arc::new(prices),
        })
    }
}

pub async fn build_store(config: &SystemConfig) -> Result<Arc<dyn CacheStore>> {
    if config.database.enabled {
        let client = PostgresClient::new(&config.database.postgres_url, config.database.max_connections).await?;
        info!("Using PostgreSQL cache store");
        Ok(Arc::new(client))
    } else {
        info!("Database disabled, using in-memory cache store");
        Ok(Arc::new(MemoryStore::new()))
    }
}

#[derive(Clone)]
pub struct Services {
    pub config: SystemConfig,
    pub store: Arc<dyn CacheStore>,
    pub queue: FetchQueue,
    pub resolver: MarketDataResolver,
    pub orchestrator: BatchOrchestrator,
    pub snapshots: SnapshotService,
    pub prices: PriceRefresher,
    pub pnl: PnlService,
}

impl Services {
    pub async fn from_config(config: SystemConfig, shutdown: Shutdown) -> Result<Self> {
        let providers = Providers::from_config(&config)?;
        let store = build_store(&config).await?;
        Ok(Self::assemble(config, store, providers, shutdown))
    }

    pub fn assemble(config: SystemConfig, store: Arc<dyn CacheStore>, providers: Providers, shutdown: Shutdown) -> Self {
        let retry = RetryConfig::new(
            config.retry.max_attempts,
            Duration::from_millis(config.retry.base_delay_ms),
        );
        let queue = FetchQueue::with_shutdown(
            "rpc",
            Duration::from_millis(config.fetch_queue.inter_request_delay_ms),
            shutdown.clone(),
        );

        let reader = BalanceReader::new(providers.primary, providers.fallback, queue.clone(), retry.clone());
        let fetcher = WalletFetcher::new(reader, store.clone());

        let metadata = TokenMetadataService::new(
            providers.catalog,
            TokenMetadataSettings {
                chunks: ChunkPolicy {
                    chunk_size: config.jupiter.metadata_chunk_size,
                    chunk_delay: Duration::from_millis(config.jupiter.metadata_chunk_delay_ms),
                },
                catalog_ttl: Duration::from_secs(config.jupiter.catalog_cache_ttl_seconds),
                ..TokenMetadataSettings::default()
            },
        );
        let resolver = MarketDataResolver::new(providers.prices, metadata, store.clone(), retry);

        let snapshots = SnapshotService::new(store.clone(), resolver.clone());
        let orchestrator = BatchOrchestrator::new(
            fetcher,
            resolver.clone(),
            snapshots.clone(),
            store.clone(),
            BatchSettings {
                batch_size: config.batch.batch_size,
                inter_batch_delay: Duration::from_millis(config.batch.inter_batch_delay_ms),
                wallet_timeout: Duration::from_secs(config.batch.wallet_timeout_seconds),
            },
            shutdown,
        );
        let prices = PriceRefresher::new(resolver.clone(), store.clone(), config.prices.stale_after_minutes);
        let pnl = PnlService::new(store.clone());

        Self {
            config,
            store,
            queue,
            resolver,
            orchestrator,
            snapshots,
            prices,
            pnl,
        }
    }

    /// The configured wallet list
    pub fn load_targets(&self) -> Result<AddressList> {
        load_addresses(&self.config.addresses.csv_path)
    }
}
