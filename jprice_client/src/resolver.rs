use chrono::Utc;
use dex_client::{TokenMetadata, TokenMetadataService, UNKNOWN_NAME, UNKNOWN_SYMBOL};
use persistence_layer::CacheStore;
use pnl_core::{FetchLogEntry, FetchOperation, PriceFetcher, TokenPrice, NATIVE_MINT, NATIVE_SYMBOL};
use retry_utils::{retry_with_backoff, RetryConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::{JupiterClientError, Result};

/// Source tag written with every stored price
pub const PRICE_SOURCE: &str = "jupiter";
const NATIVE_NAME: &str = "Solana";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedToken {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
    pub change_24h: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub image: Option<String>,
}

/// Output of [`MarketDataResolver::resolve_market_data`]
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    /// Mints with a price, native mint included
    pub priced: HashMap<String, ResolvedToken>,
    /// Metadata for every requested mint whose lookup did not fail, priced or not
    pub metadata: HashMap<String, TokenMetadata>,
}

/// Resolves metadata and USD prices for sets of mints and keeps the price
/// cache current.
#[derive(Clone)]
pub struct MarketDataResolver {
    prices: Arc<dyn PriceFetcher>,
    metadata: TokenMetadataService,
    store: Arc<dyn CacheStore>,
    retry: RetryConfig,
}

impl MarketDataResolver {
    pub fn new(
        prices: Arc<dyn PriceFetcher>,
        metadata: TokenMetadataService,
        store: Arc<dyn CacheStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            prices,
            metadata,
            store,
            retry,
        }
    }

    /// Metadata for `mints`, without touching prices
    pub async fn resolve_metadata_only(&self, mints: &[String]) -> HashMap<String, TokenMetadata> {
        self.metadata.get_metadata(mints).await
    }

    /// Metadata and price for each mint the price provider knows, plus the
    /// native mint. Every returned price is written to the store.
    pub async fn resolve(&self, mints: &[String]) -> Result<HashMap<String, ResolvedToken>> {
        Ok(self.resolve_market_data(mints).await?.priced)
    }

    /// [`resolve`](Self::resolve), also handing back the metadata looked up
    /// on the way so unpriced mints need no second lookup.
    pub async fn resolve_market_data(&self, mints: &[String]) -> Result<MarketData> {
        let mut requested: Vec<String> = Vec::with_capacity(mints.len() + 1);
        for mint in mints.iter().map(String::as_str).chain(std::iter::once(NATIVE_MINT)) {
            if !requested.iter().any(|m| m == mint) {
                requested.push(mint.to_string());
            }
        }

        let metadata = self.metadata.get_metadata(&requested).await;

        let start_time = Instant::now();
        let fetched = retry_with_backoff(|| self.prices.fetch_prices(&requested), &self.retry).await;
        let latency_ms = start_time.elapsed().as_millis() as u64;

        let prices = match fetched {
            Ok(prices) => prices,
            Err(e) => {
                warn!("Price fetch failed for {} mints: {}", requested.len(), e);
                self.log(FetchLogEntry::error(
                    FetchLogEntry::SYSTEM_SUBJECT,
                    FetchOperation::Prices,
                    e.to_string(),
                    latency_ms,
                ))
                .await;
                return Err(JupiterClientError::PriceFetch(e.to_string()));
            }
        };

        let now = Utc::now();
        let mut resolved = HashMap::with_capacity(prices.len());
        for (mint, price) in prices {
            let (symbol, name, image) = describe(&mint, metadata.get(&mint));

            self.store
                .upsert_token_price(&TokenPrice {
                    mint: mint.clone(),
                    symbol: symbol.clone(),
                    name: name.clone(),
                    price,
                    change_24h: None,
                    market_cap: None,
                    image: image.clone(),
                    last_updated: now,
                    source: PRICE_SOURCE.to_string(),
                })
                .await?;

            resolved.insert(
                mint.clone(),
                ResolvedToken {
                    mint,
                    symbol,
                    name,
                    price,
                    change_24h: None,
                    market_cap: None,
                    image,
                },
            );
        }

        self.log(FetchLogEntry::success(
            FetchLogEntry::SYSTEM_SUBJECT,
            FetchOperation::Prices,
            latency_ms,
        ))
        .await;
        debug!("Resolved {} of {} requested prices", resolved.len(), requested.len());

        Ok(MarketData {
            priced: resolved,
            metadata,
        })
    }

    /// Current native price, falling back to the last stored price when the
    /// provider is unavailable.
    pub async fn native_price(&self) -> Result<Decimal> {
        let err = match self.resolve(&[]).await {
            Ok(resolved) => match resolved.get(NATIVE_MINT) {
                Some(token) => return Ok(token.price),
                None => JupiterClientError::NoPriceData,
            },
            Err(e) => e,
        };

        match self.store.get_token_price(NATIVE_MINT).await? {
            Some(cached) => {
                info!(
                    "Using cached native price {} from {} after fetch failure: {}",
                    cached.price, cached.last_updated, err
                );
                Ok(cached.price)
            }
            None => Err(err),
        }
    }

    async fn log(&self, entry: FetchLogEntry) {
        if let Err(e) = self.store.insert_fetch_log(&entry).await {
            warn!("Failed to write fetch log: {}", e);
        }
    }
}

fn describe(mint: &str, metadata: Option<&TokenMetadata>) -> (String, String, Option<String>) {
    let known = metadata.filter(|m| m.symbol != UNKNOWN_SYMBOL);
    match known {
        Some(m) => (m.symbol.clone(), m.name.clone(), m.logo_uri.clone()),
        None if mint == NATIVE_MINT => (NATIVE_SYMBOL.to_string(), NATIVE_NAME.to_string(), None),
        None => (UNKNOWN_SYMBOL.to_string(), UNKNOWN_NAME.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dex_client::{TokenCatalog, TokenMetadataError, TokenMetadataSettings};
    use persistence_layer::MemoryStore;
    use pnl_core::{LogStatus, PnLError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct StaticCatalog;

    #[async_trait]
    impl TokenCatalog for StaticCatalog {
        async fn fetch_catalog(&self) -> std::result::Result<Vec<TokenMetadata>, TokenMetadataError> {
            Ok(vec![TokenMetadata {
                address: "M1".to_string(),
                symbol: "ONE".to_string(),
                name: "Token One".to_string(),
                decimals: Some(6),
                logo_uri: Some("https://img/one.png".to_string()),
            }])
        }

        async fn fetch_token(&self, _mint: &str) -> std::result::Result<Option<TokenMetadata>, TokenMetadataError> {
            Ok(None)
        }
    }

    struct MockPrices {
        prices: Option<HashMap<String, Decimal>>,
        calls: AtomicU32,
        last_request: std::sync::Mutex<Vec<String>>,
    }

    impl MockPrices {
        fn with(prices: &[(&str, Decimal)]) -> Self {
            Self {
                prices: Some(prices.iter().map(|(m, p)| (m.to_string(), *p)).collect()),
                calls: AtomicU32::new(0),
                last_request: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                prices: None,
                calls: AtomicU32::new(0),
                last_request: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PriceFetcher for MockPrices {
        async fn fetch_prices(&self, token_mints: &[String]) -> pnl_core::Result<HashMap<String, Decimal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = token_mints.to_vec();
            match &self.prices {
                Some(prices) => Ok(token_mints
                    .iter()
                    .filter_map(|m| prices.get(m).map(|p| (m.clone(), *p)))
                    .collect()),
                None => Err(PnLError::PriceFetch("jupiter unavailable".to_string())),
            }
        }
    }

    fn resolver(prices: Arc<MockPrices>, store: Arc<MemoryStore>) -> MarketDataResolver {
        MarketDataResolver::new(
            prices,
            TokenMetadataService::new(Arc::new(StaticCatalog), TokenMetadataSettings::default()),
            store,
            RetryConfig::new(3, Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_resolve_adds_native_and_stores_prices() {
        let prices = Arc::new(MockPrices::with(&[(NATIVE_MINT, Decimal::from(150)), ("M1", Decimal::new(5, 1))]));
        let store = Arc::new(MemoryStore::new());

        let resolved = resolver(prices.clone(), store.clone())
            .resolve(&["M1".to_string()])
            .await
            .unwrap();

        assert_eq!(resolved["M1"].symbol, "ONE");
        assert_eq!(resolved["M1"].image.as_deref(), Some("https://img/one.png"));
        assert_eq!(resolved[NATIVE_MINT].symbol, NATIVE_SYMBOL);
        assert_eq!(*prices.last_request.lock().unwrap(), vec!["M1".to_string(), NATIVE_MINT.to_string()]);

        let stored = store.get_token_price("M1").await.unwrap().unwrap();
        assert_eq!(stored.price, Decimal::new(5, 1));
        assert_eq!(stored.source, PRICE_SOURCE);
        assert_eq!(store.get_all_token_prices().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_market_data_carries_metadata_for_unpriced_mints() {
        let prices = Arc::new(MockPrices::with(&[(NATIVE_MINT, Decimal::from(150))]));
        let store = Arc::new(MemoryStore::new());

        let market = resolver(prices, store)
            .resolve_market_data(&["M1".to_string(), "M9".to_string()])
            .await
            .unwrap();

        assert!(!market.priced.contains_key("M1"));
        assert_eq!(market.metadata["M1"].symbol, "ONE");
        assert_eq!(market.metadata["M9"].symbol, dex_client::UNKNOWN_SYMBOL);
    }

    #[tokio::test]
    async fn test_metadata_only_never_prices() {
        let prices = Arc::new(MockPrices::with(&[("M1", Decimal::ONE)]));
        let store = Arc::new(MemoryStore::new());

        let metadata = resolver(prices.clone(), store.clone())
            .resolve_metadata_only(&["M1".to_string()])
            .await;

        assert_eq!(metadata["M1"].name, "Token One");
        assert_eq!(prices.calls.load(Ordering::SeqCst), 0);
        assert!(store.get_all_token_prices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_native_price_falls_back_to_cache() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_token_price(&TokenPrice {
                mint: NATIVE_MINT.to_string(),
                symbol: NATIVE_SYMBOL.to_string(),
                name: NATIVE_NAME.to_string(),
                price: Decimal::from(150),
                change_24h: None,
                market_cap: None,
                image: None,
                last_updated: Utc::now(),
                source: PRICE_SOURCE.to_string(),
            })
            .await
            .unwrap();
        let prices = Arc::new(MockPrices::failing());

        let price = resolver(prices.clone(), store).native_price().await.unwrap();

        assert_eq!(price, Decimal::from(150));
        assert_eq!(prices.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_native_price_without_cache_errors() {
        let store = Arc::new(MemoryStore::new());
        let result = resolver(Arc::new(MockPrices::failing()), store).native_price().await;
        assert!(matches!(result, Err(JupiterClientError::PriceFetch(_))));
    }

    #[tokio::test]
    async fn test_failed_resolve_is_logged_and_raised() {
        let store = Arc::new(MemoryStore::new());
        let result = resolver(Arc::new(MockPrices::failing()), store.clone())
            .resolve(&["M1".to_string()])
            .await;

        assert!(result.is_err());
        let errors = store.get_error_logs(10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].operation, FetchOperation::Prices);
        assert_eq!(errors[0].status, LogStatus::Error);
    }
}
