use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::resolution::{resolve_two_tier, ChunkPolicy, Resolution, TwoTierSource};

pub const UNKNOWN_SYMBOL: &str = "Unknown";
pub const UNKNOWN_NAME: &str = "Unknown Token";

#[derive(Error, Debug)]
pub enum TokenMetadataError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Token catalog unavailable: {0}")]
    CatalogUnavailable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenMetadata {
    pub address: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(rename = "logoURI", default)]
    pub logo_uri: Option<String>,
}

impl TokenMetadata {
    /// Placeholder for a mint the catalog does not list
    pub fn unknown(address: &str) -> Self {
        Self {
            address: address.to_string(),
            symbol: UNKNOWN_SYMBOL.to_string(),
            name: UNKNOWN_NAME.to_string(),
            decimals: None,
            logo_uri: None,
        }
    }
}

/// Bulk + per-mint token metadata source
#[async_trait]
pub trait TokenCatalog: Send + Sync {
    /// The full token list
    async fn fetch_catalog(&self) -> Result<Vec<TokenMetadata>, TokenMetadataError>;

    /// One mint; `Ok(None)` if the catalog does not know it
    async fn fetch_token(&self, mint: &str) -> Result<Option<TokenMetadata>, TokenMetadataError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupiterTokenConfig {
    pub token_list_url: String,
    /// Per-mint endpoint; `{mint}` is replaced with the mint address
    pub token_lookup_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for JupiterTokenConfig {
    fn default() -> Self {
        Self {
            token_list_url: "https://lite-api.jup.ag/tokens/v1/tagged/verified".to_string(),
            token_lookup_url: "https://lite-api.jup.ag/tokens/v1/token/{mint}".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

/// Jupiter token list client
#[derive(Debug, Clone)]
pub struct JupiterTokenCatalog {
    client: Client,
    config: JupiterTokenConfig,
}

impl JupiterTokenCatalog {
    pub fn new(config: JupiterTokenConfig) -> Result<Self, TokenMetadataError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn lookup_url(&self, mint: &str) -> String {
        self.config.token_lookup_url.replace("{mint}", mint)
    }
}

#[async_trait]
impl TokenCatalog for JupiterTokenCatalog {
    async fn fetch_catalog(&self) -> Result<Vec<TokenMetadata>, TokenMetadataError> {
        debug!("Fetching token catalog from {}", self.config.token_list_url);

        let response = self.client.get(&self.config.token_list_url).send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(TokenMetadataError::RateLimitExceeded);
        }
        if !response.status().is_success() {
            return Err(TokenMetadataError::ApiError(format!(
                "token list returned HTTP {}",
                response.status()
            )));
        }

        let response_text = response.text().await?;
        let tokens: Vec<TokenMetadata> = serde_json::from_str(&response_text).map_err(|e| {
            error!("Failed to parse token list response ({} bytes)", response_text.len());
            TokenMetadataError::JsonError(e)
        })?;

        info!("Fetched {} tokens from catalog", tokens.len());
        Ok(tokens)
    }

    async fn fetch_token(&self, mint: &str) -> Result<Option<TokenMetadata>, TokenMetadataError> {
        let response = self.client.get(self.lookup_url(mint)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::TOO_MANY_REQUESTS => return Err(TokenMetadataError::RateLimitExceeded),
            status if !status.is_success() => {
                return Err(TokenMetadataError::ApiError(format!(
                    "token lookup for {} returned HTTP {}",
                    mint, status
                )))
            }
            _ => {}
        }

        // unknown mints come back as a literal `null`
        let token: Option<TokenMetadata> = response.json().await?;
        Ok(token)
    }
}

enum CachedCatalog {
    Loaded {
        fetched_at: Instant,
        by_mint: Arc<HashMap<String, TokenMetadata>>,
    },
    Failed {
        failed_at: Instant,
        reason: String,
    },
}

impl CachedCatalog {
    /// The cached outcome while it is still fresh
    fn fresh(
        &self,
        settings: &TokenMetadataSettings,
    ) -> Option<Result<Arc<HashMap<String, TokenMetadata>>, TokenMetadataError>> {
        match self {
            CachedCatalog::Loaded { fetched_at, by_mint } if fetched_at.elapsed() < settings.catalog_ttl => {
                Some(Ok(by_mint.clone()))
            }
            CachedCatalog::Failed { failed_at, reason } if failed_at.elapsed() < settings.failure_ttl => {
                Some(Err(TokenMetadataError::CatalogUnavailable(reason.clone())))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenMetadataSettings {
    pub chunks: ChunkPolicy,
    /// How long a fetched catalog is reused
    pub catalog_ttl: Duration,
    /// How long a failed catalog fetch is remembered before it is tried again
    pub failure_ttl: Duration,
}

impl Default for TokenMetadataSettings {
    fn default() -> Self {
        Self {
            chunks: ChunkPolicy::default(),
            catalog_ttl: Duration::from_secs(3600),
            failure_ttl: Duration::from_secs(60),
        }
    }
}

/// Resolves mint metadata from a [`TokenCatalog`], caching the bulk list
#[derive(Clone)]
pub struct TokenMetadataService {
    catalog: Arc<dyn TokenCatalog>,
    settings: TokenMetadataSettings,
    cache: Arc<RwLock<Option<CachedCatalog>>>,
}

impl TokenMetadataService {
    pub fn new(catalog: Arc<dyn TokenCatalog>, settings: TokenMetadataSettings) -> Self {
        Self {
            catalog,
            settings,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Per-mint outcome; see [`resolve_two_tier`]
    pub async fn resolve(&self, mints: &[String]) -> HashMap<String, Resolution<TokenMetadata>> {
        resolve_two_tier(self, mints, &self.settings.chunks).await
    }

    /// Metadata for each mint. Unknown mints get the placeholder; mints whose
    /// lookup failed are left out.
    pub async fn get_metadata(&self, mints: &[String]) -> HashMap<String, TokenMetadata> {
        self.resolve(mints)
            .await
            .into_iter()
            .filter_map(|(mint, resolution)| match resolution {
                Resolution::Resolved(metadata) => Some((mint, metadata)),
                Resolution::Unknown => {
                    let placeholder = TokenMetadata::unknown(&mint);
                    Some((mint, placeholder))
                }
                Resolution::Failed(_) => None,
            })
            .collect()
    }

    /// The bulk catalog. Concurrent callers on a cold cache share one fetch:
    /// the fetch runs under the write lock and waiters re-check the cache.
    async fn catalog(&self) -> Result<Arc<HashMap<String, TokenMetadata>>, TokenMetadataError> {
        if let Some(outcome) = self.cache.read().await.as_ref().and_then(|c| c.fresh(&self.settings)) {
            debug!("Token catalog cache hit");
            return outcome;
        }

        let mut cache = self.cache.write().await;
        if let Some(outcome) = cache.as_ref().and_then(|c| c.fresh(&self.settings)) {
            return outcome;
        }

        match self.catalog.fetch_catalog().await {
            Ok(tokens) => {
                let by_mint: Arc<HashMap<String, TokenMetadata>> =
                    Arc::new(tokens.into_iter().map(|t| (t.address.clone(), t)).collect());
                *cache = Some(CachedCatalog::Loaded {
                    fetched_at: Instant::now(),
                    by_mint: by_mint.clone(),
                });
                Ok(by_mint)
            }
            Err(e) => {
                error!("Token catalog fetch failed: {}", e);
                *cache = Some(CachedCatalog::Failed {
                    failed_at: Instant::now(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
        debug!("Token catalog cache cleared");
    }
}

#[async_trait]
impl TwoTierSource for TokenMetadataService {
    type Item = TokenMetadata;
    type Error = TokenMetadataError;

    async fn fetch_bulk(&self, keys: &[String]) -> Result<HashMap<String, TokenMetadata>, TokenMetadataError> {
        let catalog = self.catalog().await?;
        Ok(keys
            .iter()
            .filter_map(|mint| catalog.get(mint).map(|t| (mint.clone(), t.clone())))
            .collect())
    }

    async fn fetch_one(&self, key: &str) -> Result<Option<TokenMetadata>, TokenMetadataError> {
        self.catalog.fetch_token(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockCatalog {
        bulk_fails: bool,
        bulk_calls: AtomicU32,
        tokens: Vec<TokenMetadata>,
        failing_mints: Vec<&'static str>,
    }

    fn meta(address: &str, symbol: &str) -> TokenMetadata {
        TokenMetadata {
            address: address.to_string(),
            symbol: symbol.to_string(),
            name: format!("{} Token", symbol),
            decimals: Some(6),
            logo_uri: None,
        }
    }

    #[async_trait]
    impl TokenCatalog for MockCatalog {
        async fn fetch_catalog(&self) -> Result<Vec<TokenMetadata>, TokenMetadataError> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            if self.bulk_fails {
                return Err(TokenMetadataError::RateLimitExceeded);
            }
            Ok(self.tokens.clone())
        }

        async fn fetch_token(&self, mint: &str) -> Result<Option<TokenMetadata>, TokenMetadataError> {
            if self.failing_mints.contains(&mint) {
                return Err(TokenMetadataError::ApiError("boom".to_string()));
            }
            Ok(self.tokens.iter().find(|t| t.address == mint).cloned())
        }
    }

    fn service(catalog: MockCatalog) -> (Arc<MockCatalog>, TokenMetadataService) {
        let catalog = Arc::new(catalog);
        let service = TokenMetadataService::new(catalog.clone(), TokenMetadataSettings::default());
        (catalog, service)
    }

    #[tokio::test]
    async fn test_unknown_mint_gets_placeholder() {
        let (_, service) = service(MockCatalog {
            bulk_fails: false,
            bulk_calls: AtomicU32::new(0),
            tokens: vec![meta("M1", "ONE")],
            failing_mints: vec![],
        });

        let result = service.get_metadata(&["M1".to_string(), "M9".to_string()]).await;
        assert_eq!(result["M1"].symbol, "ONE");
        assert_eq!(result["M9"].symbol, UNKNOWN_SYMBOL);
        assert_eq!(result["M9"].name, UNKNOWN_NAME);
        assert!(result["M9"].logo_uri.is_none());
    }

    #[tokio::test]
    async fn test_catalog_is_cached_between_calls() {
        let (catalog, service) = service(MockCatalog {
            bulk_fails: false,
            bulk_calls: AtomicU32::new(0),
            tokens: vec![meta("M1", "ONE")],
            failing_mints: vec![],
        });

        service.get_metadata(&["M1".to_string()]).await;
        service.get_metadata(&["M1".to_string()]).await;
        assert_eq!(catalog.bulk_calls.load(Ordering::SeqCst), 1);

        service.clear_cache().await;
        service.get_metadata(&["M1".to_string()]).await;
        assert_eq!(catalog.bulk_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_bulk_returns_individually_resolved_subset() {
        let (_, service) = service(MockCatalog {
            bulk_fails: true,
            bulk_calls: AtomicU32::new(0),
            tokens: vec![meta("X", "EX"), meta("Y", "WHY")],
            failing_mints: vec!["Y"],
        });

        let result = service.get_metadata(&["X".to_string(), "Y".to_string()]).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result["X"].symbol, "EX");
        assert!(!result.contains_key("Y"));
    }

    #[tokio::test]
    async fn test_cold_cache_is_filled_once_for_concurrent_callers() {
        let (catalog, service) = service(MockCatalog {
            bulk_fails: false,
            bulk_calls: AtomicU32::new(0),
            tokens: vec![meta("M1", "ONE")],
            failing_mints: vec![],
        });

        let lookups = (0..5).map(|_| {
            let service = service.clone();
            async move { service.get_metadata(&["M1".to_string()]).await }
        });
        let results = futures::future::join_all(lookups).await;

        assert!(results.iter().all(|r| r["M1"].symbol == "ONE"));
        assert_eq!(catalog.bulk_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_bulk_fetch_is_remembered() {
        let (catalog, service) = service(MockCatalog {
            bulk_fails: true,
            bulk_calls: AtomicU32::new(0),
            tokens: vec![meta("X", "EX")],
            failing_mints: vec![],
        });

        let first = service.get_metadata(&["X".to_string()]).await;
        let second = service.get_metadata(&["X".to_string()]).await;

        assert_eq!(first["X"].symbol, "EX");
        assert_eq!(second["X"].symbol, "EX");
        assert_eq!(catalog.bulk_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_catalog_entry_deserializes() {
        let raw = r#"{"address":"M1","name":"One","symbol":"ONE","decimals":6,"logoURI":"https://img/one.png","tags":["verified"],"daily_volume":12.5}"#;
        let token: TokenMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(token.logo_uri.as_deref(), Some("https://img/one.png"));
        assert_eq!(token.decimals, Some(6));
    }
}
