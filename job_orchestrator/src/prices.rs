//! Re-resolution of cached prices that have gone stale.

use jprice_client::MarketDataResolver;
use persistence_layer::CacheStore;
use pnl_core::NATIVE_MINT;
use retry_utils::Shutdown;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::Result;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PriceRefreshOutcome {
    pub stale: usize,
    pub refreshed: usize,
}

#[derive(Clone)]
pub struct PriceRefresher {
    resolver: MarketDataResolver,
    store: Arc<dyn CacheStore>,
    stale_after_minutes: i64,
}

impl PriceRefresher {
    pub fn new(resolver: MarketDataResolver, store: Arc<dyn CacheStore>, stale_after_minutes: i64) -> Self {
        Self {
            resolver,
            store,
            stale_after_minutes,
        }
    }

    /// Re-resolve every stale price in one provider call
    pub async fn refresh_stale(&self) -> Result<PriceRefreshOutcome> {
        let stale = self.store.get_stale_token_prices(self.stale_after_minutes).await?;
        if stale.is_empty() {
            debug!("No stale prices");
            return Ok(PriceRefreshOutcome::default());
        }

        // the native mint is always added by the resolver
        let mints: Vec<String> = stale
            .iter()
            .map(|p| p.mint.clone())
            .filter(|m| m != NATIVE_MINT)
            .collect();

        let resolved = self.resolver.resolve(&mints).await?;
        let refreshed = stale.iter().filter(|p| resolved.contains_key(&p.mint)).count();

        info!("Refreshed {}/{} stale prices", refreshed, stale.len());
        Ok(PriceRefreshOutcome {
            stale: stale.len(),
            refreshed,
        })
    }

    /// Refresh on a fixed interval until `shutdown` fires
    pub async fn run_periodic(self, interval: Duration, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_stale().await {
                        warn!("Background price refresh failed: {}", e);
                    }
                }
                _ = shutdown.triggered() => {
                    info!("Stopping background price refresh");
                    break;
                }
            }
        }
    }
}
