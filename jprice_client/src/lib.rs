// Jupiter Price Client and the combined metadata + price resolver

pub mod resolver;

pub use resolver::{MarketData, MarketDataResolver, ResolvedToken, PRICE_SOURCE};

use async_trait::async_trait;
use persistence_layer::PersistenceError;
use pnl_core::{PriceFetcher, Result as PnLResult};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum JupiterClientError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Invalid price data: {0}")]
    InvalidPriceData(String),
    #[error("Price fetch failed: {0}")]
    PriceFetch(String),
    #[error("Rate limit exceeded")]
    RateLimit,
    #[error("No price data found")]
    NoPriceData,
}

pub type Result<T> = std::result::Result<T, JupiterClientError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupiterClientConfig {
    pub price_api_url: String,
    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for JupiterClientConfig {
    fn default() -> Self {
        Self {
            price_api_url: "https://lite-api.jup.ag/price/v2".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

/// Jupiter price API response; unknown ids map to `null`
#[derive(Debug, Deserialize)]
pub struct JupiterPriceResponse {
    pub data: HashMap<String, Option<JupiterTokenPrice>>,
}

#[derive(Debug, Deserialize)]
pub struct JupiterTokenPrice {
    pub id: String,
    #[serde(rename = "type", default)]
    pub price_type: Option<String>,
    pub price: String,
}

fn parse_price(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Turn a raw response into USD prices, skipping null and unparseable entries
pub fn parse_jupiter_response(response: JupiterPriceResponse) -> HashMap<String, Decimal> {
    let mut output = HashMap::new();

    for (mint, info) in response.data {
        let Some(info) = info else {
            debug!("No Jupiter price for {}", mint);
            continue;
        };
        match parse_price(&info.price) {
            Some(price) => {
                output.insert(mint, price);
            }
            None => warn!("Failed to parse price for mint {}: '{}'", mint, info.price),
        }
    }

    output
}

#[derive(Clone)]
pub struct JupiterPriceClient {
    config: JupiterClientConfig,
    http_client: Client,
}

impl JupiterPriceClient {
    pub fn new(config: JupiterClientConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self { config, http_client })
    }

    /// One request for all `token_mints`, comma-joined into `ids`
    pub async fn fetch_token_prices(&self, token_mints: &[String]) -> Result<HashMap<String, Decimal>> {
        if token_mints.is_empty() {
            return Ok(HashMap::new());
        }

        let ids_param = token_mints.join(",");
        debug!("Fetching Jupiter prices for {} tokens", token_mints.len());

        let response = self
            .http_client
            .get(&self.config.price_api_url)
            .query(&[("ids", ids_param.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(JupiterClientError::RateLimit);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(JupiterClientError::InvalidPriceData(format!("HTTP {}: {}", status, text)));
        }

        let price_response: JupiterPriceResponse = response.json().await?;
        let prices = parse_jupiter_response(price_response);

        if prices.is_empty() {
            return Err(JupiterClientError::NoPriceData);
        }

        debug!("Parsed {} price entries", prices.len());
        Ok(prices)
    }
}

#[async_trait]
impl PriceFetcher for JupiterPriceClient {
    async fn fetch_prices(&self, token_mints: &[String]) -> PnLResult<HashMap<String, Decimal>> {
        self.fetch_token_prices(token_mints)
            .await
            .map_err(|e| pnl_core::PnLError::PriceFetch(e.to_string()))
    }
}
