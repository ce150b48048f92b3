// Solana JSON-RPC client for wallet balance reads

pub mod address;
pub mod balances;

pub use address::{validate_address, WalletAddress};
pub use balances::BalanceReader;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Legacy SPL Token program
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
/// Token-2022 program
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";
pub const DEFAULT_FALLBACK_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

#[derive(Error, Debug)]
pub enum SolanaClientError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("All providers failed (primary: {primary}; fallback: {fallback})")]
    AllProvidersFailed { primary: String, fallback: String },
    #[error("Request cancelled by shutdown")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SolanaClientError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaClientConfig {
    pub rpc_url: String,
    /// Request timeout in seconds
    pub rpc_timeout_seconds: u64,
}

impl Default for SolanaClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_FALLBACK_RPC_URL.to_string(),
            rpc_timeout_seconds: 30,
        }
    }
}

/// Solana RPC response envelope
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// One token account owned by a wallet, as reported by `getTokenAccountsByOwner`
#[derive(Debug, Clone, PartialEq)]
pub struct TokenAccount {
    pub pubkey: String,
    pub mint: String,
    /// Decimal-adjusted (`uiAmount`)
    pub ui_amount: Decimal,
    pub decimals: u8,
}

/// Read access to on-chain account state
#[async_trait]
pub trait AccountDataProvider: Send + Sync {
    /// Label used in logs
    fn name(&self) -> &str;

    /// Native balance in lamports
    async fn get_balance(&self, address: &str) -> Result<u64>;

    async fn get_token_accounts_by_owner(&self, owner: &str, program_id: &str) -> Result<Vec<TokenAccount>>;
}

#[derive(Debug, Deserialize)]
struct ContextValue<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct KeyedAccount {
    pubkey: String,
    account: AccountBody,
}

#[derive(Debug, Deserialize)]
struct AccountBody {
    data: ParsedData,
}

#[derive(Debug, Deserialize)]
struct ParsedData {
    parsed: ParsedAccount,
}

#[derive(Debug, Deserialize)]
struct ParsedAccount {
    info: ParsedTokenInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParsedTokenInfo {
    mint: String,
    token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiTokenAmount {
    decimals: u8,
    ui_amount: Option<f64>,
    ui_amount_string: Option<String>,
}

/// Decode the `value` array of a `jsonParsed` token-accounts response
pub fn parse_token_accounts(result: Value) -> Result<Vec<TokenAccount>> {
    let parsed: ContextValue<Vec<KeyedAccount>> = serde_json::from_value(result)?;

    parsed
        .value
        .into_iter()
        .map(|keyed| {
            let info = keyed.account.data.parsed.info;
            let ui_amount = match (&info.token_amount.ui_amount_string, info.token_amount.ui_amount) {
                (Some(s), _) => Decimal::from_str(s)
                    .map_err(|e| SolanaClientError::InvalidResponse(format!("bad uiAmountString '{}': {}", s, e)))?,
                (None, Some(f)) => Decimal::try_from(f)
                    .map_err(|e| SolanaClientError::InvalidResponse(format!("bad uiAmount {}: {}", f, e)))?,
                (None, None) => Decimal::ZERO,
            };
            Ok(TokenAccount {
                pubkey: keyed.pubkey,
                mint: info.mint,
                ui_amount,
                decimals: info.token_amount.decimals,
            })
        })
        .collect()
}

/// JSON-RPC client bound to a single endpoint
#[derive(Clone)]
pub struct SolanaClient {
    name: String,
    config: SolanaClientConfig,
    http_client: Client,
    request_id_counter: Arc<AtomicU64>,
}

impl SolanaClient {
    pub fn new(name: impl Into<String>, config: SolanaClientConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_seconds))
            .build()?;

        Ok(Self {
            name: name.into(),
            config,
            http_client,
            request_id_counter: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.config.rpc_url
    }

    fn next_request_id(&self) -> u64 {
        self.request_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn rpc_request(&self, method: &str, params: Value) -> Result<Value> {
        let request_body = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": method,
            "params": params
        });

        debug!(provider = %self.name, method, "Sending RPC request");

        let response = self.http_client
            .post(&self.config.rpc_url)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SolanaClientError::InvalidResponse(format!(
                "HTTP {} from {}",
                response.status(),
                method
            )));
        }

        let rpc_response: RpcResponse<Value> = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(SolanaClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        rpc_response
            .result
            .ok_or_else(|| SolanaClientError::InvalidResponse(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl AccountDataProvider for SolanaClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_balance(&self, address: &str) -> Result<u64> {
        let result = self.rpc_request("getBalance", json!([address, { "commitment": "confirmed" }])).await?;
        let parsed: ContextValue<u64> = serde_json::from_value(result)?;
        Ok(parsed.value)
    }

    async fn get_token_accounts_by_owner(&self, owner: &str, program_id: &str) -> Result<Vec<TokenAccount>> {
        let result = self
            .rpc_request(
                "getTokenAccountsByOwner",
                json!([
                    owner,
                    { "programId": program_id },
                    { "encoding": "jsonParsed", "commitment": "confirmed" }
                ]),
            )
            .await?;
        parse_token_accounts(result)
    }
}
