//! Wallet balance reads routed through the shared fetch queue, with retry and
//! an inline public-RPC fallback.

use pnl_core::{TokenHolding, LAMPORTS_PER_SOL};
use retry_utils::{retry_with_backoff_while, FetchQueue, RetryConfig};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    AccountDataProvider, Result, SolanaClientError, TokenAccount, TOKEN_2022_PROGRAM_ID, TOKEN_PROGRAM_ID,
};

#[derive(Clone)]
pub struct BalanceReader {
    primary: Arc<dyn AccountDataProvider>,
    fallback: Option<Arc<dyn AccountDataProvider>>,
    queue: FetchQueue,
    retry: RetryConfig,
}

impl BalanceReader {
    pub fn new(
        primary: Arc<dyn AccountDataProvider>,
        fallback: Option<Arc<dyn AccountDataProvider>>,
        queue: FetchQueue,
        retry: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            queue,
            retry,
        }
    }

    pub async fn fetch_native_balance(&self, address: &str) -> Result<Decimal> {
        let owner = address.to_string();
        let lamports = self
            .call("getBalance", move |provider: Arc<dyn AccountDataProvider>| {
                let owner = owner.clone();
                async move { provider.get_balance(&owner).await }
            })
            .await?;
        Ok(Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL))
    }

    /// Non-zero holdings across both token programs, one entry per mint
    pub async fn fetch_token_holdings(&self, address: &str) -> Result<Vec<TokenHolding>> {
        let (legacy, token_2022) = tokio::try_join!(
            self.fetch_token_accounts(address, TOKEN_PROGRAM_ID),
            self.fetch_token_accounts(address, TOKEN_2022_PROGRAM_ID),
        )?;

        let holdings = merge_token_accounts(legacy.into_iter().chain(token_2022));
        debug!(address, holdings = holdings.len(), "Fetched token holdings");
        Ok(holdings)
    }

    async fn fetch_token_accounts(&self, address: &str, program_id: &'static str) -> Result<Vec<TokenAccount>> {
        let owner = address.to_string();
        self.call("getTokenAccountsByOwner", move |provider: Arc<dyn AccountDataProvider>| {
            let owner = owner.clone();
            async move { provider.get_token_accounts_by_owner(&owner, program_id).await }
        })
        .await
    }

    /// Each retry attempt is one queued operation: primary first, then the
    /// fallback within the same attempt. Shutdown cancellation is not retried.
    async fn call<T, F, Fut>(&self, method: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn AccountDataProvider>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        retry_with_backoff_while(
            || {
                let primary = self.primary.clone();
                let fallback = self.fallback.clone();
                let op = op.clone();
                let queue = self.queue.clone();
                async move {
                    queue
                        .submit(move || with_fallback(method, primary, fallback, op))
                        .await
                        .map_err(|_| SolanaClientError::Cancelled)?
                }
            },
            &self.retry,
            |e| !matches!(e, SolanaClientError::Cancelled),
        )
        .await
    }
}

async fn with_fallback<T, F, Fut>(
    method: &'static str,
    primary: Arc<dyn AccountDataProvider>,
    fallback: Option<Arc<dyn AccountDataProvider>>,
    op: F,
) -> Result<T>
where
    F: Fn(Arc<dyn AccountDataProvider>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let primary_err = match op(primary.clone()).await {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let Some(fallback) = fallback else {
        return Err(primary_err);
    };

    warn!(
        method,
        primary = primary.name(),
        fallback = fallback.name(),
        "Primary provider failed, trying fallback: {}",
        primary_err
    );

    op(fallback).await.map_err(|fallback_err| SolanaClientError::AllProvidersFailed {
        primary: primary_err.to_string(),
        fallback: fallback_err.to_string(),
    })
}

/// Drop empty accounts and sum accounts sharing a mint, keeping first-seen order
pub fn merge_token_accounts(accounts: impl IntoIterator<Item = TokenAccount>) -> Vec<TokenHolding> {
    let mut holdings: Vec<TokenHolding> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for account in accounts {
        if account.ui_amount.is_zero() {
            continue;
        }
        match index.get(&account.mint) {
            Some(&i) => holdings[i].amount += account.ui_amount,
            None => {
                index.insert(account.mint.clone(), holdings.len());
                holdings.push(TokenHolding::new(account.mint, account.ui_amount, account.decimals));
            }
        }
    }

    holdings
}
