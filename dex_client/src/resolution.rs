//! Two-tier lookup for providers that offer both a bulk endpoint and a
//! per-item endpoint.
//!
//! Tier 1 is a single coarse bulk request. When it fails, keys are resolved
//! one by one in fixed-size chunks: concurrent within a chunk, with a pause
//! between chunks.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of resolving a single key
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Resolved(T),
    /// The provider answered but does not know the key
    Unknown,
    /// The lookup itself failed
    Failed(String),
}

impl<T> Resolution<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    pub fn resolved(self) -> Option<T> {
        match self {
            Resolution::Resolved(value) => Some(value),
            _ => None,
        }
    }
}

#[async_trait]
pub trait TwoTierSource: Send + Sync {
    type Item: Send;
    type Error: Display + Send;

    /// Coarse lookup for all `keys` at once. Keys absent from the returned
    /// map are unknown to the provider.
    async fn fetch_bulk(&self, keys: &[String]) -> Result<HashMap<String, Self::Item>, Self::Error>;

    /// Fine-grained lookup of one key; `Ok(None)` when the provider does not know it.
    async fn fetch_one(&self, key: &str) -> Result<Option<Self::Item>, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct ChunkPolicy {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            chunk_delay: Duration::from_millis(100),
        }
    }
}

/// Resolve every key, bulk first, then per item if the bulk tier fails.
/// Duplicate keys are resolved once.
pub async fn resolve_two_tier<S>(
    source: &S,
    keys: &[String],
    policy: &ChunkPolicy,
) -> HashMap<String, Resolution<S::Item>>
where
    S: TwoTierSource + ?Sized,
{
    let mut unique: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        if !unique.contains(key) {
            unique.push(key.clone());
        }
    }
    if unique.is_empty() {
        return HashMap::new();
    }

    match source.fetch_bulk(&unique).await {
        Ok(mut found) => {
            debug!(requested = unique.len(), found = found.len(), "Bulk lookup succeeded");
            unique
                .into_iter()
                .map(|key| {
                    let resolution = match found.remove(&key) {
                        Some(item) => Resolution::Resolved(item),
                        None => Resolution::Unknown,
                    };
                    (key, resolution)
                })
                .collect()
        }
        Err(e) => {
            warn!("Bulk lookup failed, falling back to per-item requests for {} keys: {}", unique.len(), e);
            resolve_per_item(source, unique, policy).await
        }
    }
}

async fn resolve_per_item<S>(
    source: &S,
    keys: Vec<String>,
    policy: &ChunkPolicy,
) -> HashMap<String, Resolution<S::Item>>
where
    S: TwoTierSource + ?Sized,
{
    let chunk_size = policy.chunk_size.max(1);
    let chunk_count = keys.len().div_ceil(chunk_size);
    let mut results = HashMap::with_capacity(keys.len());

    for (i, chunk) in keys.chunks(chunk_size).enumerate() {
        let lookups = chunk.iter().map(|key| async move {
            let resolution = match source.fetch_one(key).await {
                Ok(Some(item)) => Resolution::Resolved(item),
                Ok(None) => Resolution::Unknown,
                Err(e) => {
                    warn!("Per-item lookup failed for {}: {}", key, e);
                    Resolution::Failed(e.to_string())
                }
            };
            (key.clone(), resolution)
        });
        results.extend(join_all(lookups).await);

        if i + 1 < chunk_count {
            tokio::time::sleep(policy.chunk_delay).await;
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    struct Source {
        bulk_fails: bool,
        known: Vec<&'static str>,
        broken: Vec<&'static str>,
        single_calls: AtomicU32,
    }

    #[async_trait]
    impl TwoTierSource for Source {
        type Item = String;
        type Error = String;

        async fn fetch_bulk(&self, keys: &[String]) -> Result<HashMap<String, String>, String> {
            if self.bulk_fails {
                return Err("bulk endpoint down".to_string());
            }
            Ok(keys
                .iter()
                .filter(|k| self.known.contains(&k.as_str()))
                .map(|k| (k.clone(), k.to_lowercase()))
                .collect())
        }

        async fn fetch_one(&self, key: &str) -> Result<Option<String>, String> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            if self.broken.contains(&key) {
                return Err(format!("{} timed out", key));
            }
            Ok(self.known.contains(&key).then(|| key.to_lowercase()))
        }
    }

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn test_bulk_tier_marks_missing_keys_unknown() {
        let source = Source {
            bulk_fails: false,
            known: vec!["X"],
            broken: vec![],
            single_calls: AtomicU32::new(0),
        };
        let results = resolve_two_tier(&source, &keys(&["X", "Y", "X"]), &ChunkPolicy::default()).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results["X"], Resolution::Resolved("x".to_string()));
        assert_eq!(results["Y"], Resolution::Unknown);
        assert_eq!(source.single_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_returns_partial_results() {
        let source = Source {
            bulk_fails: true,
            known: vec!["X", "Y"],
            broken: vec!["Y"],
            single_calls: AtomicU32::new(0),
        };
        let results = resolve_two_tier(&source, &keys(&["X", "Y"]), &ChunkPolicy::default()).await;

        assert_eq!(results["X"], Resolution::Resolved("x".to_string()));
        assert!(matches!(results["Y"], Resolution::Failed(_)));
        assert_eq!(source.single_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_pauses_between_chunks_only() {
        let source = Source {
            bulk_fails: true,
            known: vec![],
            broken: vec![],
            single_calls: AtomicU32::new(0),
        };
        let all: Vec<String> = (0..25).map(|i| format!("K{}", i)).collect();
        let start = Instant::now();

        let results = resolve_two_tier(&source, &all, &ChunkPolicy::default()).await;

        assert_eq!(results.len(), 25);
        assert!(results.values().all(|r| *r == Resolution::Unknown));
        // three chunks, two pauses
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }
}
