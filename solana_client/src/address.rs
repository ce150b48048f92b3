use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

use crate::SolanaClientError;

/// A base58 Solana public key that has passed [`validate_address`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for WalletAddress {
    type Err = SolanaClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_address(s)
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        validate_address(&raw).map_err(serde::de::Error::custom)
    }
}

/// Check that `input` is a well-formed Solana public key. No network access.
pub fn validate_address(input: &str) -> Result<WalletAddress, SolanaClientError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SolanaClientError::InvalidAddress {
            address: input.to_string(),
            reason: "address is empty".to_string(),
        });
    }

    match Pubkey::from_str(trimmed) {
        Ok(pubkey) => Ok(WalletAddress(pubkey.to_string())),
        Err(e) => Err(SolanaClientError::InvalidAddress {
            address: trimmed.to_string(),
            reason: e.to_string(),
        }),
    }
}
