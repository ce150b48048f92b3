use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::PnLError;

/// Outcome of the most recent fetch cycle for a wallet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Error,
    Pending,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Error => "error",
            FetchStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchStatus {
    type Err = PnLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(FetchStatus::Success),
            "error" => Ok(FetchStatus::Error),
            "pending" => Ok(FetchStatus::Pending),
            other => Err(PnLError::InvalidData(format!("unknown fetch status '{}'", other))),
        }
    }
}

/// A single token position held by a wallet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenHolding {
    pub mint: String,
    /// Decimal-adjusted amount
    pub amount: Decimal,
    pub decimals: u8,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub usd_value: Option<Decimal>,
}

impl TokenHolding {
    pub fn new(mint: impl Into<String>, amount: Decimal, decimals: u8) -> Self {
        Self {
            mint: mint.into(),
            amount,
            decimals,
            symbol: None,
            name: None,
            usd_value: None,
        }
    }
}

/// Cached balance state for one wallet. One record per address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletRecord {
    pub address: String,
    pub group_id: String,
    /// Native balance in SOL
    pub native_balance: Decimal,
    pub tokens: Vec<TokenHolding>,
    pub last_updated: DateTime<Utc>,
    pub status: FetchStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl WalletRecord {
    pub fn success(
        address: impl Into<String>,
        group_id: impl Into<String>,
        native_balance: Decimal,
        tokens: Vec<TokenHolding>,
    ) -> Self {
        Self {
            address: address.into(),
            group_id: group_id.into(),
            native_balance,
            tokens,
            last_updated: Utc::now(),
            status: FetchStatus::Success,
            error_message: None,
            retry_count: 0,
        }
    }

    /// Failed fetch: zero balance, no holdings, `retry_count` carried over from
    /// `previous` and incremented.
    pub fn failure(
        address: impl Into<String>,
        group_id: impl Into<String>,
        error_message: impl Into<String>,
        previous: Option<&WalletRecord>,
    ) -> Self {
        Self {
            address: address.into(),
            group_id: group_id.into(),
            native_balance: Decimal::ZERO,
            tokens: Vec::new(),
            last_updated: Utc::now(),
            status: FetchStatus::Error,
            error_message: Some(error_message.into()),
            retry_count: previous.map(|p| p.retry_count).unwrap_or(0).saturating_add(1),
        }
    }

    /// Sum of the enriched USD values of all token holdings (native excluded)
    pub fn token_usd_value(&self) -> Decimal {
        self.tokens.iter().filter_map(|t| t.usd_value).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPrice {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
    pub change_24h: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub image: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FetchOperation {
    Balance,
    Tokens,
    Metadata,
    Prices,
    Wallet,
    Snapshot,
}

impl FetchOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOperation::Balance => "balance",
            FetchOperation::Tokens => "tokens",
            FetchOperation::Metadata => "metadata",
            FetchOperation::Prices => "prices",
            FetchOperation::Wallet => "wallet",
            FetchOperation::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for FetchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchOperation {
    type Err = PnLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance" => Ok(FetchOperation::Balance),
            "tokens" => Ok(FetchOperation::Tokens),
            "metadata" => Ok(FetchOperation::Metadata),
            "prices" => Ok(FetchOperation::Prices),
            "wallet" => Ok(FetchOperation::Wallet),
            "snapshot" => Ok(FetchOperation::Snapshot),
            other => Err(PnLError::InvalidData(format!("unknown fetch operation '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
        }
    }
}

impl FromStr for LogStatus {
    type Err = PnLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LogStatus::Success),
            "error" => Ok(LogStatus::Error),
            other => Err(PnLError::InvalidData(format!("unknown log status '{}'", other))),
        }
    }
}

/// Append-only audit entry for one fetch attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchLogEntry {
    pub id: Uuid,
    /// Wallet address, or `"system"` for non-wallet operations
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub operation: FetchOperation,
    pub status: LogStatus,
    pub error_detail: Option<String>,
    pub latency_ms: u64,
}

impl FetchLogEntry {
    pub const SYSTEM_SUBJECT: &'static str = "system";

    pub fn success(subject: impl Into<String>, operation: FetchOperation, latency_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            timestamp: Utc::now(),
            operation,
            status: LogStatus::Success,
            error_detail: None,
            latency_ms,
        }
    }

    pub fn error(
        subject: impl Into<String>,
        operation: FetchOperation,
        detail: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            timestamp: Utc::now(),
            operation,
            status: LogStatus::Error,
            error_detail: Some(detail.into()),
            latency_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Manual,
    Scheduled,
    Initial,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Manual => "manual",
            SnapshotKind::Scheduled => "scheduled",
            SnapshotKind::Initial => "initial",
        }
    }
}

impl FromStr for SnapshotKind {
    type Err = PnLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SnapshotKind::Manual),
            "scheduled" => Ok(SnapshotKind::Scheduled),
            "initial" => Ok(SnapshotKind::Initial),
            other => Err(PnLError::InvalidData(format!("unknown snapshot kind '{}'", other))),
        }
    }
}

/// Immutable point-in-time capture of a wallet's valuation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    pub id: Uuid,
    pub address: String,
    pub timestamp: DateTime<Utc>,
    pub native_balance: Decimal,
    pub tokens: Vec<TokenHolding>,
    /// Token values plus the native balance valued at the native price
    pub total_usd_value: Decimal,
    pub kind: SnapshotKind,
}

impl PortfolioSnapshot {
    pub fn from_record(record: &WalletRecord, native_price: Decimal, kind: SnapshotKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: record.address.clone(),
            timestamp: Utc::now(),
            native_balance: record.native_balance,
            tokens: record.tokens.clone(),
            total_usd_value: record.native_balance * native_price + record.token_usd_value(),
            kind,
        }
    }

    /// Native value at capture time, recovered from the stored total
    pub fn native_usd_value(&self) -> Decimal {
        let tokens: Decimal = self.tokens.iter().filter_map(|t| t.usd_value).sum();
        (self.total_usd_value - tokens).max(Decimal::ZERO)
    }
}

/// Aggregate fetch-log counters over a time window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchStats {
    pub since: DateTime<Utc>,
    pub success_count: u64,
    pub error_count: u64,
    pub average_latency_ms: f64,
}

impl FetchStats {
    pub fn total(&self) -> u64 {
        self.success_count + self.error_count
    }

    /// Percentage of successful entries; 0 when nothing was logged
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.success_count as f64 / total as f64 * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_failure_increments_retry_count() {
        let first = WalletRecord::failure("addr", "g1", "rpc down", None);
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.status, FetchStatus::Error);
        assert_eq!(first.native_balance, Decimal::ZERO);
        assert!(first.tokens.is_empty());

        let second = WalletRecord::failure("addr", "g1", "rpc down", Some(&first));
        assert_eq!(second.retry_count, 2);
    }

    #[test]
    fn test_snapshot_total_includes_native() {
        let mut holding = TokenHolding::new("M1", dec!(100), 6);
        holding.usd_value = Some(dec!(50));
        let record = WalletRecord::success("addr", "g1", dec!(2.5), vec![holding]);

        let snapshot = PortfolioSnapshot::from_record(&record, dec!(100), SnapshotKind::Initial);
        assert_eq!(snapshot.total_usd_value, dec!(300));
        assert_eq!(snapshot.native_usd_value(), dec!(250));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [FetchStatus::Success, FetchStatus::Error, FetchStatus::Pending] {
            assert_eq!(status.as_str().parse::<FetchStatus>().unwrap(), status);
        }
        assert!("done".parse::<FetchStatus>().is_err());
    }

    #[test]
    fn test_success_rate_without_entries() {
        let stats = FetchStats {
            since: Utc::now(),
            success_count: 0,
            error_count: 0,
            average_latency_ms: 0.0,
        };
        assert_eq!(stats.success_rate(), 0.0);
    }
}
