use chrono::{DateTime, Utc};
use job_orchestrator::BatchSummary;
use persistence_layer::HealthStatus;
use pnl_core::FetchStats;
use serde::{Deserialize, Serialize};

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Standard API success response
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: HealthStatus,
    /// Fetch outcomes over the last 24 hours
    pub fetch_stats: Option<FetchStats>,
    pub refresh_running: bool,
}

/// Fetch metrics over a time window
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub since: DateTime<Utc>,
    pub success_count: u64,
    pub error_count: u64,
    pub total: u64,
    /// Percentage of successful fetches, 0 when there were none
    pub success_rate: f64,
    pub average_latency_ms: f64,
}

impl From<FetchStats> for MetricsResponse {
    fn from(stats: FetchStats) -> Self {
        Self {
            since: stats.since,
            success_count: stats.success_count,
            error_count: stats.error_count,
            total: stats.total(),
            success_rate: stats.success_rate(),
            average_latency_ms: stats.average_latency_ms,
        }
    }
}

/// Query parameters for list endpoints
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

impl LimitQuery {
    pub const DEFAULT: u32 = 100;
    pub const MAX: u32 = 1000;

    pub fn resolve(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT).clamp(1, Self::MAX)
    }
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub top: Option<usize>,
}

/// Accepted refresh trigger
#[derive(Debug, Serialize)]
pub struct RefreshAccepted {
    pub wallet_count: usize,
    pub invalid_addresses: usize,
    pub started_at: DateTime<Utc>,
}

/// State of the most recent refresh run
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStatus {
    pub running: bool,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_summary: Option<BatchSummary>,
}
