use crate::types::*;
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{Duration, Utc};
use pnl_core::{SnapshotKind, DEFAULT_TOP_N};
use solana_client::validate_address;
use tracing::{error, info, warn};

fn checked_address(raw: &str) -> Result<String, ApiError> {
    validate_address(raw)
        .map(|a| a.into_inner())
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.services.store.health_check().await;

    let fetch_stats = match state
        .services
        .store
        .get_fetch_stats(Utc::now() - Duration::hours(24))
        .await
    {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("Fetch stats unavailable for health check: {}", e);
            None
        }
    };

    let status_code = if store.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: store.status.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        store,
        fetch_stats,
        refresh_running: state.services.orchestrator.is_running(),
    };

    (status_code, Json(SuccessResponse::new(response)))
}

/// Current configuration with credentials stripped
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(SuccessResponse::new(state.services.config.to_redacted_json()))
}

pub async fn list_wallets(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let wallets = state.services.store.get_all_wallet_balances().await?;
    Ok(Json(SuccessResponse::new(wallets)))
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let address = checked_address(&address)?;
    match state.services.store.get_wallet_balance(&address).await? {
        Some(record) => Ok(Json(SuccessResponse::new(record))),
        None => Err(ApiError::NotFound(format!("Wallet {} has not been fetched", address))),
    }
}

pub async fn list_prices(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let prices = state.services.store.get_all_token_prices().await?;
    Ok(Json(SuccessResponse::new(prices)))
}

pub async fn recent_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state.services.store.get_recent_fetch_logs(query.resolve()).await?;
    Ok(Json(SuccessResponse::new(logs)))
}

pub async fn error_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state.services.store.get_error_logs(query.resolve()).await?;
    Ok(Json(SuccessResponse::new(logs)))
}

/// Fetch metrics for the last 24 hours
pub async fn get_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .services
        .store
        .get_fetch_stats(Utc::now() - Duration::hours(24))
        .await?;
    Ok(Json(SuccessResponse::new(MetricsResponse::from(stats))))
}

pub async fn combined_pnl(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let top_n = query.top.unwrap_or(DEFAULT_TOP_N);
    let pnl = state.services.pnl.combined_pnl(top_n).await?;
    Ok(Json(SuccessResponse::new(pnl)))
}

pub async fn wallet_pnl(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let address = checked_address(&address)?;
    let pnl = state.services.pnl.wallet_pnl(&address).await?;
    Ok(Json(SuccessResponse::new(pnl)))
}

pub async fn wallet_snapshots(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let address = checked_address(&address)?;
    let snapshots = state
        .services
        .store
        .get_portfolio_snapshots(&address, query.resolve())
        .await?;
    Ok(Json(SuccessResponse::new(snapshots)))
}

/// Snapshot every wallet now
pub async fn take_snapshots(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let snapshots = state.services.snapshots.snapshot_all(SnapshotKind::Manual).await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(snapshots))))
}

pub async fn refresh_prices(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.services.prices.refresh_stale().await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

/// Start a batch run over the configured address list in the background
pub async fn trigger_refresh(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let permit = state.services.orchestrator.try_start()?;
    let addresses = state.services.load_targets()?;

    let started_at = Utc::now();
    {
        let mut status = state.refresh_status.write().await;
        status.running = true;
        status.last_started_at = Some(started_at);
    }

    let accepted = RefreshAccepted {
        wallet_count: addresses.wallets.len(),
        invalid_addresses: addresses.invalid.len(),
        started_at,
    };
    info!("Refresh accepted for {} wallets", accepted.wallet_count);

    let task_state = state.clone();
    tokio::spawn(async move {
        let orchestrator = &task_state.services.orchestrator;
        let summary = orchestrator
            .run_with_permit(permit, &addresses.wallets, orchestrator.settings().batch_size)
            .await;
        if summary.failed > 0 {
            error!("Refresh finished with {} failed wallets", summary.failed);
        }

        let mut status = task_state.refresh_status.write().await;
        status.running = false;
        status.last_finished_at = Some(Utc::now());
        status.last_summary = Some(summary);
    });

    Ok((StatusCode::ACCEPTED, Json(SuccessResponse::new(accepted))))
}

pub async fn refresh_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.refresh_status.read().await.clone();
    Json(SuccessResponse::new(status))
}
