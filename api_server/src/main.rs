use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use config_manager::SystemConfig;
use job_orchestrator::{OrchestratorError, Services};
use persistence_layer::PersistenceError;
use pnl_core::PnLError;
use retry_utils::shutdown_channel;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

mod handlers;
mod types;

use handlers::*;
use types::*;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub started_at: Instant,
    pub refresh_status: Arc<RwLock<RefreshStatus>>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            started_at: Instant::now(),
            refresh_status: Arc::new(RwLock::new(RefreshStatus {
                running: false,
                last_started_at: None,
                last_finished_at: None,
                last_summary: None,
            })),
        }
    }
}

/// Main application error type
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Orchestrator(e) => match e {
                OrchestratorError::AlreadyRunning => StatusCode::CONFLICT,
                OrchestratorError::WalletNotFound(_) | OrchestratorError::PnL(PnLError::MissingBasis(_)) => {
                    StatusCode::NOT_FOUND
                }
                OrchestratorError::InvalidAddress { .. } => StatusCode::BAD_REQUEST,
                OrchestratorError::JupiterClient(_) | OrchestratorError::SolanaClient(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

fn init_tracing(config: &SystemConfig) {
    let default_filter = if config.system.debug_mode {
        "debug"
    } else {
        "info,api_server=debug,job_orchestrator=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if config.system.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = SystemConfig::load()?;
    init_tracing(&config);
    info!("Starting wallet tracker API server...");
    info!("Configuration loaded successfully");

    let (shutdown_trigger, shutdown) = shutdown_channel();
    let services = Services::from_config(config.clone(), shutdown.clone()).await?;
    info!("Services initialized");

    if config.prices.refresh_interval_seconds > 0 {
        let refresher = services.prices.clone();
        let interval = Duration::from_secs(config.prices.refresh_interval_seconds);
        tokio::spawn(refresher.run_periodic(interval, shutdown.clone()));
        info!("Background price refresh every {:?}", interval);
    }

    let app = create_router(AppState::new(services));

    let bind_addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            shutdown_trigger.trigger();
        })
        .await?;

    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/config", get(get_config))
        // Cached state
        .route("/api/wallets", get(list_wallets))
        .route("/api/wallets/:address", get(get_wallet))
        .route("/api/prices", get(list_prices))
        .route("/api/logs", get(recent_logs))
        .route("/api/logs/errors", get(error_logs))
        .route("/api/metrics", get(get_metrics))
        .route("/api/pnl", get(combined_pnl))
        .route("/api/pnl/:address", get(wallet_pnl))
        .route("/api/snapshots", post(take_snapshots))
        .route("/api/snapshots/:address", get(wallet_snapshots))
        // Triggers
        .route("/api/refresh", post(trigger_refresh).get(refresh_status))
        .route("/api/prices/refresh", post(refresh_prices))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()).into_inner())
        .with_state(state)
}
