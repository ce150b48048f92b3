//! One-shot ingestion worker.
//!
//! Usage: `wallet_pnl_tracker [refresh|stale|prices|snapshot] [config.toml]`

use anyhow::{bail, Context};
use config_manager::SystemConfig;
use job_orchestrator::{BatchSummary, Services};
use pnl_core::SnapshotKind;
use retry_utils::shutdown_channel;
use std::str::FromStr;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Fetch every wallet in the address list
    Refresh,
    /// Fetch only wallets that are missing, failed, or older than the stale window
    Stale,
    /// Re-resolve stale prices
    Prices,
    /// Snapshot every stored wallet
    Snapshot,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "refresh" => Ok(Mode::Refresh),
            "stale" => Ok(Mode::Stale),
            "prices" => Ok(Mode::Prices),
            "snapshot" => Ok(Mode::Snapshot),
            other => bail!("unknown mode '{}' (expected refresh, stale, prices or snapshot)", other),
        }
    }
}

fn init_tracing(config: &SystemConfig) {
    let default_filter = if config.system.debug_mode {
        "debug"
    } else {
        "info,job_orchestrator=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if config.system.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn report(summary: &BatchSummary) {
    info!(
        "Run complete: {} successful, {} failed, {} skipped",
        summary.successful, summary.failed, summary.skipped
    );
    for message in &summary.errors {
        warn!("{}", message);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let mode = match args.next() {
        Some(arg) => Mode::from_str(&arg)?,
        None => Mode::Refresh,
    };
    let config = match args.next() {
        Some(path) => SystemConfig::load_from_path(path)?,
        None => SystemConfig::load()?,
    };
    init_tracing(&config);
    info!("Running in {:?} mode", mode);

    let (shutdown_trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current chunk");
            shutdown_trigger.trigger();
        }
    });

    let services = Services::from_config(config.clone(), shutdown)
        .await
        .context("failed to initialise services")?;

    match mode {
        Mode::Refresh | Mode::Stale => {
            let addresses = services.load_targets()?;
            for invalid in &addresses.invalid {
                error!("Line {}: {} ({})", invalid.line, invalid.address, invalid.reason);
            }

            let summary = if mode == Mode::Refresh {
                services
                    .orchestrator
                    .run_batch(&addresses.wallets, config.batch.batch_size)
                    .await?
            } else {
                let max_age = chrono::Duration::minutes(config.batch.stale_after_minutes);
                services.orchestrator.run_stale(&addresses.wallets, max_age).await?
            };
            report(&summary);
        }
        Mode::Prices => {
            let outcome = services.prices.refresh_stale().await?;
            info!("Refreshed {} of {} stale prices", outcome.refreshed, outcome.stale);
        }
        Mode::Snapshot => {
            let snapshots = services.snapshots.snapshot_all(SnapshotKind::Scheduled).await?;
            info!("Stored {} snapshots", snapshots.len());
        }
    }

    Ok(())
}
