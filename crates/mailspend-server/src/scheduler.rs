//! Background schedulers
//!
//! Three interval loops, each spawned as a tokio task that runs for the
//! life of the process:
//!
//! - sync scheduler: one orchestrator pass over accounts due for sync
//! - token sweep: refresh expired tokens and purge stale OAuth states
//! - materializer: drain high-confidence candidates into the ledger
//!
//! A failing pass is logged and the loop keeps ticking; one bad interval
//! never takes a scheduler down.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use mailspend_core::{LedgerClient, Materializer, StateStore, SyncOrchestrator};

/// Start the periodic sync pass as a background task
pub fn start_sync_scheduler(sync: SyncOrchestrator) {
    let every = sync.config().sync_interval;
    info!(
        "Starting sync scheduler: every {} seconds",
        every.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = interval(every);

        // Skip the first immediate tick - accounts connected moments ago
        // should not all sync at startup
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match sync.run_once().await {
                Ok(0) => {}
                Ok(synced) => info!("Scheduled sync completed: {} account(s)", synced),
                Err(e) => error!("Scheduled sync failed: {}", e),
            }
        }
    });
}

/// Start the hourly token sweep as a background task
///
/// Also purges expired pending OAuth states so abandoned flows do not
/// accumulate.
pub fn start_token_sweep(sync: SyncOrchestrator, auth_states: Arc<StateStore>) {
    let every = sync.config().token_sweep_interval;
    info!(
        "Starting token sweep: every {} seconds",
        every.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            auth_states.purge_expired();

            match sync.force_refresh_expired().await {
                Ok(0) => {}
                Ok(refreshed) => info!("Token sweep refreshed {} account(s)", refreshed),
                Err(e) => error!("Token sweep failed: {}", e),
            }
        }
    });
}

/// Start the materializer as a background task
pub fn start_materializer<L>(materializer: Materializer<L>, every: Duration)
where
    L: LedgerClient + 'static,
{
    info!(
        "Starting materializer: every {} seconds",
        every.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match materializer.run_once().await {
                Ok(0) => {}
                Ok(created) => info!("Materialized {} candidate(s)", created),
                Err(e) => error!("Materializer pass failed: {}", e),
            }
        }
    });
}
