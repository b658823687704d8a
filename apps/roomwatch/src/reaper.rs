//! # Reaper Task
//!
//! Runs [`StaleSessionReaper`] sweeps on a fixed tick until cancelled. The
//! first sweep happens one tick after startup.

use chrono::Utc;
use roomwatch_core::{PresenceError, SessionStore, StaleSessionReaper, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Sweep `store` every `tick` until `cancel` fires.
pub async fn run_reaper<S>(
    store: Arc<S>,
    reaper: StaleSessionReaper,
    tick: Duration,
    cancel: CancellationToken,
) where
    S: SessionStore + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        "Reaper started: tick {}s, inactivity threshold {}s",
        tick.as_secs(),
        reaper.threshold().num_seconds()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweep_once(Arc::clone(&store), reaper).await {
                    Ok(report) => log_report(&report),
                    Err(e) => tracing::error!("Reaper sweep failed: {}", e),
                }
            }
            () = cancel.cancelled() => {
                tracing::info!("Reaper shutting down");
                break;
            }
        }
    }
}

/// One sweep on the blocking pool, stamped with the current time.
pub async fn sweep_once<S>(
    store: Arc<S>,
    reaper: StaleSessionReaper,
) -> Result<SweepReport, PresenceError>
where
    S: SessionStore + 'static,
{
    tokio::task::spawn_blocking(move || reaper.sweep(store.as_ref(), Utc::now()))
        .await
        .map_err(|e| PresenceError::Storage(format!("Reaper task failed: {e}")))?
}

fn log_report(report: &SweepReport) {
    for session in &report.closed {
        tracing::info!(
            user = session.user_id.0,
            room = session.room_id.0,
            "Closed idle session {}",
            session.session_id
        );
    }
    if report.revived > 0 {
        tracing::debug!("{} idle sessions refreshed before close", report.revived);
    }
    for (user, e) in &report.failures {
        tracing::error!(user = user.0, "Failed to close idle session: {}", e);
    }
}

// =============================================================================
// TESTS
// =============================================================================
