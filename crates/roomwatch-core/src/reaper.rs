//! # Stale Session Reaper
//!
//! Force-closes sessions of users who stopped uploading.
//!
//! One sweep computes `cutoff = now - threshold`, lists open sessions with
//! `last_seen < cutoff`, and closes each at `now` (the sweep time, not the
//! last upload time). The close is conditioned on the session still being
//! idle, so a heartbeat that lands between the scan and the close wins.
//!
//! Scheduling is the caller's business; the binary runs one sweep per tick.

use crate::primitives::INACTIVITY_THRESHOLD_SECS;
use crate::store::SessionStore;
use crate::{PresenceError, PresenceSession, UserId};
use chrono::{DateTime, Duration, Utc};

/// Result of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Sessions closed by this sweep.
    pub closed: Vec<PresenceSession>,
    /// Sessions that were idle at scan time but refreshed before the close.
    pub revived: usize,
    /// Per-user close failures. They do not abort the sweep; the session is
    /// picked up again on the next one.
    pub failures: Vec<(UserId, PresenceError)>,
}

impl SweepReport {
    /// Whether every stale session found was handled.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sweeps a [`SessionStore`] for sessions idle longer than a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleSessionReaper {
    threshold: Duration,
}

impl Default for StaleSessionReaper {
    fn default() -> Self {
        Self::new(Duration::seconds(INACTIVITY_THRESHOLD_SECS))
    }
}

impl StaleSessionReaper {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Sessions last seen strictly before this instant are stale at `now`.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Run one sweep.
    ///
    /// # Errors
    ///
    /// Only a failed scan is an error. Failed closes are collected in the
    /// report.
    pub fn sweep<S: SessionStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, PresenceError> {
        let cutoff = self.cutoff(now);
        let stale = store.open_idle_since(cutoff)?;

        let mut report = SweepReport::default();
        for session in stale {
            match store.close_if_idle(session.user_id, cutoff, now) {
                Ok(Some(closed)) => report.closed.push(closed),
                Ok(None) => report.revived += 1,
                Err(e) => report.failures.push((session.user_id, e)),
            }
        }
        Ok(report)
    }
}

// =============================================================================
// TESTS
// =============================================================================
