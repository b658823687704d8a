//! # Upload Pipeline
//!
//! One signal upload, from raw CSV files to a session transition:
//!
//! 1. Reject empty files
//! 2. Archive the raw upload
//! 3. Estimator confidence, then inquiry confidence if the estimation is
//!    in the mid band
//! 4. Archive a negative sample if the inquiry contradicted the estimator
//! 5. Resolve the room (present only) and apply the disposition
//!
//! Any failure before step 5 leaves the store untouched. Step 5 runs on the
//! blocking pool and finishes even if the client goes away.

use crate::archive::Archive;
use crate::clients::ConfidenceClient;
use crate::config::Config;
use chrono::{DateTime, FixedOffset, Utc};
use roomwatch_core::report::local_date;
use roomwatch_core::{
    ConfidenceScore, Disposition, FusionPolicy, FusionStage, Observation, PresenceError,
    PresenceStateMachine, RedbStore, RoomChangePolicy, RoomId, RoomResolver, Transition, User,
    parse_ble_csv, parse_wifi_csv,
};
use std::borrow::Cow;
use std::sync::Arc;

// =============================================================================
// UPLOAD
// =============================================================================

/// The two CSV files of one upload, as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalUpload {
    pub wifi: Vec<u8>,
    pub ble: Vec<u8>,
}

impl SignalUpload {
    /// Both files must carry at least one byte.
    pub fn validate(&self) -> Result<(), PresenceError> {
        let mut empty = Vec::new();
        if self.wifi.is_empty() {
            empty.push("WiFi data file is empty");
        }
        if self.ble.is_empty() {
            empty.push("BLE data file is empty");
        }
        if empty.is_empty() {
            Ok(())
        } else {
            Err(PresenceError::InvalidInput(empty.join("; ")))
        }
    }

    pub fn wifi_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.wifi)
    }

    pub fn ble_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.ble)
    }

    /// Parsed `(ble, wifi)` observations.
    pub fn observations(&self) -> (Vec<Observation>, Vec<Observation>) {
        (
            parse_ble_csv(&self.ble_text()),
            parse_wifi_csv(&self.wifi_text()),
        )
    }
}

/// What one upload did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub score: ConfidenceScore,
    pub disposition: Disposition,
    /// Resolved room, present dispositions only.
    pub room: Option<RoomId>,
    pub transition: Transition,
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Everything an upload needs: the store, the confidence services, the
/// archive and the decision settings.
pub struct UploadPipeline {
    store: Arc<RedbStore>,
    clients: ConfidenceClient,
    archive: Archive,
    fusion: FusionPolicy,
    room_change: RoomChangePolicy,
    offset: FixedOffset,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<RedbStore>,
        clients: ConfidenceClient,
        archive: Archive,
        fusion: FusionPolicy,
        room_change: RoomChangePolicy,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            clients,
            archive,
            fusion,
            room_change,
            offset,
        }
    }

    /// Wire a pipeline from the loaded configuration.
    pub fn from_config(store: Arc<RedbStore>, config: &Config) -> Result<Self, PresenceError> {
        let clients = ConfidenceClient::new(config.endpoints(), config.dependency_timeout())?;
        Ok(Self::new(
            store,
            clients,
            Archive::new(&config.storage),
            config.fusion,
            config.room_change,
            config.utc_offset()?,
        ))
    }

    pub fn clients(&self) -> &ConfidenceClient {
        &self.clients
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Run one upload for `user`, stamped `now`.
    pub async fn process(
        &self,
        user: &User,
        upload: SignalUpload,
        now: DateTime<Utc>,
    ) -> Result<UploadOutcome, PresenceError> {
        upload.validate()?;

        let stamp = now.timestamp();
        let dir = self
            .archive
            .store_upload(local_date(now, self.offset), &user.username, stamp, &upload)
            .await?;
        tracing::debug!("Upload archived in {}", dir.display());

        let estimation = self.clients.estimate(&upload.ble, &upload.wifi, stamp).await?;
        let (disposition, score) = match self.fusion.stage(estimation) {
            FusionStage::Settled(disposition) => {
                (disposition, ConfidenceScore::new(estimation, None))
            }
            FusionStage::NeedsInquiry => {
                let inquiry = self
                    .clients
                    .inquire(&upload.wifi_text(), &upload.ble_text())
                    .await?;
                (
                    self.fusion.arbitrate(estimation, inquiry),
                    ConfidenceScore::new(estimation, Some(inquiry)),
                )
            }
        };
        tracing::info!(
            user = %user.username,
            estimation = score.estimation,
            inquiry = ?score.inquiry,
            ?disposition,
            "Confidence fused"
        );

        if disposition.requires_archive() {
            let dir = self.archive.store_negative_sample(stamp, &upload).await?;
            tracing::info!("Negative sample archived in {}", dir.display());
        }

        let store = Arc::clone(&self.store);
        let room_change = self.room_change;
        let user_id = user.user_id;
        let (room, transition) = tokio::task::spawn_blocking(move || {
            let room = if disposition.is_present() {
                let (ble, wifi) = upload.observations();
                Some(RoomResolver::new(store.as_ref()).resolve(&ble, &wifi)?)
            } else {
                None
            };
            let transition = PresenceStateMachine::new(store.as_ref(), room_change)
                .apply_disposition(user_id, disposition, room, now)?;
            Ok::<_, PresenceError>((room, transition))
        })
        .await
        .map_err(|e| PresenceError::Storage(format!("Session update task failed: {e}")))??;

        tracing::info!(
            user = %user.username,
            room = ?room.map(|r| r.0),
            ?transition,
            "Presence updated"
        );

        Ok(UploadOutcome {
            score,
            disposition,
            room,
            transition,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
