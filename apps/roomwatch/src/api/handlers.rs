//! # API Handlers
//!
//! Store access runs on the blocking pool through [`run_blocking`]; redb
//! transactions never block a runtime worker.

use super::AppState;
use super::auth::AuthUser;
use super::types::{
    ApiResult, CurrentOccupantsResponse, HealthResponse, HistoryQuery, MessageResponse,
    PercentageResponse, PresenceHistoryResponse, UserHistoryResponse,
};
use crate::pipeline::SignalUpload;
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use roomwatch_core::{
    PresenceError, SessionStore, UserId, current_occupants, group_by_day, group_by_day_and_user,
};
use std::sync::Arc;

/// Run a store operation on the blocking pool.
pub(super) async fn run_blocking<T, F>(f: F) -> Result<T, PresenceError>
where
    F: FnOnce() -> Result<T, PresenceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PresenceError::Storage(format!("Store task failed: {e}")))?
}

// =============================================================================
// MULTIPART
// =============================================================================

/// Fields of an upload form. Unknown fields are ignored.
#[derive(Debug, Default)]
struct UploadForm {
    wifi: Option<Vec<u8>>,
    ble: Option<Vec<u8>>,
    room_id: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, PresenceError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| PresenceError::InvalidInput(format!("Malformed multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(|e| {
                PresenceError::InvalidInput(format!("Cannot read field '{name}': {e}"))
            })?;
            match name.as_str() {
                "wifi_data" => form.wifi = Some(bytes.to_vec()),
                "ble_data" => form.ble = Some(bytes.to_vec()),
                "room_id" => form.room_id = Some(String::from_utf8_lossy(&bytes).trim().to_string()),
                _ => {}
            }
        }
        Ok(form)
    }

    fn into_upload(self) -> Result<SignalUpload, PresenceError> {
        let wifi = self
            .wifi
            .ok_or_else(|| PresenceError::InvalidInput("Missing wifi_data file".to_string()))?;
        let ble = self
            .ble
            .ok_or_else(|| PresenceError::InvalidInput("Missing ble_data file".to_string()))?;
        Ok(SignalUpload { wifi, ble })
    }
}

// =============================================================================
// HEALTH
// =============================================================================

/// `GET /` and `GET /health`. 503 when the database does not answer.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let store = Arc::clone(&state.store);
    let available = run_blocking(move || store.ping()).await.is_ok();

    let response = HealthResponse::new(
        available,
        Utc::now().with_timezone(&state.pipeline.offset()),
    );
    let status = if response.is_ok() {
        StatusCode::OK
    } else {
        tracing::error!("Health check: database unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

// =============================================================================
// UPLOADS
// =============================================================================

/// `POST /api/signals/submit`: the full presence pipeline.
pub async fn submit_handler(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<MessageResponse>> {
    let upload = UploadForm::read(multipart).await?.into_upload()?;
    let outcome = state.pipeline.process(&user, upload, Utc::now()).await?;
    tracing::debug!(user = %user.username, ?outcome, "Upload processed");
    Ok(Json(MessageResponse::new("Signal data received")))
}

/// `POST /api/signals/server`: estimator confidence only, no session change.
pub async fn signals_server_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<PercentageResponse>> {
    let upload = UploadForm::read(multipart).await?.into_upload()?;
    let estimation = state
        .pipeline
        .clients()
        .estimate(&upload.ble, &upload.wifi, Utc::now().timestamp())
        .await?;
    tracing::info!(
        "Estimator at {} returned {}",
        state.pipeline.clients().estimation_url(),
        estimation
    );
    Ok(Json(PercentageResponse {
        percentage_processed: estimation,
    }))
}

/// `POST /api/fingerprint/collect`: store a labelled training sample.
pub async fn fingerprint_collect_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<MessageResponse>> {
    let mut form = UploadForm::read(multipart).await?;
    let raw_room = form
        .room_id
        .take()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| PresenceError::InvalidInput("Missing room_id".to_string()))?;
    let room: u64 = raw_room.parse().map_err(|_| {
        PresenceError::InvalidInput(format!("room_id must be an integer, got '{raw_room}'"))
    })?;
    let upload = form.into_upload()?;

    state
        .pipeline
        .archive()
        .store_fingerprint(room, Utc::now().timestamp(), &upload)
        .await?;

    let kind = if room == 0 { "negative" } else { "positive" };
    tracing::info!("Fingerprint sample stored: {} sample for room {}", kind, room);
    Ok(Json(MessageResponse::new("Fingerprint data received")))
}

// =============================================================================
// REPORTS
// =============================================================================

/// `GET /api/presence_history?date=YYYY-MM-DD`
pub async fn presence_history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<PresenceHistoryResponse>> {
    let offset = state.pipeline.offset();
    let since = query.since(Utc::now(), offset)?;

    let store = Arc::clone(&state.store);
    let sessions = run_blocking(move || store.all_since(since)).await?;

    Ok(Json(PresenceHistoryResponse {
        all_history: group_by_day_and_user(sessions, offset),
    }))
}

/// `GET /api/users/{id}/presence_history?date=YYYY-MM-DD`
pub async fn user_presence_history_handler(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<UserHistoryResponse>> {
    let offset = state.pipeline.offset();
    let since = query.since(Utc::now(), offset)?;

    let store = Arc::clone(&state.store);
    let user = UserId(user_id);
    let sessions = run_blocking(move || store.for_user(user, since)).await?;

    Ok(Json(UserHistoryResponse {
        user_id: user,
        history: group_by_day(sessions, offset),
    }))
}

/// `GET /api/current_occupants`
pub async fn current_occupants_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<CurrentOccupantsResponse>> {
    let store = Arc::clone(&state.store);
    let rooms = run_blocking(move || {
        let rooms = store.rooms()?;
        let open = store.open_sessions()?;
        let users = store.users()?;
        Ok(current_occupants(&rooms, &open, &users))
    })
    .await?;

    Ok(Json(CurrentOccupantsResponse { rooms }))
}
