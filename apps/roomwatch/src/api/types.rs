//! # API Request/Response Types
//!
//! JSON bodies of the HTTP API, plus the error type every handler returns.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use roomwatch_core::{
    DayHistory, PresenceError, RoomOccupancy, UserDay, UserId, one_month_before, start_of_day,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` or `error`.
    pub status: String,
    /// `Available` or `Unavailable`.
    pub database: String,
    /// RFC 3339, in the configured offset.
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(database_available: bool, now: DateTime<FixedOffset>) -> Self {
        let (status, database) = if database_available {
            ("ok", "Available")
        } else {
            ("error", "Unavailable")
        };
        Self {
            status: status.to_string(),
            database: database.to_string(),
            timestamp: now.to_rfc3339(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

// =============================================================================
// UPLOAD RESPONSES
// =============================================================================

/// Plain acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Estimator confidence relayed by `/api/signals/server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentageResponse {
    pub percentage_processed: u8,
}

// =============================================================================
// HISTORY
// =============================================================================

/// `?date=YYYY-MM-DD` on the history endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub date: Option<String>,
}

impl HistoryQuery {
    /// Window start: local midnight of `date`, or one month before `now`
    /// when no date is given.
    pub fn since(
        &self,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<DateTime<Utc>, PresenceError> {
        match self.date.as_deref().filter(|d| !d.is_empty()) {
            None => Ok(one_month_before(now)),
            Some(raw) => {
                let invalid = || {
                    PresenceError::InvalidInput(format!(
                        "Invalid date '{raw}', expected YYYY-MM-DD"
                    ))
                };
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
                start_of_day(date, offset).ok_or_else(invalid)
            }
        }
    }
}

/// All users, grouped by day then user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceHistoryResponse {
    pub all_history: Vec<DayHistory>,
}

/// One user, grouped by day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserHistoryResponse {
    pub user_id: UserId,
    pub history: Vec<UserDay>,
}

/// Every room with whoever currently holds an open session in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentOccupantsResponse {
    pub rooms: Vec<RoomOccupancy>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body: `{"error": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A [`PresenceError`] on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub PresenceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            PresenceError::InvalidInput(_) | PresenceError::NoSignalData => {
                StatusCode::BAD_REQUEST
            }
            PresenceError::NoMatch => StatusCode::UNPROCESSABLE_ENTITY,
            PresenceError::UnknownUser(_) => StatusCode::UNAUTHORIZED,
            PresenceError::Dependency(_) => StatusCode::BAD_GATEWAY,
            PresenceError::Storage(_)
            | PresenceError::Serialization(_)
            | PresenceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PresenceError> for ApiError {
    fn from(e: PresenceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self.0);
        } else {
            tracing::warn!("{}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
