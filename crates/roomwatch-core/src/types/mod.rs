//! # Core Type Definitions
//!
//! This module contains all core types for the presence engine:
//! - Identifiers (`UserId`, `RoomId`, `SessionId`)
//! - The persisted session row (`PresenceSession`)
//! - Reference data (`Room`, `User`)
//! - Per-upload confidence (`ConfidenceScore`)
//! - Error types (`PresenceError`)
//!
//! Identifiers implement `Ord` so they can key `BTreeMap`s directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Numeric identifier of a user.
///
/// Uploads authenticate with a username; the store maps it to this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Numeric identifier of a room.
///
/// There is no "default room": room ids only ever come from a successful
/// fingerprint lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId(pub u64);

/// Store-generated identifier of a presence session. Strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// PRESENCE SESSION
// =============================================================================

/// One contiguous stretch of a user being present in a room.
///
/// A session is *open* while `end_time` is `None`. For any user at most one
/// open session exists at a time. Sessions are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Time of the most recent presence-bearing upload. Never decreases
    /// while the session is open.
    pub last_seen: DateTime<Utc>,
}

impl PresenceSession {
    /// Create a freshly opened session (`start_time == last_seen == at`).
    #[must_use]
    pub fn open(session_id: SessionId, user_id: UserId, room_id: RoomId, at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            user_id,
            room_id,
            start_time: at,
            end_time: None,
            last_seen: at,
        }
    }

    /// Whether the session is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Refresh liveness. Older timestamps are ignored so `last_seen` stays
    /// monotonic under out-of-order uploads.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
    }

    /// Whether the session has been silent since before `cutoff`.
    #[must_use]
    pub fn is_idle_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }
}

// =============================================================================
// REFERENCE DATA
// =============================================================================

/// A physical room. Externally owned reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub room_name: String,
}

impl Room {
    #[must_use]
    pub fn new(room_id: RoomId, room_name: impl Into<String>) -> Self {
        Self {
            room_id,
            room_name: room_name.into(),
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
}

// =============================================================================
// CONFIDENCE
// =============================================================================

/// The two confidence values gathered for a single upload.
///
/// Ephemeral: logged, never persisted. `inquiry` is `None` when the
/// inquiry service was not consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfidenceScore {
    /// Estimator confidence, 0 to 100.
    pub estimation: u8,
    /// Inquiry confidence, 0 to 100, if it was fetched.
    pub inquiry: Option<u8>,
}

impl ConfidenceScore {
    #[must_use]
    pub fn new(estimation: u8, inquiry: Option<u8>) -> Self {
        Self {
            estimation,
            inquiry,
        }
    }

    /// Whether the inquiry service was consulted.
    #[must_use]
    pub fn has_inquiry(&self) -> bool {
        self.inquiry.is_some()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Coarse classification of a [`PresenceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The uploader sent something unusable. Their fault.
    Input,
    /// Fingerprints were present but no room matched; may be an index gap.
    NoMatch,
    /// A collaborator (estimator, inquiry, datastore, filesystem) failed.
    Dependency,
}

/// Errors that can occur in the presence engine.
///
/// - No silent failures
/// - Every failure aborts the current upload before any session mutation
/// - The engine never panics
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Upload content is malformed or incomplete.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Both the BLE and the WiFi observation lists were empty.
    #[error("No BLE or WiFi signal data")]
    NoSignalData,

    /// Observations were present but none resolved to a room.
    #[error("No registered beacon or access point matched")]
    NoMatch,

    /// The authenticated username is not registered.
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Estimator or inquiry transport failure, including timeouts.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Datastore failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Row encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl PresenceError {
    /// Classify the error for callers that map errors onto responses.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput(_) | Self::NoSignalData | Self::UnknownUser(_) => {
                ErrorCategory::Input
            }
            Self::NoMatch => ErrorCategory::NoMatch,
            Self::Dependency(_) | Self::Storage(_) | Self::Serialization(_) | Self::Io(_) => {
                ErrorCategory::Dependency
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
