//! # roomwatch-core
//!
//! The presence decision engine for roomwatch - THE LOGIC.
//!
//! Client devices periodically upload BLE and WiFi fingerprint samples.
//! For each upload this crate decides whether the user is present, which
//! room they are in, and how the user's presence session changes.
//!
//! ## Pipeline
//!
//! ```text
//! estimation ──► ConfidenceFusion ──► Disposition
//!                      │ (20..=70)           │
//!                 inquiry fetch              ▼
//! BLE/WiFi ──► RoomResolver ──► RoomId ──► PresenceStateMachine ──► SessionStore
//!                                                                       ▲
//!                                          StaleSessionReaper::sweep ───┘
//! ```
//!
//! ## Architectural Constraints
//!
//! - No async, no network: the binary drives I/O and timers
//! - The store is the single source of truth; nothing caches sessions
//! - Every mutation is one conditioned store operation
//!   (create-if-none-open, close-if-open, touch-if-open)

// =============================================================================
// MODULES
// =============================================================================

pub mod fingerprint;
pub mod fusion;
pub mod machine;
pub mod primitives;
pub mod reaper;
pub mod report;
pub mod resolver;
pub mod storage;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    ConfidenceScore, ErrorCategory, PresenceError, PresenceSession, Room, RoomId, SessionId,
    User, UserId,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use fingerprint::{
    FingerprintIndex, FingerprintTable, Observation, parse_ble_csv, parse_wifi_csv,
};
pub use fusion::{Disposition, FusionPolicy, FusionStage};
pub use machine::{PresenceState, PresenceStateMachine, RoomChangePolicy, Transition};
pub use reaper::{StaleSessionReaper, SweepReport};
pub use report::{
    DayHistory, Occupant, RoomOccupancy, UserDay, UserSessions, current_occupants, group_by_day,
    group_by_day_and_user, one_month_before, start_of_day,
};
pub use resolver::RoomResolver;
pub use storage::RedbStore;
pub use store::{MemorySessionStore, SessionStore};
