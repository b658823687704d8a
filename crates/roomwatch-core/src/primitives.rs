//! # Reference Constants
//!
//! Default policy values for the presence engine.
//!
//! These are the values the reference deployment runs with. Every one of
//! them can be overridden through configuration; nothing in the engine
//! reads them directly except the `Default` impls.

/// Estimations strictly below this value are a confident absence.
///
/// The inquiry service is not consulted.
pub const ABSENT_BELOW: u8 = 20;

/// Estimations strictly above this value are a confident presence.
///
/// The inquiry service is not consulted and the disposition carries an
/// inquiry confidence of 0.
pub const PRESENT_ABOVE: u8 = 70;

/// Upper bound of any confidence value.
pub const MAX_CONFIDENCE: u8 = 100;

/// Reaper tick period in seconds.
pub const REAPER_TICK_SECS: u64 = 60;

/// Inactivity threshold in seconds after which an open session is reaped.
///
/// 21 minutes: one missed upload cycle plus slack.
pub const INACTIVITY_THRESHOLD_SECS: i64 = 21 * 60;

/// Timeout for outbound estimator/inquiry calls in seconds.
pub const DEPENDENCY_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of observations accepted per modality in one upload.
///
/// Larger lists are truncated by the parser, not rejected.
pub const MAX_OBSERVATIONS: usize = 4096;

/// Maximum identifier length (UUID / BSSID) in bytes.
///
/// Longer identifiers cannot match any registered fingerprint and are skipped.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;
