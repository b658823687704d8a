//! # Confidence Fusion
//!
//! Combines the estimator's confidence with an optional inquiry confidence
//! into a presence disposition.
//!
//! | estimation            | result                                            |
//! |-----------------------|---------------------------------------------------|
//! | `< absent_below`      | `Absent`, inquiry not consulted                   |
//! | `absent_below ..= present_above` | inquiry fetched; `estimation >= inquiry` is `Present(inquiry)`, otherwise `AbsentWithArchive` |
//! | `> present_above`     | `Present(0)`, inquiry not consulted               |
//!
//! Ties resolve to `Present`. A failed inquiry fetch fails the whole
//! decision; a disposition is never defaulted.

use crate::primitives::{ABSENT_BELOW, MAX_CONFIDENCE, PRESENT_ABOVE};
use crate::ConfidenceScore;
use serde::{Deserialize, Serialize};

// =============================================================================
// DISPOSITION
// =============================================================================

/// The fused verdict for one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    /// The user is present. Carries the inquiry confidence that was used,
    /// 0 if the inquiry service was not consulted.
    Present { inquiry: u8 },
    /// Confident absence.
    Absent,
    /// Mid-confidence sample contradicted by the inquiry service. The user
    /// is treated as absent and the raw upload should be archived as a
    /// negative training sample for the estimator.
    AbsentWithArchive,
}

impl Disposition {
    /// Whether this disposition keeps (or opens) a session.
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Whether the caller must archive the upload as a negative sample.
    #[must_use]
    pub fn requires_archive(&self) -> bool {
        matches!(self, Self::AbsentWithArchive)
    }
}

/// Outcome of the first half of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionStage {
    /// The estimation alone decides.
    Settled(Disposition),
    /// The inquiry confidence is needed; call [`FusionPolicy::arbitrate`].
    NeedsInquiry,
}

// =============================================================================
// POLICY
// =============================================================================

/// Decision boundaries. Defaults are the reference values (20 / 70).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionPolicy {
    /// Estimations strictly below this are `Absent`.
    pub absent_below: u8,
    /// Estimations strictly above this are `Present(0)`.
    pub present_above: u8,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self {
            absent_below: ABSENT_BELOW,
            present_above: PRESENT_ABOVE,
        }
    }
}

impl FusionPolicy {
    /// Create a policy. Bounds are clamped to 0..=100 and swapped if
    /// given in the wrong order.
    #[must_use]
    pub fn new(absent_below: u8, present_above: u8) -> Self {
        let low = absent_below.min(MAX_CONFIDENCE);
        let high = present_above.min(MAX_CONFIDENCE);
        Self {
            absent_below: low.min(high),
            present_above: low.max(high),
        }
    }

    /// First half: decide from the estimation alone if possible.
    #[must_use]
    pub fn stage(&self, estimation: u8) -> FusionStage {
        let estimation = estimation.min(MAX_CONFIDENCE);
        if estimation < self.absent_below {
            FusionStage::Settled(Disposition::Absent)
        } else if estimation > self.present_above {
            FusionStage::Settled(Disposition::Present { inquiry: 0 })
        } else {
            FusionStage::NeedsInquiry
        }
    }

    /// Second half: settle a mid-range estimation against the inquiry.
    #[must_use]
    pub fn arbitrate(&self, estimation: u8, inquiry: u8) -> Disposition {
        let estimation = estimation.min(MAX_CONFIDENCE);
        let inquiry = inquiry.min(MAX_CONFIDENCE);
        if estimation >= inquiry {
            Disposition::Present { inquiry }
        } else {
            Disposition::AbsentWithArchive
        }
    }

    /// Full decision for synchronous callers.
    ///
    /// `fetch_inquiry` is invoked at most once, and only for mid-range
    /// estimations. Its error is returned unchanged.
    pub fn decide<F, E>(&self, estimation: u8, fetch_inquiry: F) -> Result<Disposition, E>
    where
        F: FnOnce() -> Result<u8, E>,
    {
        Ok(self.decide_scored(estimation, fetch_inquiry)?.0)
    }

    /// Like [`decide`](Self::decide), also returning the scores that were
    /// gathered, for logging.
    pub fn decide_scored<F, E>(
        &self,
        estimation: u8,
        fetch_inquiry: F,
    ) -> Result<(Disposition, ConfidenceScore), E>
    where
        F: FnOnce() -> Result<u8, E>,
    {
        match self.stage(estimation) {
            FusionStage::Settled(disposition) => {
                Ok((disposition, ConfidenceScore::new(estimation, None)))
            }
            FusionStage::NeedsInquiry => {
                let inquiry = fetch_inquiry()?;
                Ok((
                    self.arbitrate(estimation, inquiry),
                    ConfidenceScore::new(estimation, Some(inquiry)),
                ))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
