// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error kinds shared across the engine.
//!
//! None of these abort the caller. They are recovered locally: by falling back
//! to the next method within a frame, or by demoting a method for the rest of
//! the session. Component-specific errors
//! ([`CalibrationFailure`](crate::calibration::CalibrationFailure),
//! [`CorrectionUnavailable`](crate::correction::CorrectionUnavailable)) carry
//! more detail and convert into [`TimingError`].

use core::fmt;

use crate::calibration::{CalibrationFailure, CalibrationFailureReason};
use crate::correction::CorrectionUnavailable;

/// Why a timing method could not produce a timestamp, or was given up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimingError {
    /// The queried capability is absent or not working on this platform.
    SourceUnavailable,
    /// Calibration could not extract a stable refresh interval or height.
    UnstableSignal,
    /// The scan sample could not be converted with the current profile.
    CorrectionUnavailable,
    /// The scanline was outside the calibrated range.
    OutOfRangeSample,
    /// Cross-checked methods kept disagreeing.
    SustainedDivergence,
}

impl TimingError {
    /// Whether this error counts toward a method's source-failure run.
    ///
    /// Out-of-range samples are usually single-sample glitches; they only
    /// demote beamposition through their own, longer run.
    #[must_use]
    pub const fn counts_toward_demotion(self) -> bool {
        matches!(self, Self::SourceUnavailable)
    }
}

impl fmt::Display for TimingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SourceUnavailable => "timing source unavailable",
            Self::UnstableSignal => "unstable refresh signal",
            Self::CorrectionUnavailable => "scan-position correction unavailable",
            Self::OutOfRangeSample => "scanline out of calibrated range",
            Self::SustainedDivergence => "sustained divergence between timing methods",
        })
    }
}

impl core::error::Error for TimingError {}

impl From<CorrectionUnavailable> for TimingError {
    fn from(err: CorrectionUnavailable) -> Self {
        match err {
            CorrectionUnavailable::SampleFailed => Self::SourceUnavailable,
            CorrectionUnavailable::OutOfRange { .. } => Self::OutOfRangeSample,
            CorrectionUnavailable::InvalidProfile | CorrectionUnavailable::ImplausibleHeight => {
                Self::CorrectionUnavailable
            }
        }
    }
}

impl From<CalibrationFailure> for TimingError {
    fn from(err: CalibrationFailure) -> Self {
        match err.reason {
            CalibrationFailureReason::SourceUnavailable => Self::SourceUnavailable,
            CalibrationFailureReason::UnstableSignal => Self::UnstableSignal,
        }
    }
}

/// A numeric mode level outside the documented −1..=4 range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InvalidModeLevel(pub i32);

impl fmt::Display for InvalidModeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid timestamping mode level {} (expected -1..=4)",
            self.0
        )
    }
}

impl core::error::Error for InvalidModeLevel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_failures_count_toward_demotion() {
        assert!(TimingError::SourceUnavailable.counts_toward_demotion());
        assert!(!TimingError::OutOfRangeSample.counts_toward_demotion());
        assert!(!TimingError::CorrectionUnavailable.counts_toward_demotion());
    }

    #[test]
    fn correction_errors_map_to_kinds() {
        assert_eq!(
            TimingError::from(CorrectionUnavailable::OutOfRange {
                scanline: 2000,
                total_scanlines: 1066,
            }),
            TimingError::OutOfRangeSample
        );
        assert_eq!(
            TimingError::from(CorrectionUnavailable::SampleFailed),
            TimingError::SourceUnavailable
        );
        assert_eq!(
            TimingError::from(CorrectionUnavailable::InvalidProfile),
            TimingError::CorrectionUnavailable
        );
    }
}
