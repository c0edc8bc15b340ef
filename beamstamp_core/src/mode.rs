// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timestamping modes.
//!
//! The mode is chosen once per session and decides which timing methods the
//! [`MethodSelector`](crate::selector::MethodSelector) consults, and in what
//! order. Each mode has a stable numeric level (−1 to 4) that external
//! configuration layers use; the mapping and the per-level fallback order are
//! part of the public contract.

use crate::error::InvalidModeLevel;

/// Policy for picking a timestamping method on every frame.
///
/// | level | mode | attempt order |
/// |---|---|---|
/// | −1 | [`Disabled`](Self::Disabled) | uncorrected |
/// | 0 | [`BeamOnly`](Self::BeamOnly) | beamposition, uncorrected |
/// | 1 | [`BeamPreferred`](Self::BeamPreferred) | beamposition, first alternate, uncorrected |
/// | 2 | [`BeamCrossChecked`](Self::BeamCrossChecked) | beamposition + first alternate, uncorrected |
/// | 3 | [`KernelPreferred`](Self::KernelPreferred) | first alternate, uncorrected |
/// | 4 | [`OpenMLPreferred`](Self::OpenMLPreferred) | OpenML source, uncorrected |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TimestampingMode {
    /// Never correct; always report the raw timestamp.
    Disabled,
    /// Scan-position correction only.
    BeamOnly,
    /// Scan-position correction, falling back to alternate sources.
    #[default]
    BeamPreferred,
    /// Scan-position correction verified against an alternate source on every
    /// frame.
    BeamCrossChecked,
    /// Alternate sources (kernel interrupt, display link) first; scan position
    /// is never consulted.
    KernelPreferred,
    /// The OpenML sync-control extension only.
    OpenMLPreferred,
}

impl TimestampingMode {
    /// All modes, in level order.
    pub const ALL: [Self; 6] = [
        Self::Disabled,
        Self::BeamOnly,
        Self::BeamPreferred,
        Self::BeamCrossChecked,
        Self::KernelPreferred,
        Self::OpenMLPreferred,
    ];

    /// Returns the documented numeric level of this mode.
    #[must_use]
    pub const fn level(self) -> i32 {
        match self {
            Self::Disabled => -1,
            Self::BeamOnly => 0,
            Self::BeamPreferred => 1,
            Self::BeamCrossChecked => 2,
            Self::KernelPreferred => 3,
            Self::OpenMLPreferred => 4,
        }
    }

    /// Maps a numeric level back to its mode.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidModeLevel`] for levels outside −1..=4.
    pub const fn from_level(level: i32) -> Result<Self, InvalidModeLevel> {
        Ok(match level {
            -1 => Self::Disabled,
            0 => Self::BeamOnly,
            1 => Self::BeamPreferred,
            2 => Self::BeamCrossChecked,
            3 => Self::KernelPreferred,
            4 => Self::OpenMLPreferred,
            _ => return Err(InvalidModeLevel(level)),
        })
    }

    /// Whether this mode consults the scan position, and therefore needs a
    /// [`CalibrationProfile`](crate::calibration::CalibrationProfile).
    #[must_use]
    pub const fn uses_beamposition(self) -> bool {
        matches!(
            self,
            Self::BeamOnly | Self::BeamPreferred | Self::BeamCrossChecked
        )
    }

    /// Whether this mode may fall back to (or cross-check with) alternate
    /// timestamp sources.
    #[must_use]
    pub const fn uses_alternates(self) -> bool {
        matches!(
            self,
            Self::BeamPreferred
                | Self::BeamCrossChecked
                | Self::KernelPreferred
                | Self::OpenMLPreferred
        )
    }
}

impl TryFrom<i32> for TimestampingMode {
    type Error = InvalidModeLevel;

    fn try_from(level: i32) -> Result<Self, Self::Error> {
        Self::from_level(level)
    }
}

impl From<TimestampingMode> for i32 {
    fn from(mode: TimestampingMode) -> Self {
        mode.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_round_trip() {
        for mode in TimestampingMode::ALL {
            assert_eq!(TimestampingMode::from_level(mode.level()), Ok(mode));
        }
        assert_eq!(TimestampingMode::ALL[0].level(), -1);
        assert_eq!(TimestampingMode::ALL[5].level(), 4);
    }

    #[test]
    fn out_of_range_levels_are_rejected() {
        assert_eq!(
            TimestampingMode::try_from(5),
            Err(InvalidModeLevel(5)),
            "level 5 is not documented"
        );
        assert_eq!(TimestampingMode::try_from(-2), Err(InvalidModeLevel(-2)));
    }

    #[test]
    fn only_beam_modes_need_calibration() {
        let beam: [bool; 6] = TimestampingMode::ALL.map(TimestampingMode::uses_beamposition);
        assert_eq!(beam, [false, true, true, true, false, false]);

        let alternates: [bool; 6] = TimestampingMode::ALL.map(TimestampingMode::uses_alternates);
        assert_eq!(alternates, [false, false, true, true, true, true]);
    }
}
