// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scan position to VBL onset conversion.
//!
//! The beam moves through `total_scanlines` lines per refresh interval. A
//! sample on line `s` was therefore taken `s / total × interval` seconds after
//! the last VBL start, and subtracting that from the raw timestamp recovers
//! the onset:
//!
//! ```text
//!   corrected = raw − scanline / total_scanlines × refresh_interval
//! ```

use core::fmt;

use crate::calibration::CalibrationProfile;
use crate::selector::Confidence;
use crate::source::ScanSample;
use crate::validator::WorkaroundState;

/// A corrected onset timestamp.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corrected {
    /// Estimated VBL onset, in seconds.
    pub timestamp: f64,
    /// How the estimate was obtained.
    pub confidence: Confidence,
}

/// Why a scan sample could not be converted.
///
/// Always recoverable: the selector moves on to the next method for the
/// frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CorrectionUnavailable {
    /// The scan position query itself failed.
    SampleFailed,
    /// The profile's refresh interval is missing or too noisy.
    InvalidProfile,
    /// The profile's total height does not include a blanking region.
    ImplausibleHeight,
    /// The scanline lies outside `[0, total_scanlines]`.
    OutOfRange {
        /// Reported scanline.
        scanline: i32,
        /// Calibrated total.
        total_scanlines: u32,
    },
}

impl fmt::Display for CorrectionUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SampleFailed => f.write_str("scan position query failed"),
            Self::InvalidProfile => f.write_str("no valid refresh interval calibration"),
            Self::ImplausibleHeight => {
                f.write_str("calibrated total height does not include vertical blank")
            }
            Self::OutOfRange {
                scanline,
                total_scanlines,
            } => write!(
                f,
                "scanline {scanline} outside calibrated range 0..={total_scanlines}"
            ),
        }
    }
}

impl core::error::Error for CorrectionUnavailable {}

/// Seconds elapsed since VBL start when the beam was on `scanline`.
///
/// Only meaningful for `0 <= scanline <= profile.total_scanlines`.
#[must_use]
pub fn elapsed_since_vbl(scanline: i32, profile: &CalibrationProfile) -> f64 {
    f64::from(scanline) / f64::from(profile.total_scanlines) * profile.refresh_interval
}

/// Converts a raw swap timestamp into a VBL onset timestamp.
///
/// With the height-unknown workaround engaged the ratio is not computed; the
/// workaround's fixed bias is subtracted instead and the result is
/// [`Confidence::Degraded`].
///
/// # Errors
///
/// See [`CorrectionUnavailable`]. Out-of-range samples are reported as
/// [`CorrectionUnavailable::OutOfRange`] and treated as a transient glitch.
pub fn correct(
    raw_timestamp: f64,
    sample: &ScanSample,
    profile: &CalibrationProfile,
    workaround: &WorkaroundState,
) -> Result<Corrected, CorrectionUnavailable> {
    if !sample.source_succeeded {
        return Err(CorrectionUnavailable::SampleFailed);
    }
    let out_of_range = CorrectionUnavailable::OutOfRange {
        scanline: sample.raw_scanline,
        total_scanlines: profile.total_scanlines,
    };
    if sample.raw_scanline < 0 {
        return Err(out_of_range);
    }

    if workaround.height_unknown {
        return Ok(Corrected {
            timestamp: raw_timestamp - workaround.fixed_bias_estimate,
            confidence: Confidence::Degraded,
        });
    }

    if !profile.is_interval_stable() {
        return Err(CorrectionUnavailable::InvalidProfile);
    }
    if !profile.is_height_plausible() {
        return Err(CorrectionUnavailable::ImplausibleHeight);
    }
    if sample.raw_scanline.unsigned_abs() > profile.total_scanlines {
        return Err(out_of_range);
    }

    Ok(Corrected {
        timestamp: raw_timestamp - elapsed_since_vbl(sample.raw_scanline, profile),
        confidence: Confidence::High,
    })
}
