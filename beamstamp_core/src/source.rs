// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timing capabilities consumed by the engine.
//!
//! The platform layer probes what the display stack offers and hands the
//! engine a set of capability objects:
//!
//! - at most one [`ScanPositionSource`] (a beamposition query: a GPU register
//!   read, a driver ioctl, a compositor extension),
//! - an ordered list of [`AlternateTimestampSource`]s, each tagged with one of
//!   the closed set of [`AlternateKind`]s.
//!
//! How a source reads the hardware is opaque to the engine. A source that
//! cannot answer reports failure instead of a value; sources are queried at
//! most once per method per frame and the engine never spins on them.

use core::fmt;

use crate::selector::Method;

/// One reading of the display's vertical scan position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanSample {
    /// Scanline the beam was on when sampled. Line 0 is the first line after
    /// the start of vertical blank, as seen by the correction formula.
    pub raw_scanline: i32,
    /// Host time of the reading, in seconds.
    pub sample_timestamp: f64,
    /// Whether the probe produced a value at all.
    pub source_succeeded: bool,
}

impl ScanSample {
    /// A successful reading.
    #[must_use]
    pub const fn new(raw_scanline: i32, sample_timestamp: f64) -> Self {
        Self {
            raw_scanline,
            sample_timestamp,
            source_succeeded: true,
        }
    }

    /// A failed reading taken at `sample_timestamp`.
    #[must_use]
    pub const fn failed(sample_timestamp: f64) -> Self {
        Self {
            raw_scanline: 0,
            sample_timestamp,
            source_succeeded: false,
        }
    }
}

/// Reports the current vertical scan position.
///
/// Calibration calls [`query`](Self::query) in a tight loop and relies on each
/// call returning the position *at the time of the call*; a blocking
/// implementation simply slows calibration down.
pub trait ScanPositionSource {
    /// Samples the scan position now.
    fn query(&mut self) -> ScanSample;
}

impl<S: ScanPositionSource + ?Sized> ScanPositionSource for &mut S {
    fn query(&mut self) -> ScanSample {
        (**self).query()
    }
}

/// The closed set of non-scanline timing facilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlternateKind {
    /// VBL interrupt timestamp recorded by the kernel driver.
    KernelLevel,
    /// Display-link style callback timestamp (e.g. `CVDisplayLink`).
    DisplayLink,
    /// OpenML sync-control extension (`OML_sync_control` UST/MSC pairs).
    OpenML,
}

impl AlternateKind {
    /// Returns the [`Method`] this kind reports as.
    #[must_use]
    pub const fn method(self) -> Method {
        match self {
            Self::KernelLevel => Method::KernelLevel,
            Self::DisplayLink => Method::DisplayLink,
            Self::OpenML => Method::OpenML,
        }
    }
}

impl fmt::Display for AlternateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.method(), f)
    }
}

/// One reading from an [`AlternateTimestampSource`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlternateSample {
    /// The source's own estimate of the VBL onset for the last swap, in
    /// seconds.
    pub timestamp: f64,
    /// Whether the source produced a value at all.
    pub succeeded: bool,
}

impl AlternateSample {
    /// A successful reading.
    #[must_use]
    pub const fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            succeeded: true,
        }
    }

    /// A failed reading.
    #[must_use]
    pub const fn failed() -> Self {
        Self {
            timestamp: 0.0,
            succeeded: false,
        }
    }
}

/// A timing method that reports VBL onsets without scan positions.
pub trait AlternateTimestampSource {
    /// Which facility this is.
    fn kind(&self) -> AlternateKind;

    /// Returns the onset timestamp for the most recent completed swap.
    fn query(&mut self) -> AlternateSample;
}

impl fmt::Debug for dyn AlternateTimestampSource + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlternateTimestampSource")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for dyn ScanPositionSource + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanPositionSource").finish_non_exhaustive()
    }
}

/// A scan source that always fails.
///
/// Stands in when platform probing found no beamposition facility.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoScanSource;

impl ScanPositionSource for NoScanSource {
    fn query(&mut self) -> ScanSample {
        ScanSample::failed(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_kinds_map_to_methods() {
        assert_eq!(AlternateKind::KernelLevel.method(), Method::KernelLevel);
        assert_eq!(AlternateKind::DisplayLink.method(), Method::DisplayLink);
        assert_eq!(AlternateKind::OpenML.method(), Method::OpenML);
    }

    #[test]
    fn no_scan_source_always_fails() {
        let mut source = NoScanSource;
        assert!(!source.query().source_succeeded);
        assert!(!(&mut source).query().source_succeeded);
    }
}
