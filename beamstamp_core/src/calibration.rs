// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-display calibration from scan position wraparounds.
//!
//! The scan position counter climbs from 0 to the last line of the vertical
//! blanking region and then wraps back to 0. Each wraparound is the start of
//! a new VBL. The [`Calibrator`] polls a [`ScanPositionSource`] until it has
//! seen enough wraparounds, then derives:
//!
//! - the refresh interval (mean spacing of wraparound instants) and its
//!   standard deviation,
//! - the total scanline count (median over cycles of the last line seen
//!   before the wraparound).
//!
//! Samples below 0 or beyond twice the visible height are read-out glitches
//! and are skipped.
//!
//! # Wraparound instants
//!
//! A wraparound is detected between the last sample before the counter reset
//! and the first one after it. Assuming the beam moves at a constant line
//! rate, the instant of line 0 is interpolated between the two:
//!
//! ```text
//!   before ─────────────── wrap ──────── after
//!   line b            line total ≡ 0     line a
//!
//!   wrap = t_after − (t_after − t_before) · a / ((total − b) + a)
//! ```
//!
//! Refresh-interval samples that stray too far from the median (typically a
//! missed wraparound, giving twice the interval) are discarded before the
//! statistics are computed.

use alloc::vec::Vec;
use core::fmt;

use crate::source::{ScanPositionSource, ScanSample};

/// Calibration results for one display mode.
///
/// Immutable once produced. Discard and recalibrate when the display mode
/// changes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationProfile {
    /// Mean refresh interval, in seconds.
    pub refresh_interval: f64,
    /// Standard deviation of the measured refresh intervals, in seconds.
    pub refresh_interval_stddev: f64,
    /// Scanlines per refresh cycle, vertical blanking included.
    pub total_scanlines: u32,
    /// Visible display height in scanlines.
    pub visible_height: u32,
    /// Number of refresh intervals the estimate is based on.
    pub sample_count: u32,
    /// Whether the profile can be used for scan-position correction.
    ///
    /// When set, `refresh_interval > 0` and `total_scanlines >
    /// visible_height`.
    pub valid: bool,
}

impl CalibrationProfile {
    /// Largest accepted ratio of interval standard deviation to interval.
    pub const MAX_RELATIVE_STDDEV: f64 = 0.02;

    /// Builds a profile and derives its validity from the measurements.
    #[must_use]
    pub fn new(
        refresh_interval: f64,
        refresh_interval_stddev: f64,
        total_scanlines: u32,
        visible_height: u32,
        sample_count: u32,
    ) -> Self {
        let mut profile = Self {
            refresh_interval,
            refresh_interval_stddev,
            total_scanlines,
            visible_height,
            sample_count,
            valid: false,
        };
        profile.valid = profile.is_interval_stable() && profile.is_height_plausible();
        profile
    }

    /// Whether the refresh interval is positive and its spread within
    /// [`MAX_RELATIVE_STDDEV`](Self::MAX_RELATIVE_STDDEV).
    #[must_use]
    pub fn is_interval_stable(&self) -> bool {
        self.refresh_interval > 0.0
            && self.refresh_interval_stddev <= Self::MAX_RELATIVE_STDDEV * self.refresh_interval
    }

    /// Whether the total height includes a blanking region.
    ///
    /// Drivers that clamp the scan position to the visible area report a
    /// total equal to (or below) the visible height.
    #[must_use]
    pub fn is_height_plausible(&self) -> bool {
        self.total_scanlines > self.visible_height
    }

    /// Nominal refresh rate in Hz, or 0 when the interval is unknown.
    #[must_use]
    pub fn refresh_rate(&self) -> f64 {
        if self.refresh_interval > 0.0 {
            1.0 / self.refresh_interval
        } else {
            0.0
        }
    }
}

/// Why calibration could not produce a profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CalibrationFailureReason {
    /// The scan source failed on the first query.
    SourceUnavailable,
    /// No reliable wraparounds were seen before the timeout.
    UnstableSignal,
}

/// Calibration failed; the display cannot be corrected by scan position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CalibrationFailure {
    /// What went wrong.
    pub reason: CalibrationFailureReason,
    /// Wraparounds detected before giving up.
    pub wraparounds: u32,
}

impl CalibrationFailure {
    /// Creates a failure record.
    #[must_use]
    pub const fn new(reason: CalibrationFailureReason, wraparounds: u32) -> Self {
        Self {
            reason,
            wraparounds,
        }
    }
}

impl fmt::Display for CalibrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            CalibrationFailureReason::SourceUnavailable => {
                f.write_str("calibration failed: scan position source unavailable")
            }
            CalibrationFailureReason::UnstableSignal => write!(
                f,
                "calibration failed: no stable refresh signal ({} wraparounds)",
                self.wraparounds
            ),
        }
    }
}

impl core::error::Error for CalibrationFailure {}

/// Configuration for the [`Calibrator`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationConfig {
    /// Visible display height in scanlines.
    pub visible_height: u32,
    /// Refresh intervals to measure before stopping.
    pub target_samples: u32,
    /// Fewest usable intervals accepted when the timeout cuts the run short.
    pub min_samples: u32,
    /// Refresh cycles to wait for wraparounds before giving up.
    pub timeout_cycles: u32,
    /// Longest refresh interval considered possible, in seconds. Together with
    /// `timeout_cycles` this sets the calibration deadline.
    pub max_refresh_interval: f64,
    /// Hard cap on source queries, for sources whose timestamps stop moving.
    pub max_queries: u32,
    /// Relative distance from the median beyond which an interval sample is
    /// discarded.
    pub max_interval_deviation: f64,
    /// Total scanline count to use instead of the measured one.
    pub height_override: Option<u32>,
}

impl CalibrationConfig {
    /// Default configuration for a display `visible_height` lines tall.
    #[must_use]
    pub const fn new(visible_height: u32) -> Self {
        Self {
            visible_height,
            target_samples: 50,
            min_samples: 10,
            timeout_cycles: 100,
            // 20 Hz.
            max_refresh_interval: 0.05,
            max_queries: 4_000_000,
            max_interval_deviation: 0.25,
            height_override: None,
        }
    }

    /// Returns this configuration with a fixed total scanline count.
    #[must_use]
    pub const fn with_height_override(mut self, total_scanlines: u32) -> Self {
        self.height_override = Some(total_scanlines);
        self
    }
}

/// Scan samples either side of a detected wraparound.
#[derive(Clone, Copy, Debug)]
struct Wraparound {
    before: ScanSample,
    after: ScanSample,
}

impl Wraparound {
    /// Interpolated instant of line 0.
    fn instant(&self, total_scanlines: u32) -> f64 {
        let lines_before =
            (f64::from(total_scanlines) - f64::from(self.before.raw_scanline)).max(0.0);
        let lines_after = f64::from(self.after.raw_scanline.max(0));
        let span = lines_before + lines_after;
        if span <= 0.0 {
            return self.after.sample_timestamp;
        }
        let dt = self.after.sample_timestamp - self.before.sample_timestamp;
        self.after.sample_timestamp - dt * lines_after / span
    }
}

/// Whether moving from `before` to `after` is a counter reset rather than
/// read-out jitter. A reset drops by at least half the visible height.
fn is_wraparound(before: i32, after: i32, visible_height: u32) -> bool {
    after < before && (i64::from(before) - i64::from(after)) * 2 > i64::from(visible_height)
}

/// Whether `scanline` can be a real beam position on a display
/// `visible_height` lines tall.
fn is_plausible_scanline(scanline: i32, visible_height: u32) -> bool {
    scanline >= 0
        && (visible_height == 0
            || i64::from(scanline) <= i64::from(visible_height) * 2)
}

/// Measures refresh interval and total height from a scan position source.
#[derive(Clone, Copy, Debug)]
pub struct Calibrator {
    config: CalibrationConfig,
}

impl Calibrator {
    /// Creates a calibrator with the given configuration.
    #[must_use]
    pub const fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Runs the measurement loop.
    ///
    /// Blocks for as long as the source takes to deliver
    /// `target_samples + 1` wraparounds, bounded by `timeout_cycles` refresh
    /// cycles of sample time and by `max_queries`.
    ///
    /// A profile whose interval spread exceeds
    /// [`CalibrationProfile::MAX_RELATIVE_STDDEV`], or whose height is
    /// implausible, is still returned, with `valid == false`.
    ///
    /// # Errors
    ///
    /// - [`CalibrationFailureReason::SourceUnavailable`] if the first query
    ///   fails.
    /// - [`CalibrationFailureReason::UnstableSignal`] if too few consistent
    ///   wraparounds were seen.
    pub fn calibrate<S: ScanPositionSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<CalibrationProfile, CalibrationFailure> {
        let config = &self.config;
        let first = source.query();
        if !first.source_succeeded {
            return Err(CalibrationFailure::new(
                CalibrationFailureReason::SourceUnavailable,
                0,
            ));
        }

        let deadline = first.sample_timestamp
            + f64::from(config.timeout_cycles) * config.max_refresh_interval;
        let wanted = config.target_samples as usize + 1;

        let visible = config.visible_height;
        let mut wraparounds: Vec<Wraparound> = Vec::with_capacity(wanted);
        let mut cycle_maxima: Vec<i32> = Vec::with_capacity(wanted);
        let mut prev = first;
        let mut cycle_max = first.raw_scanline.max(0);
        let mut queries: u32 = 1;

        while wraparounds.len() < wanted && queries < config.max_queries {
            let sample = source.query();
            queries += 1;
            if sample.sample_timestamp > deadline {
                break;
            }
            if !sample.source_succeeded || !is_plausible_scanline(sample.raw_scanline, visible) {
                continue;
            }
            if !is_plausible_scanline(prev.raw_scanline, visible) {
                // The first sample was a glitch.
                prev = sample;
                cycle_max = sample.raw_scanline;
                continue;
            }
            if is_wraparound(prev.raw_scanline, sample.raw_scanline, visible) {
                wraparounds.push(Wraparound {
                    before: prev,
                    after: sample,
                });
                cycle_maxima.push(cycle_max);
                cycle_max = sample.raw_scanline;
            }
            cycle_max = cycle_max.max(sample.raw_scanline);
            prev = sample;
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "wraparound count is bounded by target_samples + 1"
        )]
        let detected = wraparounds.len() as u32;
        let unstable = CalibrationFailure::new(CalibrationFailureReason::UnstableSignal, detected);

        let total_scanlines = config
            .height_override
            .unwrap_or_else(|| median_scanline(&mut cycle_maxima, cycle_max));

        let intervals: Vec<f64> = wraparounds
            .windows(2)
            .map(|pair| pair[1].instant(total_scanlines) - pair[0].instant(total_scanlines))
            .collect();
        let kept = reject_outliers(&intervals, config.max_interval_deviation);

        let min_samples = config.min_samples.min(config.target_samples).max(1) as usize;
        if kept.len() < min_samples || kept.len() * 2 < intervals.len() {
            return Err(unstable);
        }

        let (mean, stddev) = mean_and_stddev(&kept);
        if mean <= 0.0 {
            return Err(unstable);
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "interval count is bounded by target_samples"
        )]
        let sample_count = kept.len() as u32;

        Ok(CalibrationProfile::new(
            mean,
            stddev,
            total_scanlines,
            config.visible_height,
            sample_count,
        ))
    }
}

/// Median of the per-cycle maxima, `fallback` when no cycle completed.
fn median_scanline(maxima: &mut [i32], fallback: i32) -> u32 {
    maxima.sort_unstable();
    maxima
        .get(maxima.len() / 2)
        .copied()
        .unwrap_or(fallback)
        .unsigned_abs()
}

/// Keeps the samples within `max_deviation` (relative) of the median.
fn reject_outliers(samples: &[f64], max_deviation: f64) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<f64> = samples.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let median = sorted[sorted.len() / 2];
    let limit = median.abs() * max_deviation;
    samples
        .iter()
        .copied()
        .filter(|s| (s - median).abs() <= limit)
        .collect()
}

/// Population mean and standard deviation.
fn mean_and_stddev(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
    (mean, libm::sqrt(variance))
}
