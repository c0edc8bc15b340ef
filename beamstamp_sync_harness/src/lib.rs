// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simulated displays and correction-quality grading for beamstamp.
//!
//! [`sim::SimulatedDisplay`] produces swaps with a known true onset and hands
//! out timing sources that read its virtual clock. [`SyncTracker`] compares
//! what an [`Engine`] reports against the true onset and grades the residual
//! per [`Confidence`] level. [`run_frames`] wires the two together.

#![no_std]

extern crate alloc;

pub mod sim;

use alloc::string::String;

use beamstamp_core::engine::Engine;
use beamstamp_core::selector::{Confidence, Method, MethodOutcome};
use beamstamp_core::trace::Tracer;

use crate::sim::SimulatedDisplay;

/// Runtime pathology toggles for stress tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PathologyToggles {
    /// Swap completion is delayed by a random extra amount.
    pub scheduler_jitter: bool,
    /// Every scan position query fails.
    pub dead_beam_source: bool,
    /// Scan positions are clamped to the visible area, hiding the blanking
    /// region.
    pub clamped_beampos: bool,
    /// Alternate sources report onsets shifted by a constant bias.
    pub biased_alternate: bool,
}

/// Per-frame sample fed into [`SyncTracker::observe`].
#[derive(Clone, Copy, Debug)]
pub struct CorrectionSample {
    /// Method that produced the reported timestamp.
    pub method: Method,
    /// Confidence the engine attached to it.
    pub confidence: Confidence,
    /// Reported onset minus true onset, in microseconds.
    pub residual_us: f64,
}

impl CorrectionSample {
    /// Builds a sample from an engine outcome and the true onset (seconds).
    #[must_use]
    pub fn new(outcome: &MethodOutcome, true_onset: f64) -> Self {
        Self {
            method: outcome.method,
            confidence: outcome.confidence,
            residual_us: (outcome.corrected_timestamp - true_onset) * 1e6,
        }
    }
}

/// Letter grade for correction quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncGrade {
    /// Onsets accurate to a few scanlines.
    A,
    /// Good enough for frame-level stimulus timing.
    B,
    /// Degraded but usable.
    C,
    /// Poor; onsets may be off by a large part of a frame.
    D,
}

impl SyncGrade {
    /// Returns a short label for reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

/// Aggregated report returned by [`SyncTracker::observe`].
#[derive(Clone, Copy, Debug)]
pub struct SyncReport {
    /// Grade of the mean absolute residual at this frame's confidence.
    pub grade: SyncGrade,
    /// This frame's signed residual, in microseconds.
    pub residual_us: f64,
    /// Mean absolute residual at this frame's confidence, in microseconds.
    pub mean_abs_residual_us: f64,
    /// Total frames observed.
    pub total_frames: u64,
    /// Frames observed at this frame's confidence.
    pub frames_at_confidence: u64,
}

/// Residual statistics for one confidence level.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConfidenceStats {
    /// Frames observed.
    pub frames: u64,
    /// Sum of absolute residuals, in microseconds.
    pub abs_residual_sum_us: f64,
    /// Largest absolute residual, in microseconds.
    pub max_abs_residual_us: f64,
}

impl ConfidenceStats {
    /// Mean absolute residual in microseconds, 0 when empty.
    #[must_use]
    pub fn mean_abs_residual_us(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.abs_residual_sum_us / self.frames as f64
        }
    }
}

const fn confidence_index(confidence: Confidence) -> usize {
    match confidence {
        Confidence::High => 0,
        Confidence::Degraded => 1,
        Confidence::None => 2,
    }
}

/// Rolling correction tracker with a fixed-size residual history.
#[derive(Debug)]
pub struct SyncTracker<const N: usize> {
    residuals_us: [f64; N],
    cursor: usize,
    total_frames: u64,
    per_confidence: [ConfidenceStats; 3],
    method_frames: [u64; Method::ALL.len()],
}

impl<const N: usize> Default for SyncTracker<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SyncTracker<N> {
    /// Creates an empty tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            residuals_us: [0.0; N],
            cursor: 0,
            total_frames: 0,
            per_confidence: [ConfidenceStats {
                frames: 0,
                abs_residual_sum_us: 0.0,
                max_abs_residual_us: 0.0,
            }; 3],
            method_frames: [0; Method::ALL.len()],
        }
    }

    /// Observes one frame and returns an updated report.
    #[must_use]
    pub fn observe(&mut self, sample: CorrectionSample) -> SyncReport {
        self.total_frames = self.total_frames.saturating_add(1);
        self.residuals_us[self.cursor % N] = sample.residual_us;
        self.cursor = (self.cursor + 1) % N;
        self.method_frames[sample.method.index()] += 1;

        let stats = &mut self.per_confidence[confidence_index(sample.confidence)];
        let abs = sample.residual_us.abs();
        stats.frames = stats.frames.saturating_add(1);
        stats.abs_residual_sum_us += abs;
        stats.max_abs_residual_us = stats.max_abs_residual_us.max(abs);
        let mean = stats.mean_abs_residual_us();

        SyncReport {
            grade: grade_for(sample.confidence, mean),
            residual_us: sample.residual_us,
            mean_abs_residual_us: mean,
            total_frames: self.total_frames,
            frames_at_confidence: stats.frames,
        }
    }

    /// Statistics for one confidence level.
    #[must_use]
    pub fn stats(&self, confidence: Confidence) -> ConfidenceStats {
        self.per_confidence[confidence_index(confidence)]
    }

    /// Grade for one confidence level, `None` if no frame had it.
    #[must_use]
    pub fn grade(&self, confidence: Confidence) -> Option<SyncGrade> {
        let stats = self.stats(confidence);
        (stats.frames > 0).then(|| grade_for(confidence, stats.mean_abs_residual_us()))
    }

    /// Frames whose timestamp came from `method`.
    #[must_use]
    pub fn frames_from(&self, method: Method) -> u64 {
        self.method_frames[method.index()]
    }

    /// Total frames observed.
    #[must_use]
    pub const fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Returns ring-buffer residuals oldest→newest.
    #[must_use]
    pub fn residuals(&self) -> [f64; N] {
        let mut out = [0.0; N];
        let mut i = 0;
        while i < N {
            out[i] = self.residuals_us[(self.cursor + i) % N];
            i += 1;
        }
        out
    }

    /// Returns an ASCII sparkline over the absolute `residuals()`.
    #[must_use]
    pub fn sparkline_ascii(&self, min_us: f64, max_us: f64) -> String {
        const LEVELS: &[u8] = b" .:-=+*#%@";
        let mut out = String::with_capacity(N);
        let mut i = 0;
        while i < N {
            let idx = (self.cursor + i) % N;
            let v = self.residuals_us[idx].abs().clamp(min_us, max_us);
            let t = (v - min_us) / (max_us - min_us);
            #[expect(
                clippy::cast_possible_truncation,
                reason = "index is clamped to ASCII level count"
            )]
            let level = (t * (LEVELS.len() as f64 - 1.0) + 0.5) as usize;
            out.push(LEVELS[level] as char);
            i += 1;
        }
        out
    }
}

/// Grades a mean absolute residual (µs) against the expectations for
/// `confidence`.
fn grade_for(confidence: Confidence, mean_abs_us: f64) -> SyncGrade {
    let (a, b, c) = match confidence {
        Confidence::High => (50.0, 200.0, 1000.0),
        Confidence::Degraded => (200.0, 1000.0, 3000.0),
        Confidence::None => (1000.0, 3000.0, 8000.0),
    };

    if mean_abs_us < a {
        SyncGrade::A
    } else if mean_abs_us < b {
        SyncGrade::B
    } else if mean_abs_us < c {
        SyncGrade::C
    } else {
        SyncGrade::D
    }
}

/// Drives `frames` swaps of `display` through `engine`, feeding each outcome
/// into `tracker`. Returns the report for the last frame.
pub fn run_frames<const N: usize>(
    engine: &mut Engine,
    display: &SimulatedDisplay,
    tracker: &mut SyncTracker<N>,
    frames: u32,
    tracer: &mut Tracer<'_>,
) -> Option<SyncReport> {
    let mut last = None;
    for _ in 0..frames {
        let swap = display.next_swap();
        let outcome = engine.on_buffer_swap_complete(swap.raw_timestamp, tracer);
        last = Some(tracker.observe(CorrectionSample::new(&outcome, swap.onset)));
    }
    last
}
