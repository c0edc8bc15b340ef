// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Diagnostics for a timestamping session.
//!
//! This module provides a [`TraceSink`] trait with one method per event. All
//! method bodies default to no-ops, so implementing only the events you care
//! about is fine. The core never prints; formatting lives in the sinks.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. Diagnostic events
//! (calibration results, divergence, demotions, the height-unknown workaround)
//! are rare and always dispatched. The per-frame [`OutcomeEvent`] is only
//! dispatched with the `trace` feature enabled; when it is **off**,
//! [`Tracer::outcome`] compiles to nothing.

use crate::calibration::{CalibrationFailure, CalibrationProfile};
use crate::error::TimingError;
use crate::output::OutputId;
use crate::selector::{Method, MethodOutcome};

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted after every calibration run.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationEvent {
    /// Display that was calibrated.
    pub output: OutputId,
    /// The measured profile, or why there is none.
    pub result: Result<CalibrationProfile, CalibrationFailure>,
}

/// Emitted for every resolved frame (requires the `trace` feature to be
/// dispatched).
#[derive(Clone, Copy, Debug)]
pub struct OutcomeEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which display.
    pub output: OutputId,
    /// Timestamp reported by the OS for the swap.
    pub raw_timestamp: f64,
    /// What the engine reported.
    pub outcome: MethodOutcome,
    /// Number of methods queried for this frame.
    pub attempts: u8,
}

/// Emitted when beamposition and an alternate method disagree by more than
/// the tolerance.
#[derive(Clone, Copy, Debug)]
pub struct DivergenceEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which display.
    pub output: OutputId,
    /// Beamposition-corrected onset.
    pub beam_timestamp: f64,
    /// The method it was compared against.
    pub alternate: Method,
    /// That method's onset.
    pub alternate_timestamp: f64,
    /// Absolute difference in seconds.
    pub divergence: f64,
    /// Consecutive diverging frames so far, this one included.
    pub run_length: u32,
}

/// Emitted when a method is demoted for the rest of the session.
#[derive(Clone, Copy, Debug)]
pub struct DemotionEvent {
    /// Frame on which the demotion happened, `None` during initialization.
    pub frame_index: Option<u64>,
    /// Which display.
    pub output: OutputId,
    /// The demoted method.
    pub method: Method,
    /// Why it was demoted.
    pub reason: TimingError,
}

impl DemotionEvent {
    /// Stable, human-facing label for this kind of demotion.
    ///
    /// Sustained divergence is the classic `"SYNCHRONIZATION TROUBLE"`
    /// warning: the display's timing cannot be trusted and stimulus onsets
    /// may be wrong by a frame or more.
    #[must_use]
    pub const fn classification(&self) -> &'static str {
        match self.reason {
            TimingError::SustainedDivergence => "SYNCHRONIZATION TROUBLE",
            TimingError::SourceUnavailable => "TIMING SOURCE UNAVAILABLE",
            TimingError::UnstableSignal => "CALIBRATION FAILED",
            TimingError::CorrectionUnavailable | TimingError::OutOfRangeSample => {
                "TIMING DEGRADED"
            }
        }
    }
}

/// Emitted when the height-unknown workaround is engaged.
#[derive(Clone, Copy, Debug)]
pub struct HeightUnknownEvent {
    /// Frame on which it was engaged, `None` when enabled by configuration.
    pub frame_index: Option<u64>,
    /// Which display.
    pub output: OutputId,
    /// Bias subtracted from raw timestamps from now on, in seconds.
    pub fixed_bias_estimate: f64,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives diagnostic events from an engine.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called after a calibration run finishes or fails.
    fn on_calibration(&mut self, e: &CalibrationEvent) {
        _ = e;
    }

    /// Called for every resolved frame.
    fn on_outcome(&mut self, e: &OutcomeEvent) {
        _ = e;
    }

    /// Called when cross-checked methods disagree.
    fn on_divergence(&mut self, e: &DivergenceEvent) {
        _ = e;
    }

    /// Called when a method is demoted.
    fn on_demotion(&mut self, e: &DemotionEvent) {
        _ = e;
    }

    /// Called when the height-unknown workaround is engaged.
    fn on_height_unknown(&mut self, e: &HeightUnknownEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// Each method checks the inner `Option` (one branch) before dispatching to
/// the sink.
pub struct Tracer<'a> {
    sink: Option<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer")
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        Self { sink: Some(sink) }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self { sink: None }
    }

    /// Emits a [`CalibrationEvent`].
    #[inline]
    pub fn calibration(&mut self, e: &CalibrationEvent) {
        if let Some(s) = &mut self.sink {
            s.on_calibration(e);
        }
    }

    /// Emits an [`OutcomeEvent`] (requires the `trace` feature).
    #[inline]
    pub fn outcome(&mut self, e: &OutcomeEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_outcome(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`DivergenceEvent`].
    #[inline]
    pub fn divergence(&mut self, e: &DivergenceEvent) {
        if let Some(s) = &mut self.sink {
            s.on_divergence(e);
        }
    }

    /// Emits a [`DemotionEvent`].
    #[inline]
    pub fn demotion(&mut self, e: &DemotionEvent) {
        if let Some(s) = &mut self.sink {
            s.on_demotion(e);
        }
    }

    /// Emits a [`HeightUnknownEvent`].
    #[inline]
    pub fn height_unknown(&mut self, e: &HeightUnknownEvent) {
        if let Some(s) = &mut self.sink {
            s.on_height_unknown(e);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
