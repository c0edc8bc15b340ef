// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-display timestamping session.
//!
//! An [`Engine`] owns everything one display needs: its timing sources, its
//! calibration profile, the [`MethodSelector`] and the [`RuntimeValidator`]
//! with its [`WorkaroundState`]. Multiple displays use independent engines;
//! nothing is shared or global.
//!
//! # Lifecycle
//!
//! ```text
//!   Engine::initialize()          calibrates if the mode uses beamposition
//!        │
//!        ▼
//!   on_buffer_swap_complete() ◄── once per completed swap, in order
//!        │
//!        ├── recalibrate()            profile discarded and re-measured
//!        └── display_mode_changed()   same, with a new visible height
//! ```
//!
//! Initialization never fails. When calibration does, beamposition is demoted
//! for the session, a [`DemotionEvent`](crate::trace::DemotionEvent) is
//! emitted, and frames are served by the remaining methods (at worst the raw
//! timestamp, with [`Confidence::None`](crate::selector::Confidence::None)).

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::calibration::{
    CalibrationConfig, CalibrationFailure, CalibrationFailureReason, CalibrationProfile,
    Calibrator,
};
use crate::error::TimingError;
use crate::mode::TimestampingMode;
use crate::output::OutputId;
use crate::selector::{Attempt, Method, MethodOutcome, MethodSelector};
use crate::source::{AlternateTimestampSource, ScanPositionSource};
use crate::trace::{CalibrationEvent, OutcomeEvent, Tracer};
use crate::validator::{RuntimeValidator, ValidatorConfig, WorkaroundState};

/// Session configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Timestamping mode.
    pub mode: TimestampingMode,
    /// Display this engine serves.
    pub output: OutputId,
    /// Calibration parameters, including the visible height.
    pub calibration: CalibrationConfig,
    /// Runtime validation thresholds.
    pub validator: ValidatorConfig,
    /// Engage the height-unknown workaround from the start instead of waiting
    /// for it to be detected.
    pub force_height_unknown: bool,
}

impl EngineConfig {
    /// Default configuration for `mode` on a display `visible_height` lines
    /// tall.
    #[must_use]
    pub const fn new(mode: TimestampingMode, visible_height: u32) -> Self {
        Self {
            mode,
            output: OutputId(0),
            calibration: CalibrationConfig::new(visible_height),
            validator: ValidatorConfig::DEFAULT,
            force_height_unknown: false,
        }
    }

    /// Tags diagnostics with `output`.
    #[must_use]
    pub const fn with_output(mut self, output: OutputId) -> Self {
        self.output = output;
        self
    }

    /// Uses `total_scanlines` instead of the measured total height.
    #[must_use]
    pub const fn with_total_scanlines(mut self, total_scanlines: u32) -> Self {
        self.calibration = self.calibration.with_height_override(total_scanlines);
        self
    }

    /// Engages the height-unknown workaround at initialization.
    #[must_use]
    pub const fn with_height_workaround(mut self) -> Self {
        self.force_height_unknown = true;
        self
    }

    /// Sets the bias the height-unknown workaround subtracts, in seconds.
    #[must_use]
    pub const fn with_fixed_bias(mut self, seconds: f64) -> Self {
        self.validator.fixed_bias_estimate = seconds;
        self
    }

    /// Sets the cross-check tolerance, in seconds.
    #[must_use]
    pub const fn with_divergence_tolerance(mut self, seconds: f64) -> Self {
        self.validator.divergence_tolerance = seconds;
        self
    }

    /// Sets how many consecutive diverging frames demote beamposition.
    #[must_use]
    pub const fn with_divergence_run(mut self, frames: u32) -> Self {
        self.validator.divergence_run = frames;
        self
    }

    /// Sets how many consecutive source failures demote a method.
    #[must_use]
    pub const fn with_failure_run(mut self, attempts: u32) -> Self {
        self.validator.failure_run = attempts;
        self
    }

    /// Sets how many consecutive out-of-range scan samples demote
    /// beamposition.
    #[must_use]
    pub const fn with_out_of_range_run(mut self, frames: u32) -> Self {
        self.validator.out_of_range_run = frames;
        self
    }
}

/// The timing capabilities found by the platform layer.
#[derive(Debug, Default)]
pub struct TimingSources {
    /// Beamposition query, if the platform has one.
    pub scan: Option<Box<dyn ScanPositionSource>>,
    /// Alternate timestamp sources, highest priority first.
    pub alternates: Vec<Box<dyn AlternateTimestampSource>>,
}

impl TimingSources {
    /// No sources at all.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scan position source.
    #[must_use]
    pub fn with_scan(mut self, source: impl ScanPositionSource + 'static) -> Self {
        self.scan = Some(Box::new(source));
        self
    }

    /// Appends an alternate source at the lowest priority so far.
    #[must_use]
    pub fn with_alternate(mut self, source: impl AlternateTimestampSource + 'static) -> Self {
        self.alternates.push(Box::new(source));
        self
    }
}

/// Result of the most recent calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationStatus {
    /// The mode does not use beamposition.
    NotRequired,
    /// A profile was measured. It may still be unusable; see
    /// [`CalibrationProfile::valid`].
    Calibrated(CalibrationProfile),
    /// No profile could be measured.
    Failed(CalibrationFailure),
}

impl CalibrationStatus {
    /// The measured profile, if any.
    #[must_use]
    pub const fn profile(&self) -> Option<&CalibrationProfile> {
        match self {
            Self::Calibrated(profile) => Some(profile),
            Self::NotRequired | Self::Failed(_) => None,
        }
    }
}

/// Timestamp correction session for one display.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    sources: TimingSources,
    selector: MethodSelector,
    validator: RuntimeValidator,
    calibration: CalibrationStatus,
    frame_index: u64,
}

impl Engine {
    /// Starts a session: calibrates (when the mode uses beamposition) and
    /// returns an engine ready for [`on_buffer_swap_complete`].
    ///
    /// Calibration blocks on the scan source for up to
    /// `timeout_cycles` refresh cycles.
    ///
    /// [`on_buffer_swap_complete`]: Self::on_buffer_swap_complete
    #[must_use]
    pub fn initialize(
        config: EngineConfig,
        sources: TimingSources,
        tracer: &mut Tracer<'_>,
    ) -> Self {
        let mut engine = Self {
            config,
            sources,
            selector: MethodSelector::new(config.mode, config.validator.divergence_tolerance),
            validator: RuntimeValidator::new(config.validator, config.output),
            calibration: CalibrationStatus::NotRequired,
            frame_index: 0,
        };
        if config.force_height_unknown {
            engine.validator.engage_height_unknown(None, tracer);
        }
        engine.calibrate(tracer);
        engine
    }

    /// Resolves the VBL onset for a completed buffer swap.
    ///
    /// `raw_timestamp` is the OS-reported completion time, in seconds. Call
    /// once per swap, in order.
    pub fn on_buffer_swap_complete(
        &mut self,
        raw_timestamp: f64,
        tracer: &mut Tracer<'_>,
    ) -> MethodOutcome {
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let outcome = self.selector.resolve(
            raw_timestamp,
            self.sources.scan.as_deref_mut(),
            &mut self.sources.alternates,
            self.calibration.profile(),
            self.validator.workaround(),
        );
        let attempts = self.selector.attempts();
        self.validator
            .observe(frame_index, &outcome, attempts, tracer);
        tracer.outcome(&OutcomeEvent {
            frame_index,
            output: self.config.output,
            raw_timestamp,
            outcome,
            attempts: u8::try_from(attempts.len()).unwrap_or(u8::MAX),
        });
        outcome
    }

    /// Discards the profile and calibrates again.
    ///
    /// Demotions and the height-unknown workaround stay in force.
    pub fn recalibrate(&mut self, tracer: &mut Tracer<'_>) {
        self.calibrate(tracer);
    }

    /// Recalibrates for a new display mode with `visible_height` lines.
    pub fn display_mode_changed(&mut self, visible_height: u32, tracer: &mut Tracer<'_>) {
        self.config.calibration.visible_height = visible_height;
        self.calibrate(tracer);
    }

    fn calibrate(&mut self, tracer: &mut Tracer<'_>) {
        if !self.config.mode.uses_beamposition() {
            self.calibration = CalibrationStatus::NotRequired;
            return;
        }

        let calibrator = Calibrator::new(self.config.calibration);
        let result = match self.sources.scan.as_deref_mut() {
            Some(scan) => calibrator.calibrate(scan),
            None => Err(CalibrationFailure::new(
                CalibrationFailureReason::SourceUnavailable,
                0,
            )),
        };
        tracer.calibration(&CalibrationEvent {
            output: self.config.output,
            result,
        });

        match result {
            Ok(profile) => {
                self.calibration = CalibrationStatus::Calibrated(profile);
                if !profile.is_interval_stable() {
                    self.validator.demote(
                        Method::Beamposition,
                        TimingError::UnstableSignal,
                        None,
                        tracer,
                    );
                }
            }
            Err(failure) => {
                self.calibration = CalibrationStatus::Failed(failure);
                self.validator
                    .demote(Method::Beamposition, failure.into(), None, tracer);
            }
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Result of the most recent calibration.
    #[must_use]
    pub const fn calibration(&self) -> &CalibrationStatus {
        &self.calibration
    }

    /// The current workaround state.
    #[must_use]
    pub const fn workaround(&self) -> &WorkaroundState {
        self.validator.workaround()
    }

    /// Rolling beamposition/alternate divergence in seconds, if both have
    /// been computed on the same frame.
    #[must_use]
    pub const fn divergence(&self) -> Option<f64> {
        self.validator.divergence()
    }

    /// The validator, for per-method statistics.
    #[must_use]
    pub const fn validator(&self) -> &RuntimeValidator {
        &self.validator
    }

    /// Methods queried on the most recent frame.
    #[must_use]
    pub fn last_attempts(&self) -> &[Attempt] {
        self.selector.attempts()
    }

    /// Number of frames resolved so far.
    #[must_use]
    pub const fn frames_resolved(&self) -> u64 {
        self.frame_index
    }
}
