// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runtime cross-checking and demotion.
//!
//! After every resolved frame the [`RuntimeValidator`] looks at what the
//! [`MethodSelector`](crate::selector::MethodSelector) tried and updates the
//! session's [`WorkaroundState`]:
//!
//! - a method whose source fails on `failure_run` consecutive attempts is
//!   demoted,
//! - beamposition is demoted once its samples fall outside the calibrated
//!   range on `out_of_range_run` consecutive attempts; isolated glitches are
//!   tolerated,
//! - beamposition is demoted once it disagrees with an alternate method by
//!   more than `divergence_tolerance` on `divergence_run` consecutive frames,
//! - a beamposition sample that succeeds against a profile whose total height
//!   is implausible engages the height-unknown workaround.
//!
//! Every transition is one-way for the life of the session. The selector only
//! reads the state; the validator is its only writer.

use core::fmt;

use crate::correction::CorrectionUnavailable;
use crate::error::TimingError;
use crate::output::OutputId;
use crate::selector::{Attempt, AttemptFailure, Confidence, Method, MethodOutcome};
use crate::trace::{DemotionEvent, DivergenceEvent, HeightUnknownEvent, Tracer};

/// Bias subtracted from raw timestamps when the total height is unknown, in
/// seconds.
pub const DEFAULT_FIXED_BIAS: f64 = 0.0005;

/// A set of [`Method`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MethodSet(u8);

impl MethodSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    const fn bit(method: Method) -> u8 {
        1 << method.index()
    }

    /// Whether `method` is in the set.
    #[must_use]
    pub const fn contains(self, method: Method) -> bool {
        self.0 & Self::bit(method) != 0
    }

    /// Adds `method`; returns `true` if it was not already present.
    pub fn insert(&mut self, method: Method) -> bool {
        let fresh = !self.contains(method);
        self.0 |= Self::bit(method);
        fresh
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the members in [`Method::ALL`] order.
    pub fn iter(self) -> impl Iterator<Item = Method> {
        Method::ALL.into_iter().filter(move |&m| self.contains(m))
    }
}

impl fmt::Debug for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Session-scoped adjustments, written by the validator and read by the
/// selector and the corrector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorkaroundState {
    /// The display's total height cannot be trusted; beamposition results
    /// subtract [`fixed_bias_estimate`](Self::fixed_bias_estimate) instead of
    /// a scanline ratio.
    pub height_unknown: bool,
    /// Fixed bias in seconds, used while `height_unknown` is set.
    pub fixed_bias_estimate: f64,
    /// Methods no longer attempted this session.
    pub demoted: MethodSet,
}

impl WorkaroundState {
    /// Whether `method` has been demoted.
    #[must_use]
    pub const fn is_demoted(&self, method: Method) -> bool {
        self.demoted.contains(method)
    }
}

impl Default for WorkaroundState {
    fn default() -> Self {
        Self {
            height_unknown: false,
            fixed_bias_estimate: DEFAULT_FIXED_BIAS,
            demoted: MethodSet::EMPTY,
        }
    }
}

/// Thresholds for the [`RuntimeValidator`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValidatorConfig {
    /// Largest beamposition/alternate disagreement still counted as
    /// agreement, in seconds.
    pub divergence_tolerance: f64,
    /// Consecutive diverging frames before beamposition is demoted.
    pub divergence_run: u32,
    /// Consecutive failed queries before a method is demoted.
    pub failure_run: u32,
    /// Consecutive out-of-range beamposition samples before beamposition is
    /// demoted.
    pub out_of_range_run: u32,
    /// Smoothing factor of the rolling divergence average, in `(0, 1]`.
    pub divergence_smoothing: f64,
    /// Bias used by the height-unknown workaround, in seconds.
    pub fixed_bias_estimate: f64,
}

impl ValidatorConfig {
    /// Default thresholds: 1 ms tolerance, 3 diverging frames, 5 failures,
    /// 30 out-of-range samples.
    pub const DEFAULT: Self = Self {
        divergence_tolerance: 0.001,
        divergence_run: 3,
        failure_run: 5,
        out_of_range_run: 30,
        divergence_smoothing: 0.1,
        fixed_bias_estimate: DEFAULT_FIXED_BIAS,
    };
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Exponential moving average.
#[derive(Clone, Copy, Debug)]
struct Ema {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl Ema {
    const fn new(alpha: f64) -> Self {
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    fn update(&mut self, sample: f64) {
        if self.initialized {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
    }

    const fn get(&self) -> Option<f64> {
        if self.initialized {
            Some(self.value)
        } else {
            None
        }
    }
}

/// Watches per-frame attempts and maintains the [`WorkaroundState`].
#[derive(Debug)]
pub struct RuntimeValidator {
    config: ValidatorConfig,
    output: OutputId,
    workaround: WorkaroundState,
    failure_runs: [u32; Method::ALL.len()],
    out_of_range_run: u32,
    outcome_counts: [u64; Method::ALL.len()],
    divergence_run: u32,
    divergence: Ema,
}

impl RuntimeValidator {
    /// Creates a validator for the display `output`.
    #[must_use]
    pub fn new(config: ValidatorConfig, output: OutputId) -> Self {
        Self {
            config,
            output,
            workaround: WorkaroundState {
                fixed_bias_estimate: config.fixed_bias_estimate,
                ..WorkaroundState::default()
            },
            failure_runs: [0; Method::ALL.len()],
            out_of_range_run: 0,
            outcome_counts: [0; Method::ALL.len()],
            divergence_run: 0,
            divergence: Ema::new(config.divergence_smoothing),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Returns the current workaround state.
    #[must_use]
    pub const fn workaround(&self) -> &WorkaroundState {
        &self.workaround
    }

    /// Rolling average of the beamposition/alternate divergence, in seconds.
    ///
    /// `None` until both were computed on the same frame.
    #[must_use]
    pub const fn divergence(&self) -> Option<f64> {
        self.divergence.get()
    }

    /// Current run of consecutive diverging frames.
    #[must_use]
    pub const fn divergence_run(&self) -> u32 {
        self.divergence_run
    }

    /// Number of observed frames whose outcome came from `method`.
    #[must_use]
    pub const fn outcome_count(&self, method: Method) -> u64 {
        self.outcome_counts[method.index()]
    }

    /// Folds one resolved frame into the session state.
    ///
    /// `attempts` are the methods the selector queried for `outcome`, in
    /// query order.
    pub fn observe(
        &mut self,
        frame_index: u64,
        outcome: &MethodOutcome,
        attempts: &[Attempt],
        tracer: &mut Tracer<'_>,
    ) {
        self.outcome_counts[outcome.method.index()] += 1;

        for attempt in attempts {
            if attempt.method == Method::Beamposition {
                self.track_out_of_range(frame_index, attempt, tracer);
            }
            let run = &mut self.failure_runs[attempt.method.index()];
            match attempt.result {
                Ok(_) => *run = 0,
                Err(AttemptFailure::Correction(CorrectionUnavailable::ImplausibleHeight)) => {
                    self.engage_height_unknown(Some(frame_index), tracer);
                }
                Err(failure) if failure.kind().counts_toward_demotion() => {
                    *run += 1;
                    if *run >= self.config.failure_run {
                        self.demote(
                            attempt.method,
                            TimingError::SourceUnavailable,
                            Some(frame_index),
                            tracer,
                        );
                    }
                }
                Err(_) => {}
            }
        }

        self.check_divergence(frame_index, attempts, tracer);
    }

    fn track_out_of_range(&mut self, frame_index: u64, attempt: &Attempt, tracer: &mut Tracer<'_>) {
        let Err(AttemptFailure::Correction(CorrectionUnavailable::OutOfRange { .. })) =
            attempt.result
        else {
            self.out_of_range_run = 0;
            return;
        };
        self.out_of_range_run += 1;
        if self.out_of_range_run >= self.config.out_of_range_run {
            self.demote(
                Method::Beamposition,
                TimingError::OutOfRangeSample,
                Some(frame_index),
                tracer,
            );
        }
    }

    fn check_divergence(&mut self, frame_index: u64, attempts: &[Attempt], tracer: &mut Tracer<'_>) {
        // Only a scanline-derived result is comparable; the fixed-bias
        // estimate is known to be off by up to a frame.
        let beam = attempts.iter().find_map(|a| match a.result {
            Ok(c) if a.method == Method::Beamposition && c.confidence == Confidence::High => {
                Some(c.timestamp)
            }
            _ => None,
        });
        let alternate = attempts.iter().find_map(|a| match a.result {
            Ok(c) if a.method != Method::Beamposition => Some((a.method, c.timestamp)),
            _ => None,
        });
        let (Some(beam), Some((alternate, alternate_timestamp))) = (beam, alternate) else {
            return;
        };

        let divergence = (beam - alternate_timestamp).abs();
        self.divergence.update(divergence);
        if divergence <= self.config.divergence_tolerance {
            self.divergence_run = 0;
            return;
        }

        self.divergence_run += 1;
        tracer.divergence(&DivergenceEvent {
            frame_index,
            output: self.output,
            beam_timestamp: beam,
            alternate,
            alternate_timestamp,
            divergence,
            run_length: self.divergence_run,
        });
        if self.divergence_run >= self.config.divergence_run {
            self.demote(
                Method::Beamposition,
                TimingError::SustainedDivergence,
                Some(frame_index),
                tracer,
            );
        }
    }

    /// Demotes `method` for the rest of the session.
    ///
    /// Returns `false` (and emits nothing) if it was already demoted.
    /// [`Method::Uncorrected`] is the last resort and is never demoted.
    pub fn demote(
        &mut self,
        method: Method,
        reason: TimingError,
        frame_index: Option<u64>,
        tracer: &mut Tracer<'_>,
    ) -> bool {
        if method == Method::Uncorrected || !self.workaround.demoted.insert(method) {
            return false;
        }
        tracer.demotion(&DemotionEvent {
            frame_index,
            output: self.output,
            method,
            reason,
        });
        true
    }

    /// Switches beamposition to the fixed-bias estimate.
    ///
    /// Returns `false` (and emits nothing) if already engaged.
    pub fn engage_height_unknown(
        &mut self,
        frame_index: Option<u64>,
        tracer: &mut Tracer<'_>,
    ) -> bool {
        if self.workaround.height_unknown {
            return false;
        }
        self.workaround.height_unknown = true;
        tracer.height_unknown(&HeightUnknownEvent {
            frame_index,
            output: self.output,
            fixed_bias_estimate: self.workaround.fixed_bias_estimate,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::correction::Corrected;
    use crate::trace::TraceSink;

    #[derive(Default)]
    struct Log {
        demotions: Vec<DemotionEvent>,
        divergences: Vec<DivergenceEvent>,
        height_unknown: u32,
    }

    impl TraceSink for Log {
        fn on_demotion(&mut self, e: &DemotionEvent) {
            self.demotions.push(*e);
        }

        fn on_divergence(&mut self, e: &DivergenceEvent) {
            self.divergences.push(*e);
        }

        fn on_height_unknown(&mut self, _e: &HeightUnknownEvent) {
            self.height_unknown += 1;
        }
    }

    fn ok(method: Method, timestamp: f64) -> Attempt {
        Attempt {
            method,
            result: Ok(Corrected {
                timestamp,
                confidence: Confidence::High,
            }),
        }
    }

    fn failed(method: Method) -> Attempt {
        Attempt {
            method,
            result: Err(AttemptFailure::SourceFailed),
        }
    }

    fn beam_outcome(timestamp: f64) -> MethodOutcome {
        MethodOutcome {
            method: Method::Beamposition,
            corrected_timestamp: timestamp,
            confidence: Confidence::High,
        }
    }

    #[test]
    fn method_set_tracks_membership() {
        let mut set = MethodSet::EMPTY;
        assert!(set.is_empty());
        assert!(set.insert(Method::OpenML));
        assert!(!set.insert(Method::OpenML), "second insert is not fresh");
        assert!(set.insert(Method::Beamposition));
        assert!(set.contains(Method::OpenML));
        assert!(!set.contains(Method::KernelLevel));
        let members: Vec<Method> = set.iter().collect();
        assert_eq!(members, [Method::Beamposition, Method::OpenML]);
    }

    #[test]
    fn consecutive_failures_demote_once() {
        let mut log = Log::default();
        let mut validator = RuntimeValidator::new(ValidatorConfig::DEFAULT, OutputId(0));
        let outcome = MethodOutcome::uncorrected(1.0);
        {
            let mut tracer = Tracer::new(&mut log);
            for frame in 0..10 {
                validator.observe(frame, &outcome, &[failed(Method::KernelLevel)], &mut tracer);
            }
        }
        assert!(validator.workaround().is_demoted(Method::KernelLevel));
        assert_eq!(log.demotions.len(), 1);
        assert_eq!(log.demotions[0].frame_index, Some(4));
        assert_eq!(log.demotions[0].reason, TimingError::SourceUnavailable);
    }

    #[test]
    fn a_success_resets_the_failure_run() {
        let mut validator = RuntimeValidator::new(ValidatorConfig::DEFAULT, OutputId(0));
        let outcome = MethodOutcome::uncorrected(1.0);
        let mut tracer = Tracer::none();
        for frame in 0..20 {
            let attempt = if frame % 4 == 3 {
                ok(Method::KernelLevel, 1.0)
            } else {
                failed(Method::KernelLevel)
            };
            validator.observe(frame, &outcome, &[attempt], &mut tracer);
        }
        assert!(!validator.workaround().is_demoted(Method::KernelLevel));
    }

    fn out_of_range() -> Attempt {
        Attempt {
            method: Method::Beamposition,
            result: Err(AttemptFailure::Correction(CorrectionUnavailable::OutOfRange {
                scanline: 4000,
                total_scanlines: 1066,
            })),
        }
    }

    #[test]
    fn isolated_out_of_range_samples_never_demote() {
        let mut validator = RuntimeValidator::new(ValidatorConfig::DEFAULT, OutputId(0));
        let outcome = MethodOutcome::uncorrected(1.0);
        let mut tracer = Tracer::none();
        for frame in 0..200 {
            let attempt = if frame % 10 == 9 {
                ok(Method::Beamposition, 1.0)
            } else {
                out_of_range()
            };
            validator.observe(frame, &outcome, &[attempt], &mut tracer);
        }
        assert!(validator.workaround().demoted.is_empty());
    }

    #[test]
    fn persistent_out_of_range_samples_demote_beamposition() {
        let mut log = Log::default();
        let mut validator = RuntimeValidator::new(ValidatorConfig::DEFAULT, OutputId(0));
        let outcome = MethodOutcome::uncorrected(1.0);
        {
            let mut tracer = Tracer::new(&mut log);
            for frame in 0..40 {
                validator.observe(frame, &outcome, &[out_of_range()], &mut tracer);
            }
        }
        assert!(validator.workaround().is_demoted(Method::Beamposition));
        assert_eq!(log.demotions.len(), 1);
        let run = ValidatorConfig::DEFAULT.out_of_range_run;
        assert_eq!(log.demotions[0].frame_index, Some(u64::from(run) - 1));
        assert_eq!(log.demotions[0].reason, TimingError::OutOfRangeSample);
    }

    #[test]
    fn three_diverging_frames_demote_beamposition() {
        let mut log = Log::default();
        let mut validator = RuntimeValidator::new(ValidatorConfig::DEFAULT, OutputId(2));
        {
            let mut tracer = Tracer::new(&mut log);
            let mut t = 0.0;
            for frame in 0..3 {
                t += 0.016_667;
                let attempts = [ok(Method::Beamposition, t), ok(Method::KernelLevel, t + 0.004)];
                validator.observe(frame, &beam_outcome(t), &attempts, &mut tracer);
                if frame < 2 {
                    assert!(!validator.workaround().is_demoted(Method::Beamposition));
                }
            }
        }
        assert!(validator.workaround().is_demoted(Method::Beamposition));
        assert_eq!(log.divergences.len(), 3);
        assert_eq!(log.divergences[2].run_length, 3);
        assert_eq!(log.demotions.len(), 1);
        assert_eq!(log.demotions[0].output, OutputId(2));
        assert_eq!(
            log.demotions[0].classification(),
            "SYNCHRONIZATION TROUBLE"
        );
        let avg = validator.divergence().unwrap();
        assert!((avg - 0.004).abs() < 1e-9, "got {avg}");
    }

    #[test]
    fn agreement_breaks_the_divergence_run() {
        let mut validator = RuntimeValidator::new(ValidatorConfig::DEFAULT, OutputId(0));
        let mut tracer = Tracer::none();
        let offsets = [0.004, 0.004, 0.0002, 0.004, 0.004, 0.0001];
        for (frame, offset) in (0_u64..).zip(offsets) {
            let attempts = [ok(Method::Beamposition, 1.0), ok(Method::OpenML, 1.0 + offset)];
            validator.observe(frame, &beam_outcome(1.0), &attempts, &mut tracer);
        }
        assert!(!validator.workaround().is_demoted(Method::Beamposition));
        assert_eq!(validator.divergence_run(), 0);
    }

    #[test]
    fn implausible_height_engages_workaround_once() {
        let mut log = Log::default();
        let config = ValidatorConfig {
            fixed_bias_estimate: 0.0008,
            ..ValidatorConfig::DEFAULT
        };
        let mut validator = RuntimeValidator::new(config, OutputId(0));
        let clamped = Attempt {
            method: Method::Beamposition,
            result: Err(AttemptFailure::Correction(
                CorrectionUnavailable::ImplausibleHeight,
            )),
        };
        {
            let mut tracer = Tracer::new(&mut log);
            validator.observe(0, &MethodOutcome::uncorrected(1.0), &[clamped], &mut tracer);
            validator.observe(1, &MethodOutcome::uncorrected(1.0), &[clamped], &mut tracer);
        }
        assert!(validator.workaround().height_unknown);
        assert_eq!(validator.workaround().fixed_bias_estimate, 0.0008);
        assert_eq!(log.height_unknown, 1);
        assert!(validator.workaround().demoted.is_empty());
    }

    #[test]
    fn uncorrected_is_never_demoted() {
        let mut validator = RuntimeValidator::new(ValidatorConfig::DEFAULT, OutputId(0));
        let mut tracer = Tracer::none();
        assert!(!validator.demote(
            Method::Uncorrected,
            TimingError::SourceUnavailable,
            None,
            &mut tracer
        ));
        assert!(validator.workaround().demoted.is_empty());
    }

    #[test]
    fn outcomes_are_counted_per_method() {
        let mut validator = RuntimeValidator::new(ValidatorConfig::DEFAULT, OutputId(0));
        let mut tracer = Tracer::none();
        validator.observe(0, &beam_outcome(1.0), &[ok(Method::Beamposition, 1.0)], &mut tracer);
        validator.observe(1, &MethodOutcome::uncorrected(2.0), &[], &mut tracer);
        validator.observe(2, &MethodOutcome::uncorrected(3.0), &[], &mut tracer);
        assert_eq!(validator.outcome_count(Method::Beamposition), 1);
        assert_eq!(validator.outcome_count(Method::Uncorrected), 2);
        assert_eq!(validator.outcome_count(Method::OpenML), 0);
    }
}
