// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-frame method selection.
//!
//! The [`MethodSelector`] turns one raw swap timestamp into a
//! [`MethodOutcome`] by walking the session mode's attempt order (see
//! [`TimestampingMode`]) until a method produces a timestamp. It queries each
//! source at most once per frame and never retries within a frame; sources
//! that keep failing are demoted across frames by the
//! [`RuntimeValidator`](crate::validator::RuntimeValidator), which reads the
//! [`attempts`](MethodSelector::attempts) recorded here.
//!
//! A method is available on a frame when it has not been demoted in the
//! [`WorkaroundState`] and its query succeeds. Beamposition additionally
//! needs a scan source and a calibration profile.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::calibration::CalibrationProfile;
use crate::correction::{Corrected, CorrectionUnavailable, correct};
use crate::error::TimingError;
use crate::mode::TimestampingMode;
use crate::source::{AlternateKind, AlternateTimestampSource, ScanPositionSource};
use crate::validator::WorkaroundState;

/// A way of obtaining a frame onset timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    /// Raw timestamp corrected by the scan position.
    Beamposition,
    /// Kernel-level VBL interrupt timestamp.
    KernelLevel,
    /// Display-link callback timestamp.
    DisplayLink,
    /// OpenML sync-control extension timestamp.
    OpenML,
    /// The raw timestamp, as reported.
    Uncorrected,
}

impl Method {
    /// All methods.
    pub const ALL: [Self; 5] = [
        Self::Beamposition,
        Self::KernelLevel,
        Self::DisplayLink,
        Self::OpenML,
        Self::Uncorrected,
    ];

    /// Dense index of this method, for per-method tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Beamposition => 0,
            Self::KernelLevel => 1,
            Self::DisplayLink => 2,
            Self::OpenML => 3,
            Self::Uncorrected => 4,
        }
    }

    /// Short lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beamposition => "beamposition",
            Self::KernelLevel => "kernel-level",
            Self::DisplayLink => "display-link",
            Self::OpenML => "openml",
            Self::Uncorrected => "uncorrected",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a reported timestamp can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    /// Corrected by a calibrated or hardware-reported method.
    High,
    /// Corrected, but by a fallback estimate or against a disagreeing
    /// cross-check.
    Degraded,
    /// Not corrected at all.
    None,
}

/// The timestamp reported for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MethodOutcome {
    /// Method that produced the timestamp.
    pub method: Method,
    /// Estimated VBL onset, in seconds.
    pub corrected_timestamp: f64,
    /// Trust level.
    pub confidence: Confidence,
}

impl MethodOutcome {
    /// The raw timestamp passed through.
    #[must_use]
    pub const fn uncorrected(raw_timestamp: f64) -> Self {
        Self {
            method: Method::Uncorrected,
            corrected_timestamp: raw_timestamp,
            confidence: Confidence::None,
        }
    }

    const fn from_corrected(method: Method, corrected: Corrected) -> Self {
        Self {
            method,
            corrected_timestamp: corrected.timestamp,
            confidence: corrected.confidence,
        }
    }
}

/// Why an attempted method produced nothing this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttemptFailure {
    /// The source query reported failure.
    SourceFailed,
    /// The scan sample could not be corrected.
    Correction(CorrectionUnavailable),
}

impl AttemptFailure {
    /// The error kind this failure represents.
    #[must_use]
    pub fn kind(self) -> TimingError {
        match self {
            Self::SourceFailed => TimingError::SourceUnavailable,
            Self::Correction(err) => err.into(),
        }
    }
}

/// One method queried while resolving a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Attempt {
    /// Method that was queried.
    pub method: Method,
    /// What it produced.
    pub result: Result<Corrected, AttemptFailure>,
}

impl Attempt {
    /// The produced timestamp, if any.
    #[must_use]
    pub fn timestamp(&self) -> Option<f64> {
        self.result.as_ref().ok().map(|c| c.timestamp)
    }
}

/// Applies the session mode's priority protocol to each frame.
#[derive(Debug)]
pub struct MethodSelector {
    mode: TimestampingMode,
    divergence_tolerance: f64,
    attempts: Vec<Attempt>,
}

impl MethodSelector {
    /// Creates a selector for `mode`.
    ///
    /// `divergence_tolerance` (seconds) is how far a cross-checked
    /// beamposition result may stray from the alternate source before it is
    /// reported as [`Confidence::Degraded`].
    #[must_use]
    pub fn new(mode: TimestampingMode, divergence_tolerance: f64) -> Self {
        Self {
            mode,
            divergence_tolerance,
            attempts: Vec::with_capacity(Method::ALL.len()),
        }
    }

    /// Returns the session mode.
    #[must_use]
    pub const fn mode(&self) -> TimestampingMode {
        self.mode
    }

    /// Methods queried by the last [`resolve`](Self::resolve) call, in query
    /// order.
    #[must_use]
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// Resolves the onset timestamp for one completed swap.
    ///
    /// Falls back to [`MethodOutcome::uncorrected`] when every method the
    /// mode allows is unavailable.
    pub fn resolve(
        &mut self,
        raw_timestamp: f64,
        scan: Option<&mut (dyn ScanPositionSource + '_)>,
        alternates: &mut [Box<dyn AlternateTimestampSource>],
        profile: Option<&CalibrationProfile>,
        workaround: &WorkaroundState,
    ) -> MethodOutcome {
        self.attempts.clear();

        let beam = if self.mode.uses_beamposition() {
            self.try_beamposition(raw_timestamp, scan, profile, workaround)
        } else {
            None
        };

        match self.mode {
            TimestampingMode::Disabled => None,
            TimestampingMode::BeamOnly => {
                beam.map(|c| MethodOutcome::from_corrected(Method::Beamposition, c))
            }
            TimestampingMode::BeamPreferred => beam
                .map(|c| MethodOutcome::from_corrected(Method::Beamposition, c))
                .or_else(|| self.first_alternate(alternates, workaround, |_| true)),
            TimestampingMode::BeamCrossChecked => {
                let alternate = self.first_alternate(alternates, workaround, |_| true);
                match (beam, alternate) {
                    (Some(beam), Some(alternate)) => {
                        let divergence = (beam.timestamp - alternate.corrected_timestamp).abs();
                        // Agreement never upgrades a fixed-bias estimate.
                        let confidence = if beam.confidence != Confidence::High {
                            beam.confidence
                        } else if divergence <= self.divergence_tolerance {
                            Confidence::High
                        } else {
                            Confidence::Degraded
                        };
                        Some(MethodOutcome {
                            method: Method::Beamposition,
                            corrected_timestamp: beam.timestamp,
                            confidence,
                        })
                    }
                    (Some(beam), None) => {
                        Some(MethodOutcome::from_corrected(Method::Beamposition, beam))
                    }
                    (None, alternate) => alternate,
                }
            }
            TimestampingMode::KernelPreferred => {
                self.first_alternate(alternates, workaround, |_| true)
            }
            TimestampingMode::OpenMLPreferred => {
                self.first_alternate(alternates, workaround, |kind| kind == AlternateKind::OpenML)
            }
        }
        .unwrap_or(MethodOutcome::uncorrected(raw_timestamp))
    }

    fn try_beamposition(
        &mut self,
        raw_timestamp: f64,
        scan: Option<&mut (dyn ScanPositionSource + '_)>,
        profile: Option<&CalibrationProfile>,
        workaround: &WorkaroundState,
    ) -> Option<Corrected> {
        if workaround.is_demoted(Method::Beamposition) {
            return None;
        }
        let (scan, profile) = scan.zip(profile)?;

        let sample = scan.query();
        let result = if sample.source_succeeded {
            correct(raw_timestamp, &sample, profile, workaround).map_err(AttemptFailure::Correction)
        } else {
            Err(AttemptFailure::SourceFailed)
        };
        self.attempts.push(Attempt {
            method: Method::Beamposition,
            result,
        });
        result.ok()
    }

    /// Queries alternates in priority order, skipping demoted ones and those
    /// rejected by `accept`, until one succeeds.
    fn first_alternate(
        &mut self,
        alternates: &mut [Box<dyn AlternateTimestampSource>],
        workaround: &WorkaroundState,
        accept: impl Fn(AlternateKind) -> bool,
    ) -> Option<MethodOutcome> {
        for source in alternates.iter_mut() {
            let kind = source.kind();
            let method = kind.method();
            if !accept(kind) || workaround.is_demoted(method) {
                continue;
            }

            let sample = source.query();
            let result = if sample.succeeded {
                Ok(Corrected {
                    timestamp: sample.timestamp,
                    confidence: Confidence::High,
                })
            } else {
                Err(AttemptFailure::SourceFailed)
            };
            self.attempts.push(Attempt { method, result });

            if let Ok(corrected) = result {
                return Some(MethodOutcome::from_corrected(method, corrected));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::rc::Rc;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::Cell;

    use super::*;
    use crate::source::{AlternateSample, ScanSample};
    use crate::validator::MethodSet;

    struct FixedScan {
        line: Option<i32>,
        queries: Rc<Cell<u32>>,
    }

    impl ScanPositionSource for FixedScan {
        fn query(&mut self) -> ScanSample {
            self.queries.set(self.queries.get() + 1);
            match self.line {
                Some(line) => ScanSample::new(line, 0.0),
                None => ScanSample::failed(0.0),
            }
        }
    }

    struct FixedAlternate {
        kind: AlternateKind,
        timestamp: Option<f64>,
        queries: Rc<Cell<u32>>,
    }

    impl AlternateTimestampSource for FixedAlternate {
        fn kind(&self) -> AlternateKind {
            self.kind
        }

        fn query(&mut self) -> AlternateSample {
            self.queries.set(self.queries.get() + 1);
            match self.timestamp {
                Some(t) => AlternateSample::new(t),
                None => AlternateSample::failed(),
            }
        }
    }

    fn scan(line: Option<i32>) -> (FixedScan, Rc<Cell<u32>>) {
        let queries = Rc::new(Cell::new(0));
        (
            FixedScan {
                line,
                queries: queries.clone(),
            },
            queries,
        )
    }

    fn alternate(
        kind: AlternateKind,
        timestamp: Option<f64>,
    ) -> (Box<dyn AlternateTimestampSource>, Rc<Cell<u32>>) {
        let queries = Rc::new(Cell::new(0));
        (
            Box::new(FixedAlternate {
                kind,
                timestamp,
                queries: queries.clone(),
            }),
            queries,
        )
    }

    fn profile() -> CalibrationProfile {
        CalibrationProfile::new(0.016667, 0.0, 1066, 1024, 50)
    }

    fn demoted(methods: &[Method]) -> WorkaroundState {
        let mut set = MethodSet::EMPTY;
        for &m in methods {
            set.insert(m);
        }
        WorkaroundState {
            demoted: set,
            ..WorkaroundState::default()
        }
    }

    #[test]
    fn beam_only_corrects_half_frame_sample() {
        let (mut scan, _) = scan(Some(533));
        let mut selector = MethodSelector::new(TimestampingMode::BeamOnly, 0.001);

        let outcome = selector.resolve(
            100.0,
            Some(&mut scan),
            &mut [],
            Some(&profile()),
            &WorkaroundState::default(),
        );

        assert_eq!(outcome.method, Method::Beamposition);
        assert_eq!(outcome.confidence, Confidence::High);
        assert!((outcome.corrected_timestamp - 99.991_666_5).abs() < 1e-9);
    }

    #[test]
    fn disabled_never_queries_anything() {
        let (mut scan, scan_queries) = scan(Some(10));
        let (alt, alt_queries) = alternate(AlternateKind::KernelLevel, Some(1.0));
        let mut alternates = vec![alt];
        let mut selector = MethodSelector::new(TimestampingMode::Disabled, 0.001);

        let outcome = selector.resolve(
            5.0,
            Some(&mut scan),
            &mut alternates,
            Some(&profile()),
            &WorkaroundState::default(),
        );

        assert_eq!(outcome, MethodOutcome::uncorrected(5.0));
        assert_eq!(scan_queries.get(), 0);
        assert_eq!(alt_queries.get(), 0);
        assert!(selector.attempts().is_empty());
    }

    #[test]
    fn beam_only_failure_passes_raw_through() {
        let (mut scan, _) = scan(None);
        let mut selector = MethodSelector::new(TimestampingMode::BeamOnly, 0.001);

        let outcome = selector.resolve(
            5.0,
            Some(&mut scan),
            &mut [],
            Some(&profile()),
            &WorkaroundState::default(),
        );

        assert_eq!(outcome.method, Method::Uncorrected);
        assert_eq!(outcome.confidence, Confidence::None);
        assert_eq!(outcome.corrected_timestamp, 5.0);
        assert_eq!(
            selector.attempts()[0].result,
            Err(AttemptFailure::SourceFailed)
        );
    }

    #[test]
    fn beam_preferred_falls_back_to_first_working_alternate() {
        let (mut scan, _) = scan(None);
        let (dead, dead_queries) = alternate(AlternateKind::KernelLevel, None);
        let (link, _) = alternate(AlternateKind::DisplayLink, Some(4.99));
        let (oml, oml_queries) = alternate(AlternateKind::OpenML, Some(4.98));
        let mut alternates = vec![dead, link, oml];
        let mut selector = MethodSelector::new(TimestampingMode::BeamPreferred, 0.001);

        let outcome = selector.resolve(
            5.0,
            Some(&mut scan),
            &mut alternates,
            Some(&profile()),
            &WorkaroundState::default(),
        );

        assert_eq!(outcome.method, Method::DisplayLink);
        assert_eq!(outcome.corrected_timestamp, 4.99);
        assert_eq!(dead_queries.get(), 1);
        assert_eq!(oml_queries.get(), 0, "stops at the first success");
        let methods: Vec<Method> = selector.attempts().iter().map(|a| a.method).collect();
        assert_eq!(
            methods,
            [Method::Beamposition, Method::KernelLevel, Method::DisplayLink]
        );
    }

    #[test]
    fn demoted_beamposition_is_not_queried() {
        let (mut scan, scan_queries) = scan(Some(100));
        let (kernel, _) = alternate(AlternateKind::KernelLevel, Some(2.0));
        let mut alternates = vec![kernel];
        let mut selector = MethodSelector::new(TimestampingMode::BeamPreferred, 0.001);
        let workaround = demoted(&[Method::Beamposition]);

        for _ in 0..3 {
            let outcome = selector.resolve(
                2.01,
                Some(&mut scan),
                &mut alternates,
                Some(&profile()),
                &workaround,
            );
            assert_eq!(outcome.method, Method::KernelLevel);
        }
        assert_eq!(scan_queries.get(), 0);
    }

    #[test]
    fn beam_needs_a_profile() {
        let (mut scan, scan_queries) = scan(Some(100));
        let mut selector = MethodSelector::new(TimestampingMode::BeamOnly, 0.001);

        let outcome = selector.resolve(
            3.0,
            Some(&mut scan),
            &mut [],
            None,
            &WorkaroundState::default(),
        );

        assert_eq!(outcome, MethodOutcome::uncorrected(3.0));
        assert_eq!(scan_queries.get(), 0);
    }

    #[test]
    fn cross_check_agreement_is_high_confidence() {
        let (mut scan, _) = scan(Some(533));
        let (kernel, kernel_queries) = alternate(AlternateKind::KernelLevel, Some(99.9917));
        let mut alternates = vec![kernel];
        let mut selector = MethodSelector::new(TimestampingMode::BeamCrossChecked, 0.001);

        let outcome = selector.resolve(
            100.0,
            Some(&mut scan),
            &mut alternates,
            Some(&profile()),
            &WorkaroundState::default(),
        );

        assert_eq!(outcome.method, Method::Beamposition);
        assert_eq!(outcome.confidence, Confidence::High);
        assert_eq!(kernel_queries.get(), 1, "alternate is always computed");
        assert_eq!(selector.attempts().len(), 2);
    }

    #[test]
    fn cross_check_disagreement_keeps_beam_but_degrades() {
        let (mut scan, _) = scan(Some(533));
        let (kernel, _) = alternate(AlternateKind::KernelLevel, Some(99.95));
        let mut alternates = vec![kernel];
        let mut selector = MethodSelector::new(TimestampingMode::BeamCrossChecked, 0.001);

        let outcome = selector.resolve(
            100.0,
            Some(&mut scan),
            &mut alternates,
            Some(&profile()),
            &WorkaroundState::default(),
        );

        assert_eq!(outcome.method, Method::Beamposition);
        assert_eq!(outcome.confidence, Confidence::Degraded);
        assert!((outcome.corrected_timestamp - 99.991_666_5).abs() < 1e-9);
    }

    #[test]
    fn cross_check_agreement_keeps_fixed_bias_degraded() {
        let (mut scan, _) = scan(Some(700));
        let (kernel, _) = alternate(AlternateKind::KernelLevel, Some(9.9996));
        let mut alternates = vec![kernel];
        let mut selector = MethodSelector::new(TimestampingMode::BeamCrossChecked, 0.001);
        let clamped = CalibrationProfile::new(0.016667, 0.0, 1024, 1024, 50);
        let workaround = WorkaroundState {
            height_unknown: true,
            ..WorkaroundState::default()
        };

        let outcome = selector.resolve(
            10.0,
            Some(&mut scan),
            &mut alternates,
            Some(&clamped),
            &workaround,
        );

        assert_eq!(outcome.method, Method::Beamposition);
        assert!(
            (outcome.corrected_timestamp - 9.9995).abs() < 1e-9,
            "raw minus the fixed bias"
        );
        assert_eq!(
            outcome.confidence,
            Confidence::Degraded,
            "an agreeing alternate does not upgrade the estimate"
        );
    }

    #[test]
    fn cross_check_without_beam_uses_alternate() {
        let (mut scan, _) = scan(Some(5000));
        let (kernel, _) = alternate(AlternateKind::KernelLevel, Some(99.99));
        let mut alternates = vec![kernel];
        let mut selector = MethodSelector::new(TimestampingMode::BeamCrossChecked, 0.001);

        let outcome = selector.resolve(
            100.0,
            Some(&mut scan),
            &mut alternates,
            Some(&profile()),
            &WorkaroundState::default(),
        );

        assert_eq!(outcome.method, Method::KernelLevel);
        assert!(matches!(
            selector.attempts()[0].result,
            Err(AttemptFailure::Correction(
                CorrectionUnavailable::OutOfRange { .. }
            ))
        ));
    }

    #[test]
    fn kernel_preferred_ignores_scan_position() {
        let (mut scan, scan_queries) = scan(Some(100));
        let (dead, _) = alternate(AlternateKind::KernelLevel, None);
        let (oml, _) = alternate(AlternateKind::OpenML, Some(7.0));
        let mut alternates = vec![dead, oml];
        let mut selector = MethodSelector::new(TimestampingMode::KernelPreferred, 0.001);

        let outcome = selector.resolve(
            7.01,
            Some(&mut scan),
            &mut alternates,
            Some(&profile()),
            &WorkaroundState::default(),
        );

        assert_eq!(outcome.method, Method::OpenML);
        assert_eq!(scan_queries.get(), 0);
    }

    #[test]
    fn openml_preferred_only_uses_openml() {
        let (kernel, kernel_queries) = alternate(AlternateKind::KernelLevel, Some(1.0));
        let (oml, _) = alternate(AlternateKind::OpenML, Some(0.99));
        let mut alternates = vec![kernel, oml];
        let mut selector = MethodSelector::new(TimestampingMode::OpenMLPreferred, 0.001);

        let outcome = selector.resolve(
            1.01,
            None,
            &mut alternates,
            None,
            &WorkaroundState::default(),
        );
        assert_eq!(outcome.method, Method::OpenML);
        assert_eq!(kernel_queries.get(), 0);

        let outcome = selector.resolve(
            1.01,
            None,
            &mut alternates,
            None,
            &demoted(&[Method::OpenML]),
        );
        assert_eq!(outcome, MethodOutcome::uncorrected(1.01));
    }

    #[test]
    fn identical_inputs_resolve_identically() {
        let (mut scan, _) = scan(Some(321));
        let (kernel, _) = alternate(AlternateKind::KernelLevel, Some(9.995));
        let mut alternates = vec![kernel];
        let mut selector = MethodSelector::new(TimestampingMode::BeamCrossChecked, 0.001);
        let p = profile();
        let workaround = WorkaroundState::default();

        let first = selector.resolve(10.0, Some(&mut scan), &mut alternates, Some(&p), &workaround);
        let first_attempts = selector.attempts().to_vec();
        let second = selector.resolve(10.0, Some(&mut scan), &mut alternates, Some(&p), &workaround);

        assert_eq!(first, second);
        assert_eq!(first_attempts, selector.attempts());
    }
}
