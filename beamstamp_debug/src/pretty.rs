// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Demotions are
//! printed with their classification, so a sustained divergence shows up as
//! `SYNCHRONIZATION TROUBLE`.

use std::io::Write;

use beamstamp_core::calibration::CalibrationFailureReason;
use beamstamp_core::trace::{
    CalibrationEvent, DemotionEvent, DivergenceEvent, HeightUnknownEvent, OutcomeEvent,
    TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns the destination.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn frame_label(frame_index: Option<u64>) -> String {
    frame_index.map_or_else(|| "init".to_owned(), |i| i.to_string())
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_calibration(&mut self, e: &CalibrationEvent) {
        let _ = match e.result {
            Ok(p) => writeln!(
                self.writer,
                "[calibration] {} interval={:.6}s ({:.3} Hz) stddev={:.1}µs total={} \
                 visible={} samples={} valid={}",
                e.output,
                p.refresh_interval,
                p.refresh_rate(),
                p.refresh_interval_stddev * 1e6,
                p.total_scanlines,
                p.visible_height,
                p.sample_count,
                p.valid,
            ),
            Err(failure) => {
                let reason = match failure.reason {
                    CalibrationFailureReason::SourceUnavailable => "source unavailable",
                    CalibrationFailureReason::UnstableSignal => "unstable signal",
                };
                writeln!(
                    self.writer,
                    "[calibration] {} FAILED: {reason} wraparounds={}",
                    e.output, failure.wraparounds,
                )
            }
        };
    }

    fn on_outcome(&mut self, e: &OutcomeEvent) {
        let _ = writeln!(
            self.writer,
            "[outcome] frame={} {} raw={:.6}s onset={:.6}s (-{:.1}µs) via {} confidence={:?} \
             attempts={}",
            e.frame_index,
            e.output,
            e.raw_timestamp,
            e.outcome.corrected_timestamp,
            (e.raw_timestamp - e.outcome.corrected_timestamp) * 1e6,
            e.outcome.method,
            e.outcome.confidence,
            e.attempts,
        );
    }

    fn on_divergence(&mut self, e: &DivergenceEvent) {
        let _ = writeln!(
            self.writer,
            "[divergence] frame={} {} beamposition vs {} differ by {:.1}µs (run {})",
            e.frame_index,
            e.output,
            e.alternate,
            e.divergence * 1e6,
            e.run_length,
        );
    }

    fn on_demotion(&mut self, e: &DemotionEvent) {
        let _ = writeln!(
            self.writer,
            "[demotion] frame={} {} {} disabled: {} ({})",
            frame_label(e.frame_index),
            e.output,
            e.method,
            e.classification(),
            e.reason,
        );
    }

    fn on_height_unknown(&mut self, e: &HeightUnknownEvent) {
        let _ = writeln!(
            self.writer,
            "[workaround] frame={} {} total height unknown, using fixed bias {:.1}µs",
            frame_label(e.frame_index),
            e.output,
            e.fixed_bias_estimate * 1e6,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamstamp_core::error::TimingError;
    use beamstamp_core::output::OutputId;
    use beamstamp_core::selector::{Confidence, Method, MethodOutcome};

    #[test]
    fn pretty_print_outcome() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_outcome(&OutcomeEvent {
            frame_index: 1,
            output: OutputId(0),
            raw_timestamp: 100.0,
            outcome: MethodOutcome {
                method: Method::Beamposition,
                corrected_timestamp: 99.991_666_5,
                confidence: Confidence::High,
            },
            attempts: 1,
        });
        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert!(output.contains("[outcome]"), "got: {output}");
        assert!(output.contains("frame=1"), "got: {output}");
        assert!(output.contains("via beamposition"), "got: {output}");
    }

    #[test]
    fn demotion_shows_classification() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_demotion(&DemotionEvent {
            frame_index: Some(2),
            output: OutputId(1),
            method: Method::Beamposition,
            reason: TimingError::SustainedDivergence,
        });
        sink.on_demotion(&DemotionEvent {
            frame_index: None,
            output: OutputId(1),
            method: Method::Beamposition,
            reason: TimingError::SourceUnavailable,
        });
        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert!(output.contains("SYNCHRONIZATION TROUBLE"), "got: {output}");
        assert!(output.contains("frame=init"), "got: {output}");
    }
}
