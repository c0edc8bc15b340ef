// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as tagged little-endian records. Timestamps are stored as the
//! bit pattern of their `f64` seconds. [`decode`] reads them back as an
//! iterator of [`RecordedEvent`].

use beamstamp_core::calibration::{
    CalibrationFailure, CalibrationFailureReason, CalibrationProfile,
};
use beamstamp_core::error::TimingError;
use beamstamp_core::output::OutputId;
use beamstamp_core::selector::{Confidence, Method, MethodOutcome};
use beamstamp_core::trace::{
    CalibrationEvent, DemotionEvent, DivergenceEvent, HeightUnknownEvent, OutcomeEvent,
    TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_CALIBRATION: u8 = 1;
const TAG_OUTCOME: u8 = 2;
const TAG_DIVERGENCE: u8 = 3;
const TAG_DEMOTION: u8 = 4;
const TAG_HEIGHT_UNKNOWN: u8 = 5;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    fn write_option_u64(&mut self, v: Option<u64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_u64(val);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_method(&mut self, m: Method) {
        self.write_u8(match m {
            Method::Beamposition => 0,
            Method::KernelLevel => 1,
            Method::DisplayLink => 2,
            Method::OpenML => 3,
            Method::Uncorrected => 4,
        });
    }

    fn write_confidence(&mut self, c: Confidence) {
        self.write_u8(match c {
            Confidence::High => 0,
            Confidence::Degraded => 1,
            Confidence::None => 2,
        });
    }

    fn write_reason(&mut self, r: TimingError) {
        self.write_u8(match r {
            TimingError::SourceUnavailable => 0,
            TimingError::UnstableSignal => 1,
            TimingError::CorrectionUnavailable => 2,
            TimingError::OutOfRangeSample => 3,
            TimingError::SustainedDivergence => 4,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_calibration(&mut self, e: &CalibrationEvent) {
        self.write_u8(TAG_CALIBRATION);
        self.write_u32(e.output.0);
        match e.result {
            Ok(p) => {
                self.write_u8(1);
                self.write_f64(p.refresh_interval);
                self.write_f64(p.refresh_interval_stddev);
                self.write_u32(p.total_scanlines);
                self.write_u32(p.visible_height);
                self.write_u32(p.sample_count);
            }
            Err(failure) => {
                self.write_u8(0);
                self.write_u8(match failure.reason {
                    CalibrationFailureReason::SourceUnavailable => 0,
                    CalibrationFailureReason::UnstableSignal => 1,
                });
                self.write_u32(failure.wraparounds);
            }
        }
    }

    fn on_outcome(&mut self, e: &OutcomeEvent) {
        self.write_u8(TAG_OUTCOME);
        self.write_u64(e.frame_index);
        self.write_u32(e.output.0);
        self.write_f64(e.raw_timestamp);
        self.write_method(e.outcome.method);
        self.write_f64(e.outcome.corrected_timestamp);
        self.write_confidence(e.outcome.confidence);
        self.write_u8(e.attempts);
    }

    fn on_divergence(&mut self, e: &DivergenceEvent) {
        self.write_u8(TAG_DIVERGENCE);
        self.write_u64(e.frame_index);
        self.write_u32(e.output.0);
        self.write_f64(e.beam_timestamp);
        self.write_method(e.alternate);
        self.write_f64(e.alternate_timestamp);
        self.write_f64(e.divergence);
        self.write_u32(e.run_length);
    }

    fn on_demotion(&mut self, e: &DemotionEvent) {
        self.write_u8(TAG_DEMOTION);
        self.write_option_u64(e.frame_index);
        self.write_u32(e.output.0);
        self.write_method(e.method);
        self.write_reason(e.reason);
    }

    fn on_height_unknown(&mut self, e: &HeightUnknownEvent) {
        self.write_u8(TAG_HEIGHT_UNKNOWN);
        self.write_option_u64(e.frame_index);
        self.write_u32(e.output.0);
        self.write_f64(e.fixed_bias_estimate);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`CalibrationEvent`].
    Calibration(CalibrationEvent),
    /// An [`OutcomeEvent`].
    Outcome(OutcomeEvent),
    /// A [`DivergenceEvent`].
    Divergence(DivergenceEvent),
    /// A [`DemotionEvent`].
    Demotion(DemotionEvent),
    /// A [`HeightUnknownEvent`].
    HeightUnknown(HeightUnknownEvent),
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Some(v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().ok()?);
        self.pos += 4;
        Some(v)
    }

    fn read_u64(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().ok()?);
        self.pos += 8;
        Some(v)
    }

    fn read_f64(&mut self) -> Option<f64> {
        self.read_u64().map(f64::from_bits)
    }

    fn read_option_u64(&mut self) -> Option<Option<u64>> {
        let present = self.read_u8()?;
        let val = self.read_u64()?;
        Some(if present != 0 { Some(val) } else { None })
    }

    fn read_method(&mut self) -> Option<Method> {
        Some(match self.read_u8()? {
            0 => Method::Beamposition,
            1 => Method::KernelLevel,
            2 => Method::DisplayLink,
            3 => Method::OpenML,
            _ => Method::Uncorrected,
        })
    }

    fn read_confidence(&mut self) -> Option<Confidence> {
        Some(match self.read_u8()? {
            0 => Confidence::High,
            1 => Confidence::Degraded,
            _ => Confidence::None,
        })
    }

    fn read_reason(&mut self) -> Option<TimingError> {
        Some(match self.read_u8()? {
            0 => TimingError::SourceUnavailable,
            1 => TimingError::UnstableSignal,
            2 => TimingError::CorrectionUnavailable,
            3 => TimingError::OutOfRangeSample,
            _ => TimingError::SustainedDivergence,
        })
    }

    fn decode_calibration(&mut self) -> Option<RecordedEvent> {
        let output = OutputId(self.read_u32()?);
        let result = if self.read_u8()? != 0 {
            Ok(CalibrationProfile::new(
                self.read_f64()?,
                self.read_f64()?,
                self.read_u32()?,
                self.read_u32()?,
                self.read_u32()?,
            ))
        } else {
            let reason = match self.read_u8()? {
                0 => CalibrationFailureReason::SourceUnavailable,
                _ => CalibrationFailureReason::UnstableSignal,
            };
            Err(CalibrationFailure::new(reason, self.read_u32()?))
        };
        Some(RecordedEvent::Calibration(CalibrationEvent { output, result }))
    }

    fn decode_outcome(&mut self) -> Option<RecordedEvent> {
        let frame_index = self.read_u64()?;
        let output = OutputId(self.read_u32()?);
        let raw_timestamp = self.read_f64()?;
        let outcome = MethodOutcome {
            method: self.read_method()?,
            corrected_timestamp: self.read_f64()?,
            confidence: self.read_confidence()?,
        };
        Some(RecordedEvent::Outcome(OutcomeEvent {
            frame_index,
            output,
            raw_timestamp,
            outcome,
            attempts: self.read_u8()?,
        }))
    }

    fn decode_divergence(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Divergence(DivergenceEvent {
            frame_index: self.read_u64()?,
            output: OutputId(self.read_u32()?),
            beam_timestamp: self.read_f64()?,
            alternate: self.read_method()?,
            alternate_timestamp: self.read_f64()?,
            divergence: self.read_f64()?,
            run_length: self.read_u32()?,
        }))
    }

    fn decode_demotion(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Demotion(DemotionEvent {
            frame_index: self.read_option_u64()?,
            output: OutputId(self.read_u32()?),
            method: self.read_method()?,
            reason: self.read_reason()?,
        }))
    }

    fn decode_height_unknown(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::HeightUnknown(HeightUnknownEvent {
            frame_index: self.read_option_u64()?,
            output: OutputId(self.read_u32()?),
            fixed_bias_estimate: self.read_f64()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_CALIBRATION => self.decode_calibration(),
            TAG_OUTCOME => self.decode_outcome(),
            TAG_DIVERGENCE => self.decode_divergence(),
            TAG_DEMOTION => self.decode_demotion(),
            TAG_HEIGHT_UNKNOWN => self.decode_height_unknown(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
