// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Each display becomes a process (`pid` is the [`OutputId`] value). Outcomes
//! are instant events at the corrected onset, and the beamposition/alternate
//! divergence is plotted as a counter track. Events without a timestamp of
//! their own (calibration, demotion, workaround) are placed at the last
//! timestamp seen for that display.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU
//! [`OutputId`]: beamstamp_core::output::OutputId

use std::collections::HashMap;
use std::io::{self, Write};

use serde_json::{Value, json};

use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Timestamps are converted from seconds to microseconds.
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let mut last_ts: HashMap<u32, f64> = HashMap::new();

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::Calibration(e) => {
                let ts = last_ts.get(&e.output.0).copied().unwrap_or(0.0);
                let args = match e.result {
                    Ok(p) => json!({
                        "refresh_interval_us": seconds_to_us(p.refresh_interval),
                        "stddev_us": seconds_to_us(p.refresh_interval_stddev),
                        "total_scanlines": p.total_scanlines,
                        "visible_height": p.visible_height,
                        "sample_count": p.sample_count,
                        "valid": p.valid,
                    }),
                    Err(failure) => json!({
                        "failure": format!("{:?}", failure.reason),
                        "wraparounds": failure.wraparounds,
                    }),
                };
                events.push(json!({
                    "ph": "i",
                    "name": "Calibration",
                    "cat": "Calibration",
                    "ts": ts,
                    "pid": e.output.0,
                    "tid": 0,
                    "s": "p",
                    "args": args,
                }));
            }
            RecordedEvent::Outcome(e) => {
                let ts = seconds_to_us(e.outcome.corrected_timestamp);
                last_ts.insert(e.output.0, seconds_to_us(e.raw_timestamp));
                events.push(json!({
                    "ph": "i",
                    "name": format!("{}", e.outcome.method),
                    "cat": "Outcome",
                    "ts": ts,
                    "pid": e.output.0,
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "raw_us": seconds_to_us(e.raw_timestamp),
                        "correction_us": seconds_to_us(e.raw_timestamp - e.outcome.corrected_timestamp),
                        "confidence": format!("{:?}", e.outcome.confidence),
                        "attempts": e.attempts,
                    }
                }));
            }
            RecordedEvent::Divergence(e) => {
                let ts = seconds_to_us(e.beam_timestamp);
                last_ts.insert(e.output.0, ts);
                events.push(json!({
                    "ph": "C",
                    "name": "Divergence",
                    "cat": "Validator",
                    "ts": ts,
                    "pid": e.output.0,
                    "tid": 0,
                    "args": {
                        "divergence_us": seconds_to_us(e.divergence),
                    }
                }));
                events.push(json!({
                    "ph": "i",
                    "name": "DivergenceDetected",
                    "cat": "Validator",
                    "ts": ts,
                    "pid": e.output.0,
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "alternate": format!("{}", e.alternate),
                        "run_length": e.run_length,
                    }
                }));
            }
            RecordedEvent::Demotion(e) => {
                let ts = last_ts.get(&e.output.0).copied().unwrap_or(0.0);
                events.push(json!({
                    "ph": "i",
                    "name": e.classification(),
                    "cat": "Validator",
                    "ts": ts,
                    "pid": e.output.0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "frame_index": e.frame_index,
                        "method": format!("{}", e.method),
                        "reason": format!("{}", e.reason),
                    }
                }));
            }
            RecordedEvent::HeightUnknown(e) => {
                let ts = last_ts.get(&e.output.0).copied().unwrap_or(0.0);
                events.push(json!({
                    "ph": "i",
                    "name": "HeightUnknown",
                    "cat": "Validator",
                    "ts": ts,
                    "pid": e.output.0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "frame_index": e.frame_index,
                        "fixed_bias_us": seconds_to_us(e.fixed_bias_estimate),
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn seconds_to_us(seconds: f64) -> f64 {
    seconds * 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use beamstamp_core::calibration::CalibrationProfile;
    use beamstamp_core::error::TimingError;
    use beamstamp_core::output::OutputId;
    use beamstamp_core::selector::{Confidence, Method, MethodOutcome};
    use beamstamp_core::trace::{CalibrationEvent, DemotionEvent, OutcomeEvent, TraceSink};

    #[test]
    fn export_produces_valid_json() {
        let mut rec = RecorderSink::new();
        rec.on_calibration(&CalibrationEvent {
            output: OutputId(0),
            result: Ok(CalibrationProfile::new(0.016667, 0.0, 1066, 1024, 50)),
        });
        rec.on_outcome(&OutcomeEvent {
            frame_index: 0,
            output: OutputId(0),
            raw_timestamp: 2.0,
            outcome: MethodOutcome {
                method: Method::Beamposition,
                corrected_timestamp: 1.75,
                confidence: Confidence::High,
            },
            attempts: 1,
        });
        rec.on_demotion(&DemotionEvent {
            frame_index: Some(0),
            output: OutputId(0),
            method: Method::Beamposition,
            reason: TimingError::SustainedDivergence,
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.len(), 3);

        assert_eq!(parsed[0]["name"], "Calibration");
        assert_eq!(parsed[0]["args"]["total_scanlines"], 1066);

        assert_eq!(parsed[1]["ph"], "i");
        assert_eq!(parsed[1]["name"], "beamposition");
        assert_eq!(parsed[1]["ts"], 1_750_000.0);

        // Placed at the raw timestamp of the preceding outcome.
        assert_eq!(parsed[2]["name"], "SYNCHRONIZATION TROUBLE");
        assert_eq!(parsed[2]["ts"], 2_000_000.0);
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert!(parsed.is_empty());
    }
}
