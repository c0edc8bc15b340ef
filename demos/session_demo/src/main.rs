// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simulated timestamping session that exercises the diagnostics pipeline.
//!
//! Calibrates against a simulated 60 Hz display in cross-checked mode, runs
//! clean frames, then turns on scheduler jitter and finally a biased kernel
//! timestamp source, which gets beamposition demoted. Events go to both a
//! [`PrettyPrintSink`] and a [`RecorderSink`]; the recording is exported as a
//! Chrome trace JSON file.

use std::fs::File;
use std::io::BufWriter;

use beamstamp_core::engine::{Engine, EngineConfig, TimingSources};
use beamstamp_core::mode::TimestampingMode;
use beamstamp_core::selector::{Confidence, Method};
use beamstamp_core::source::AlternateKind;
use beamstamp_core::trace::{
    CalibrationEvent, DemotionEvent, DivergenceEvent, HeightUnknownEvent, OutcomeEvent,
    TraceSink, Tracer,
};
use beamstamp_debug::pretty::PrettyPrintSink;
use beamstamp_debug::recorder::RecorderSink;
use beamstamp_sync_harness::sim::{DisplayTiming, SimConfig, SimulatedDisplay};
use beamstamp_sync_harness::{PathologyToggles, SyncTracker, run_frames};

const PHASE_FRAMES: u32 = 40;
const HISTORY: usize = 48;

/// Forwards every event to both sinks.
struct Tee<'a> {
    pretty: &'a mut PrettyPrintSink,
    recorder: &'a mut RecorderSink,
}

impl TraceSink for Tee<'_> {
    fn on_calibration(&mut self, e: &CalibrationEvent) {
        self.pretty.on_calibration(e);
        self.recorder.on_calibration(e);
    }

    fn on_outcome(&mut self, e: &OutcomeEvent) {
        self.pretty.on_outcome(e);
        self.recorder.on_outcome(e);
    }

    fn on_divergence(&mut self, e: &DivergenceEvent) {
        self.pretty.on_divergence(e);
        self.recorder.on_divergence(e);
    }

    fn on_demotion(&mut self, e: &DemotionEvent) {
        self.pretty.on_demotion(e);
        self.recorder.on_demotion(e);
    }

    fn on_height_unknown(&mut self, e: &HeightUnknownEvent) {
        self.pretty.on_height_unknown(e);
        self.recorder.on_height_unknown(e);
    }
}

fn main() {
    let display = SimulatedDisplay::new(DisplayTiming::HD_60, SimConfig::DEFAULT, 0x5eed);

    // -- sinks -------------------------------------------------------------
    let mut pretty = PrettyPrintSink::new(Box::new(std::io::stdout()));
    let mut recorder = RecorderSink::new();
    let mut tee = Tee {
        pretty: &mut pretty,
        recorder: &mut recorder,
    };
    let mut tracer = Tracer::new(&mut tee);

    // -- session -----------------------------------------------------------
    let sources = TimingSources::new()
        .with_scan(display.scan_source())
        .with_alternate(display.alternate_source(AlternateKind::KernelLevel));
    let config = EngineConfig::new(
        TimestampingMode::BeamCrossChecked,
        display.timing().visible_height,
    );
    let mut engine = Engine::initialize(config, sources, &mut tracer);
    let mut tracker = SyncTracker::<HISTORY>::new();

    // 1. Clean display
    let _ = run_frames(&mut engine, &display, &mut tracker, PHASE_FRAMES, &mut tracer);

    // 2. Scheduler jitter; beamposition should absorb it.
    display.set_pathologies(PathologyToggles {
        scheduler_jitter: true,
        ..PathologyToggles::default()
    });
    let _ = run_frames(&mut engine, &display, &mut tracker, PHASE_FRAMES, &mut tracer);

    // 3. The kernel source drifts away from the scan position.
    display.set_pathologies(PathologyToggles {
        scheduler_jitter: true,
        biased_alternate: true,
        ..PathologyToggles::default()
    });
    let _ = run_frames(&mut engine, &display, &mut tracker, PHASE_FRAMES, &mut tracer);

    // -- summary -----------------------------------------------------------
    println!();
    for confidence in [Confidence::High, Confidence::Degraded, Confidence::None] {
        let stats = tracker.stats(confidence);
        if let Some(grade) = tracker.grade(confidence) {
            println!(
                "{confidence:?}: {} frames, mean |error| {:.1}µs, max {:.1}µs, grade {}",
                stats.frames,
                stats.mean_abs_residual_us(),
                stats.max_abs_residual_us,
                grade.as_str(),
            );
        }
    }
    for method in Method::ALL {
        let frames = tracker.frames_from(method);
        if frames > 0 {
            println!("{method}: {frames} frames");
        }
    }
    println!(
        "last {HISTORY} residuals: [{}]",
        tracker.sparkline_ascii(0.0, 2500.0)
    );

    // -- export Chrome trace -----------------------------------------------
    let path = "beamstamp-trace.json";
    let file = File::create(path).expect("failed to create trace file");
    let mut writer = BufWriter::new(file);
    beamstamp_debug::chrome::export(recorder.as_bytes(), &mut writer)
        .expect("failed to write Chrome trace");

    println!("Wrote {path} ({} frames)", engine.frames_resolved());
}
