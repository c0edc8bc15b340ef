// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A simulated display with injectable pathologies.
//!
//! [`SimulatedDisplay`] owns a virtual clock and a raster that scans
//! `total_scanlines` lines per `refresh_interval`, with VBL onsets at integer
//! multiples of the interval. The sources it hands out read that clock, so a
//! calibrating [`Engine`](beamstamp_core::engine::Engine) sees the beam move
//! as it polls.
//!
//! Pathologies can be switched at any time through
//! [`set_pathologies`](SimulatedDisplay::set_pathologies); sources pick up
//! the change on their next query.

use alloc::rc::Rc;
use core::cell::RefCell;

use beamstamp_core::source::{
    AlternateKind, AlternateSample, AlternateTimestampSource, ScanPositionSource, ScanSample,
};

use crate::PathologyToggles;

/// Raster timing of a simulated display mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayTiming {
    /// Seconds per refresh.
    pub refresh_interval: f64,
    /// Lines per refresh, vertical blank included.
    pub total_scanlines: u32,
    /// Visible lines.
    pub visible_height: u32,
}

impl DisplayTiming {
    /// 1920×1080 at 60 Hz (CEA-861 timing, 1125 total lines).
    pub const HD_60: Self = Self {
        refresh_interval: 1.0 / 60.0,
        total_scanlines: 1125,
        visible_height: 1080,
    };

    /// 1280×1024 at 75 Hz (VESA timing, 1066 total lines).
    pub const SXGA_75: Self = Self {
        refresh_interval: 1.0 / 75.0,
        total_scanlines: 1066,
        visible_height: 1024,
    };

    /// Scanline the beam is on at time `t`.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "phase is in [0, 1), so the line is below total_scanlines"
    )]
    pub fn scanline_at(&self, t: f64) -> i32 {
        let cycles = t / self.refresh_interval;
        let phase = cycles - libm::floor(cycles);
        libm::floor(phase * f64::from(self.total_scanlines)) as i32
    }

    /// Start of the refresh cycle containing `t`.
    #[must_use]
    pub fn onset_before(&self, t: f64) -> f64 {
        libm::floor(t / self.refresh_interval) * self.refresh_interval
    }
}

/// Knobs for the simulated swap path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimConfig {
    /// Delay between VBL onset and the reported swap completion, in seconds.
    pub swap_latency: f64,
    /// Extra uniformly distributed delay with scheduler jitter on, in
    /// seconds.
    pub scheduler_jitter: f64,
    /// Clock advance per scan position query, in seconds.
    pub query_cost: f64,
    /// Offset added by a biased alternate source, in seconds.
    pub alternate_bias: f64,
}

impl SimConfig {
    /// Default knobs: 1.5 ms latency, up to 4 ms jitter, 20 µs per query,
    /// 2 ms alternate bias.
    pub const DEFAULT: Self = Self {
        swap_latency: 0.0015,
        scheduler_jitter: 0.004,
        query_cost: 0.000_02,
        alternate_bias: 0.002,
    };
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One completed swap on the simulated display.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimSwap {
    /// True VBL onset the swap landed on.
    pub onset: f64,
    /// Completion timestamp an OS would report.
    pub raw_timestamp: f64,
}

#[derive(Debug)]
struct Shared {
    timing: DisplayTiming,
    config: SimConfig,
    pathologies: PathologyToggles,
    now: f64,
    rng: fastrand::Rng,
}

/// A virtual display and its clock.
#[derive(Debug)]
pub struct SimulatedDisplay {
    shared: Rc<RefCell<Shared>>,
}

impl SimulatedDisplay {
    /// Creates a display starting at time 0; `seed` drives the jitter.
    #[must_use]
    pub fn new(timing: DisplayTiming, config: SimConfig, seed: u64) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                timing,
                config,
                pathologies: PathologyToggles::default(),
                now: 0.0,
                rng: fastrand::Rng::with_seed(seed),
            })),
        }
    }

    /// Returns the raster timing.
    #[must_use]
    pub fn timing(&self) -> DisplayTiming {
        self.shared.borrow().timing
    }

    /// Current simulated time, in seconds.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.shared.borrow().now
    }

    /// Returns the active pathologies.
    #[must_use]
    pub fn pathologies(&self) -> PathologyToggles {
        self.shared.borrow().pathologies
    }

    /// Replaces the active pathologies.
    pub fn set_pathologies(&self, pathologies: PathologyToggles) {
        self.shared.borrow_mut().pathologies = pathologies;
    }

    /// Switches to a new display mode.
    pub fn set_timing(&self, timing: DisplayTiming) {
        self.shared.borrow_mut().timing = timing;
    }

    /// A scan position source reading this display.
    #[must_use]
    pub fn scan_source(&self) -> SimScanSource {
        SimScanSource {
            shared: Rc::clone(&self.shared),
        }
    }

    /// An alternate source of the given kind reading this display.
    #[must_use]
    pub fn alternate_source(&self, kind: AlternateKind) -> SimAlternateSource {
        SimAlternateSource {
            kind,
            shared: Rc::clone(&self.shared),
        }
    }

    /// Advances to the next refresh cycle and completes a swap on it.
    ///
    /// The clock is left at the swap's raw timestamp, where the engine
    /// would sample the scan position.
    pub fn next_swap(&self) -> SimSwap {
        let mut shared = self.shared.borrow_mut();
        let interval = shared.timing.refresh_interval;
        let onset = shared.timing.onset_before(shared.now) + interval;
        let mut delay = shared.config.swap_latency;
        if shared.pathologies.scheduler_jitter {
            let jitter = shared.config.scheduler_jitter;
            delay += shared.rng.f64() * jitter;
        }
        // A swap never completes after the next onset.
        delay = delay.min(interval * 0.9);
        let raw_timestamp = onset + delay;
        shared.now = raw_timestamp;
        SimSwap {
            onset,
            raw_timestamp,
        }
    }
}

/// Beamposition query against a [`SimulatedDisplay`].
#[derive(Debug)]
pub struct SimScanSource {
    shared: Rc<RefCell<Shared>>,
}

impl ScanPositionSource for SimScanSource {
    fn query(&mut self) -> ScanSample {
        let mut shared = self.shared.borrow_mut();
        let t = shared.now;
        let cost = shared.config.query_cost;
        shared.now = t + cost;

        if shared.pathologies.dead_beam_source {
            return ScanSample::failed(t);
        }
        let mut line = shared.timing.scanline_at(t);
        if shared.pathologies.clamped_beampos {
            let last_visible = i32::try_from(shared.timing.visible_height)
                .unwrap_or(i32::MAX)
                .saturating_sub(1);
            line = line.min(last_visible);
        }
        ScanSample::new(line, t)
    }
}

/// Alternate timestamp source against a [`SimulatedDisplay`].
///
/// Reports the onset of the current refresh cycle, shifted by the configured
/// bias while [`PathologyToggles::biased_alternate`] is on.
#[derive(Debug)]
pub struct SimAlternateSource {
    kind: AlternateKind,
    shared: Rc<RefCell<Shared>>,
}

impl AlternateTimestampSource for SimAlternateSource {
    fn kind(&self) -> AlternateKind {
        self.kind
    }

    fn query(&mut self) -> AlternateSample {
        let shared = self.shared.borrow();
        let mut onset = shared.timing.onset_before(shared.now);
        if shared.pathologies.biased_alternate {
            onset += shared.config.alternate_bias;
        }
        AlternateSample::new(onset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanline_follows_the_raster() {
        let timing = DisplayTiming::HD_60;
        assert_eq!(timing.scanline_at(0.0), 0);
        let half = timing.refresh_interval * 10.5;
        let line = timing.scanline_at(half);
        assert!((561..=563).contains(&line), "got {line}");
    }

    #[test]
    fn swaps_land_after_successive_onsets() {
        let display = SimulatedDisplay::new(DisplayTiming::HD_60, SimConfig::DEFAULT, 1);
        let first = display.next_swap();
        let second = display.next_swap();
        let interval = DisplayTiming::HD_60.refresh_interval;
        assert!((second.onset - first.onset - interval).abs() < 1e-9);
        assert!((first.raw_timestamp - first.onset - 0.0015).abs() < 1e-12);
        assert_eq!(display.now(), second.raw_timestamp);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let display = SimulatedDisplay::new(DisplayTiming::SXGA_75, SimConfig::DEFAULT, 7);
        display.set_pathologies(PathologyToggles {
            scheduler_jitter: true,
            ..PathologyToggles::default()
        });
        for _ in 0..200 {
            let swap = display.next_swap();
            let delay = swap.raw_timestamp - swap.onset;
            assert!((0.0015..=0.0055).contains(&delay), "delay {delay}");
        }
    }

    #[test]
    fn pathologies_change_source_behavior() {
        let display = SimulatedDisplay::new(DisplayTiming::HD_60, SimConfig::DEFAULT, 1);
        let mut scan = display.scan_source();
        let mut alt = display.alternate_source(AlternateKind::KernelLevel);
        let swap = display.next_swap();

        assert!(scan.query().source_succeeded);
        assert!((alt.query().timestamp - swap.onset).abs() < 1e-9);

        display.set_pathologies(PathologyToggles {
            dead_beam_source: true,
            biased_alternate: true,
            ..PathologyToggles::default()
        });
        assert!(!scan.query().source_succeeded);
        assert!((alt.query().timestamp - swap.onset - 0.002).abs() < 1e-9);
    }

    #[test]
    fn clamped_positions_never_leave_the_visible_area() {
        let display = SimulatedDisplay::new(DisplayTiming::HD_60, SimConfig::DEFAULT, 1);
        display.set_pathologies(PathologyToggles {
            clamped_beampos: true,
            ..PathologyToggles::default()
        });
        let mut scan = display.scan_source();
        for _ in 0..2000 {
            assert!(scan.query().raw_scanline <= 1079);
        }
    }
}
