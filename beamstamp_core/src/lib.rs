// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scan-position timestamp correction for display-synchronized presentation.
//!
//! A "buffer swap complete" timestamp reported by the OS is taken some random
//! amount of time after the display actually started a new frame. The true
//! onset is the start of the vertical blanking interval (VBL). `beamstamp_core`
//! recovers that instant by sampling the display's vertical scan position at
//! timestamping time and converting it into time elapsed since VBL start,
//! using per-display constants measured once by a calibration run. It is
//! `no_std` compatible (with `alloc`).
//!
//! # Architecture
//!
//! ```text
//!   ScanPositionSource ──► Calibrator::calibrate() ──► CalibrationProfile
//!                                                             │
//!   raw swap timestamp                                        ▼
//!       │            ┌──────────────────── MethodSelector::resolve()
//!       └──────────► │  Beamposition (correct())          │
//!                    │  AlternateTimestampSource[]        ├──► MethodOutcome
//!                    │  Uncorrected                       │
//!                    └────────────────────────────────────┘
//!                                     │ attempts
//!                                     ▼
//!                       RuntimeValidator::observe() ──► WorkaroundState
//! ```
//!
//! **[`mode`]**: The six timestamping modes and their numeric levels.
//!
//! **[`source`]**: Capability traits the platform layer implements: scan
//! position probes and alternate timestamp sources.
//!
//! **[`calibration`]**: Refresh interval and total scanline estimation from
//! wraparounds of the scan position counter.
//!
//! **[`correction`]**: Scanline to elapsed-time conversion.
//!
//! **[`selector`]**: Mode-driven priority and fallback protocol.
//!
//! **[`validator`]**: Cross-checking, demotion and workaround state.
//!
//! **[`engine`]**: Per-display session owning all of the above.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and diagnostic
//! events.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables per-frame outcome events on
//!   [`Tracer`](trace::Tracer). Diagnostics (demotions, divergence,
//!   calibration results) are always delivered.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod calibration;
pub mod correction;
pub mod engine;
pub mod error;
pub mod mode;
pub mod output;
pub mod selector;
pub mod source;
pub mod trace;
pub mod validator;
