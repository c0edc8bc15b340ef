// Copyright 2026 the Beamstamp Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display identification.
//!
//! Every [`Engine`](crate::engine::Engine) services exactly one display.
//! [`OutputId`] tags its diagnostics so a sink shared across displays can tell
//! them apart.

use core::fmt;

/// Identifies the display an engine instance is bound to.
///
/// The platform layer assigns these; the core passes them through untouched.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OutputId(pub u32);

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({})", self.0)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display {}", self.0)
    }
}
