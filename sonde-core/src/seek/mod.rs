// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `seek` module implements the streaming seek estimation engine.
//!
//! Given a partially buffered, forward-only byte source, the engine converges on the byte offset
//! of the unit (page, frame) containing a requested mark. It does so by bisecting a byte bracket,
//! proposing candidates by linear interpolation, and verifying each candidate with a container
//! specific [`Probe`]. The engine never blocks: whenever it needs bytes at another position it
//! returns [`SeekStep::RepositionTo`] and resumes on the next call to [`SeekSession::step`].

mod estimator;
mod index;
mod probe;
mod seek_map;
mod session;
mod sync;

pub use estimator::{BisectionEstimator, ByteRange, Estimate, MarkRange};
pub use index::{SeekIndex, SeekPoint, SeekSearchResult};
pub use probe::{Probe, ProbeResult, ProbeWindow, UnitInfo};
pub use seek_map::SeekMap;
pub use session::{SeekParams, SeekSession, SeekState, SeekStep};
pub use sync::{SyncPattern, SyncScan, SyncScanner};

use crate::units::Mark;

/// `SeekOptions` is a common set of options that all seek sessions use.
#[derive(Copy, Clone, Debug)]
pub struct SeekOptions {
    /// Once the search window is narrower than this many bytes, interpolation stops and the
    /// remaining window is scanned forward unit-by-unit.
    ///
    /// Default: 16192 bytes.
    pub linear_scan_threshold: u64,
    /// The maximum number of candidate positions that may fail verification during one seek.
    ///
    /// Default: 32.
    pub max_retries: u32,
    /// The maximum number of steps one seek may take before it is abandoned.
    ///
    /// Default: 1024.
    pub max_steps: u32,
    /// The initial distance from the end of the stream at which to search for the trailing unit
    /// when the duration of the stream is not known. The distance doubles every time no unit is
    /// found.
    ///
    /// Default: 64kB.
    pub trailing_window: u64,
    /// The maximum number of bytes searched for a synchronization pattern from one position.
    ///
    /// Default: 256kB.
    pub max_scan_len: u64,
    /// If `true`, interpolated candidates are moved back by the length of the most recently
    /// observed unit so that probes tend to land just before the target unit.
    ///
    /// Default: `true`.
    pub interpolation_bias: bool,
}

impl Default for SeekOptions {
    fn default() -> Self {
        SeekOptions {
            linear_scan_threshold: 2 * 8096,
            max_retries: 32,
            max_steps: 1024,
            trailing_window: 64 * 1024,
            max_scan_len: 256 * 1024,
            interpolation_bias: true,
        }
    }
}

/// A byte position paired with the mark of the unit starting there.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekPosition {
    /// The absolute byte position of the unit.
    pub pos: u64,
    /// The start mark of the unit at `pos`.
    pub mark: Mark,
}
