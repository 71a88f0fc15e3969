// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::errors::Result;
use crate::io::SeekInput;
use crate::units::Mark;

/// The region of the stream a [`Probe`] may search.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProbeWindow {
    /// The absolute byte position of the candidate. The input is positioned here when a probe is
    /// invoked.
    pub start: u64,
    /// A unit must begin before this position to be reported.
    pub end: u64,
    /// The declared end of the stream. Units may extend up-to, but not past, this position.
    pub stream_end: u64,
}

/// The outcome of verifying a candidate position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProbeResult {
    /// The unit at `pos` contains the target. `mark` is the start mark of the unit.
    TargetFound { pos: u64, mark: Mark },
    /// The unit at `pos`, `len` bytes long, ends at or before the target. `mark` is the end mark of
    /// the unit: the mark of whatever unit follows it.
    Undershoot { pos: u64, len: u64, mark: Mark },
    /// The unit at `pos` begins after the target. `mark` is an upper bound on the start mark of the
    /// unit that is greater than the target.
    Overshoot { pos: u64, mark: Mark },
    /// No valid unit begins in the window.
    NoUnitInRange,
}

/// A verified unit, as parsed by a probe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnitInfo {
    /// The absolute byte position of the unit.
    pub pos: u64,
    /// The length of the unit in bytes.
    pub len: u64,
    /// The start mark of the unit, if the container records it.
    pub start_mark: Option<Mark>,
    /// The end mark of the unit.
    pub end_mark: Mark,
}

impl UnitInfo {
    /// Classifies the unit relative to `target`.
    ///
    /// If the start mark of the unit is not known, a unit that ends after the target is an
    /// overshoot bounded by its end mark.
    pub fn classify(&self, target: Mark) -> ProbeResult {
        if self.end_mark <= target {
            return ProbeResult::Undershoot { pos: self.pos, len: self.len, mark: self.end_mark };
        }

        match self.start_mark {
            Some(start) if start <= target => {
                ProbeResult::TargetFound { pos: self.pos, mark: start }
            }
            Some(start) => ProbeResult::Overshoot { pos: self.pos, mark: start },
            None => ProbeResult::Overshoot { pos: self.pos, mark: self.end_mark },
        }
    }

    /// Gets the absolute byte position immediately following the unit.
    pub fn next_pos(&self) -> u64 {
        self.pos + self.len
    }
}

/// A `Probe` verifies candidate positions for one container format.
///
/// A probe parses the input starting at the candidate position, skipping forward to the first
/// valid unit, and classifies that unit against the target mark. Probes only ever peek or skip
/// forward. If the bytes needed to finish the probe are not buffered, the probe returns an error
/// for which [`Error::is_would_block`](crate::errors::Error::is_would_block) is `true`, and will be
/// invoked again from the same position once more data is available.
pub trait Probe {
    /// Verify the first valid unit that begins in `window`.
    fn probe(
        &mut self,
        input: &mut dyn SeekInput,
        window: &ProbeWindow,
        target: Mark,
    ) -> Result<ProbeResult>;

    /// Find the end mark of the last valid unit that begins in `window`, or `None` if there is no
    /// valid unit in the window.
    fn probe_last(&mut self, input: &mut dyn SeekInput, window: &ProbeWindow)
        -> Result<Option<Mark>>;

    /// Gets the length, in bytes, of the most recently verified unit, if any.
    fn unit_len_hint(&self) -> Option<u64> {
        None
    }
}

impl<P: Probe + ?Sized> Probe for Box<P> {
    fn probe(
        &mut self,
        input: &mut dyn SeekInput,
        window: &ProbeWindow,
        target: Mark,
    ) -> Result<ProbeResult> {
        (**self).probe(input, window, target)
    }

    fn probe_last(
        &mut self,
        input: &mut dyn SeekInput,
        window: &ProbeWindow,
    ) -> Result<Option<Mark>> {
        (**self).probe_last(input, window)
    }

    fn unit_len_hint(&self) -> Option<u64> {
        (**self).unit_len_hint()
    }
}
