// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;

use log::{debug, warn};

use crate::errors::{seek_error, Result, SeekErrorKind};
use crate::units::Mark;

use super::probe::{ProbeResult, ProbeWindow};
use super::{SeekOptions, SeekPosition};

/// A half-open range of absolute byte positions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub low: u64,
    pub high: u64,
}

impl ByteRange {
    pub fn new(low: u64, high: u64) -> Self {
        ByteRange { low, high }
    }

    /// Gets the number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.high.saturating_sub(self.low)
    }

    /// Returns `true` if the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A range of marks. `low` is the exact start mark of the unit at the low byte position, while
/// `high` may be an upper bound on the start mark of the unit at the high byte position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MarkRange {
    pub low: Mark,
    pub high: Mark,
}

impl MarkRange {
    pub fn new(low: Mark, high: Mark) -> Self {
        MarkRange { low, high }
    }
}

/// The next action proposed by a [`BisectionEstimator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Estimate {
    /// Verify the candidate at the start of the window.
    Probe(ProbeWindow),
    /// The search is complete.
    Converged(SeekPosition),
}

/// A `BisectionEstimator` narrows a byte bracket around the unit containing a target mark.
///
/// The bracket is maintained such that the unit containing the target begins in `[low, high]`,
/// and `low` is always the position of a verified unit boundary whose start mark is at or before
/// the target. In addition, a `ceiling` (`low <= ceiling <= high`) tracks the position past which
/// probing has shown no unit begins before `high`, so that candidates are never proposed in a
/// region already known to be empty.
///
/// Candidates are proposed by linear interpolation of the target between the bracket marks. If an
/// update fails to halve the search window, or a candidate turns out to be empty, the next
/// candidate bisects the window instead. Once the window is narrower than the linear scan
/// threshold, the window is scanned forward from `low`.
pub struct BisectionEstimator {
    target: Mark,
    bytes: ByteRange,
    marks: MarkRange,
    ceiling: u64,
    stream_end: u64,
    threshold: u64,
    max_retries: u32,
    retries: u32,
    probes: u32,
    bisect_next: bool,
    converged: Option<SeekPosition>,
}

impl BisectionEstimator {
    /// Instantiate a new `BisectionEstimator`.
    ///
    /// `bytes.low` must be a unit boundary with a start mark of `marks.low`. `bytes.high` is either
    /// a unit boundary, or the end of the payload, and `marks.high` bounds the start mark of the
    /// unit there.
    pub fn new(
        target: Mark,
        bytes: ByteRange,
        marks: MarkRange,
        stream_end: u64,
        options: &SeekOptions,
    ) -> Self {
        let high = cmp::max(bytes.low, cmp::min(bytes.high, stream_end));
        let high_mark = cmp::max(marks.low, marks.high);

        // A target at, or past, the high mark resumes at the high byte position. Usually this is
        // a seek to the very end of the stream.
        let converged = if target > marks.low && target >= high_mark {
            Some(SeekPosition { pos: high, mark: high_mark })
        }
        else {
            None
        };

        BisectionEstimator {
            target,
            bytes: ByteRange::new(bytes.low, high),
            marks: MarkRange::new(marks.low, high_mark),
            ceiling: high,
            stream_end,
            threshold: options.linear_scan_threshold,
            max_retries: options.max_retries,
            retries: 0,
            probes: 0,
            bisect_next: false,
            converged,
        }
    }

    /// Gets the target mark.
    pub fn target(&self) -> Mark {
        self.target
    }

    /// Gets the current byte bracket.
    pub fn bytes(&self) -> ByteRange {
        self.bytes
    }

    /// Gets the current mark bracket.
    pub fn marks(&self) -> MarkRange {
        self.marks
    }

    /// Gets the number of probe results applied so far.
    pub fn probe_count(&self) -> u32 {
        self.probes
    }

    /// Gets the number of failed probes so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Gets the converged position, if the search is complete.
    pub fn converged(&self) -> Option<SeekPosition> {
        self.converged
    }

    /// Gets the last known-good position: the verified unit boundary at the bottom of the bracket.
    pub fn fallback(&self) -> SeekPosition {
        SeekPosition { pos: self.bytes.low, mark: self.marks.low }
    }

    /// Propose the next action.
    ///
    /// `bias` is subtracted from interpolated candidates to make probes land slightly before the
    /// unit containing the target. It is typically the length of the last verified unit.
    pub fn estimate(&mut self, bias: u64) -> Estimate {
        if let Some(pos) = self.converged {
            return Estimate::Converged(pos);
        }

        let low = self.bytes.low;

        // The unit at low contains the target, or nothing remains to search.
        if self.target <= self.marks.low
            || low >= self.bytes.high
            || low >= self.ceiling
            || self.marks.low >= self.marks.high
        {
            return self.converge(low, self.marks.low);
        }

        let span = self.ceiling - low;

        let window = if span < self.threshold {
            // Scan forward, unit-by-unit, from the bottom of the bracket.
            ProbeWindow { start: low, end: self.stream_end, stream_end: self.stream_end }
        }
        else if self.bisect_next {
            ProbeWindow { start: low + span / 2, end: self.ceiling, stream_end: self.stream_end }
        }
        else {
            // Interpolate the target between the bracket marks. The product may require up-to 128
            // bits.
            let num = (self.target - self.marks.low) as u128 * u128::from(self.bytes.len());
            let den = (self.marks.high - self.marks.low) as u128;

            let offset = u64::try_from(num / den).unwrap_or(u64::MAX);
            let candidate = low.saturating_add(offset).saturating_sub(bias);

            ProbeWindow {
                start: candidate.clamp(low, self.ceiling - 1),
                end: self.ceiling,
                stream_end: self.stream_end,
            }
        };

        debug!(
            "bisect: target={}, bracket=[{}, {}] ({}, {}), ceiling={}, candidate={}",
            self.target,
            self.bytes.low,
            self.bytes.high,
            self.marks.low,
            self.marks.high,
            self.ceiling,
            window.start
        );

        Estimate::Probe(window)
    }

    /// Narrow the bracket using the result of probing `window`.
    pub fn update(&mut self, window: &ProbeWindow, result: ProbeResult) -> Result<()> {
        if self.converged.is_some() {
            return Ok(());
        }

        self.probes += 1;

        let span = self.ceiling - self.bytes.low;
        let scanning = window.start <= self.bytes.low;

        match result {
            ProbeResult::TargetFound { pos, mark } => {
                debug!("bisect: found target at {} (mark={})", pos, mark);
                self.converge(pos, mark);
                return Ok(());
            }
            ProbeResult::Undershoot { pos, len, mark } => {
                let next = cmp::max(pos.saturating_add(len), self.bytes.low + 1);

                if next > self.bytes.high {
                    warn!("bisect: unit at {} extends past the bracket", pos);
                }

                self.bytes.low = cmp::min(next, self.bytes.high);
                self.marks.low = mark.clamp(self.marks.low, cmp::min(self.target, self.marks.high));
                self.ceiling = cmp::max(self.ceiling, self.bytes.low);
            }
            ProbeResult::Overshoot { pos, mark } => {
                if scanning || pos <= self.bytes.low {
                    // No unit begins between low and the overshooting unit.
                    let (pos, mark) = (self.bytes.low, self.marks.low);
                    self.converge(pos, mark);
                    return Ok(());
                }

                // A unit beginning at, or after, the ceiling is already known.
                if pos < self.ceiling {
                    self.bytes.high = pos;
                    self.marks.high = mark.clamp(self.marks.low, self.marks.high);
                }

                // Nothing begins between the candidate and the overshooting unit.
                self.ceiling = cmp::min(self.ceiling, window.start);
            }
            ProbeResult::NoUnitInRange => {
                self.retries += 1;

                if self.retries > self.max_retries {
                    warn!("bisect: no valid unit found after {} attempts", self.retries);
                    return seek_error(SeekErrorKind::RetriesExhausted);
                }

                if scanning {
                    // Nothing valid follows the bottom of the bracket. Fall back to it.
                    warn!(
                        "bisect: no valid unit after {}, using last known-good unit",
                        window.start
                    );
                    let (pos, mark) = (self.bytes.low, self.marks.low);
                    self.converge(pos, mark);
                    return Ok(());
                }

                debug!("bisect: no valid unit in [{}, {})", window.start, window.end);

                self.ceiling = cmp::min(self.ceiling, window.start);
                self.bisect_next = true;
                return Ok(());
            }
        }

        // If the window did not at-least halve, bisect on the next iteration.
        self.bisect_next = self.ceiling.saturating_sub(self.bytes.low) > span / 2;

        Ok(())
    }

    fn converge(&mut self, pos: u64, mark: Mark) -> Estimate {
        let pos = SeekPosition { pos, mark };
        self.converged = Some(pos);
        Estimate::Converged(pos)
    }
}
