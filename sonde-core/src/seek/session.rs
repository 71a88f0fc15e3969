// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::errors::{seek_error, Result, SeekErrorKind};
use crate::io::SeekInput;
use crate::units::{Mark, MarkMapping, TimeUs};

use super::estimator::{BisectionEstimator, ByteRange, Estimate, MarkRange};
use super::index::{SeekIndex, SeekSearchResult};
use super::probe::{Probe, ProbeWindow};
use super::seek_map::SeekMap;
use super::{SeekOptions, SeekPosition};

/// The layout of a stream, as determined by its container's headers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekParams {
    /// The absolute byte position of the first unit of the payload.
    pub payload_start: u64,
    /// The absolute byte position of the end of the stream.
    pub stream_end: u64,
    /// The start mark of the first unit.
    pub start_mark: Mark,
    /// The end mark of the last unit, if known.
    pub total_marks: Option<Mark>,
}

/// The state of a [`SeekSession`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekState {
    /// No seek is in progress.
    Idle,
    /// The total number of marks is unknown. The input must be moved near the end of the stream.
    SeekingToEnd,
    /// Searching the end of the stream for the last unit.
    ReadingTrailingUnit,
    /// Narrowing the search bracket.
    Bisecting,
    /// The seek is complete.
    Converged,
}

/// The result of one [`SeekSession::step`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekStep {
    /// Move the input to the absolute byte position and call `step` again.
    ///
    /// If the position is the current position of the input, the session needs more bytes at that
    /// position than are buffered.
    RepositionTo(u64),
    /// The seek is complete. Resume reading from `resume_pos`. The first unit read from there
    /// starts at `mark`, which is at, or before, the requested time.
    Converged { resume_pos: u64, mark: Mark },
}

/// A `SeekSession` is a resumable seek over a forward-only input.
///
/// A session is started with [`SeekSession::start_seek`] and driven by repeatedly calling
/// [`SeekSession::step`] with the input. Every step either asks the caller to reposition the input
/// or reports the converged position. Nothing ever blocks. Starting a new seek abandons any seek in
/// progress.
pub struct SeekSession<P: Probe> {
    probe: P,
    mapping: Arc<dyn MarkMapping>,
    params: SeekParams,
    options: SeekOptions,
    index: Option<SeekIndex>,
    state: SeekState,
    target: Mark,
    estimator: Option<BisectionEstimator>,
    pending: Option<ProbeWindow>,
    trailing_len: u64,
    trailing_start: u64,
    steps: u32,
    converged: Option<SeekPosition>,
}

impl<P: Probe> SeekSession<P> {
    /// Instantiate a new `SeekSession`.
    pub fn new(
        probe: P,
        mapping: Arc<dyn MarkMapping>,
        params: SeekParams,
        options: SeekOptions,
    ) -> Self {
        SeekSession {
            probe,
            mapping,
            params,
            options,
            index: None,
            state: SeekState::Idle,
            target: params.start_mark,
            estimator: None,
            pending: None,
            trailing_len: options.trailing_window,
            trailing_start: params.stream_end,
            steps: 0,
            converged: None,
        }
    }

    /// Converts this session into one that owns a boxed probe, erasing the type of the probe.
    pub fn into_boxed(self) -> SeekSession<Box<dyn Probe + Send>>
    where
        P: Send + 'static,
    {
        SeekSession {
            probe: Box::new(self.probe),
            mapping: self.mapping,
            params: self.params,
            options: self.options,
            index: self.index,
            state: self.state,
            target: self.target,
            estimator: self.estimator,
            pending: self.pending,
            trailing_len: self.trailing_len,
            trailing_start: self.trailing_start,
            steps: self.steps,
            converged: self.converged,
        }
    }

    /// Provide an index used to narrow the initial search bracket of subsequent seeks.
    pub fn set_index(&mut self, index: SeekIndex) {
        self.index = if index.is_empty() { None } else { Some(index) };
    }

    /// Gets the state of the session.
    pub fn state(&self) -> SeekState {
        self.state
    }

    /// Gets the layout of the stream. The total number of marks is filled in once found.
    pub fn params(&self) -> &SeekParams {
        &self.params
    }

    /// Gets the mark the current, or most recent, seek targets.
    pub fn target_mark(&self) -> Mark {
        self.target
    }

    /// Gets the number of probes run by the current, or most recent, seek.
    pub fn probe_count(&self) -> u32 {
        self.estimator.as_ref().map_or(0, |e| e.probe_count())
    }

    /// Gets the number of candidate windows of the current, or most recent, seek in which no valid
    /// unit was found.
    pub fn retry_count(&self) -> u32 {
        self.estimator.as_ref().map_or(0, |e| e.retries())
    }

    /// Gets the number of steps taken by the current, or most recent, seek.
    pub fn step_count(&self) -> u32 {
        self.steps
    }

    /// Gets the current search bracket, if bisecting.
    pub fn bracket(&self) -> Option<(ByteRange, MarkRange)> {
        self.estimator.as_ref().map(|e| (e.bytes(), e.marks()))
    }

    /// Gets the last known-good position: the bottom of the search bracket, or the start of the
    /// payload if bisection never began. A caller may fall back to it if a seek fails.
    pub fn fallback_position(&self) -> SeekPosition {
        match &self.estimator {
            Some(estimator) => estimator.fallback(),
            None => SeekPosition { pos: self.params.payload_start, mark: self.params.start_mark },
        }
    }

    /// Gets the probe.
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Gets a mutable reference to the probe.
    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }

    /// Gets the mapping between time and marks.
    pub fn mapping(&self) -> &Arc<dyn MarkMapping> {
        &self.mapping
    }

    /// Create a [`SeekMap`] for the stream. Returns `None` if the total number of marks is not
    /// known yet.
    pub fn create_seek_map(&self) -> Option<SeekMap> {
        let total = self.params.total_marks?;

        Some(SeekMap::new(
            self.params.payload_start,
            self.params.stream_end,
            self.params.start_mark,
            total,
            Arc::clone(&self.mapping),
        ))
    }

    /// Abandon any seek in progress.
    pub fn reset(&mut self) {
        self.state = SeekState::Idle;
        self.estimator = None;
        self.pending = None;
        self.trailing_len = self.options.trailing_window;
        self.trailing_start = self.params.stream_end;
        self.steps = 0;
        self.converged = None;
    }

    /// Start a seek to `time`, abandoning any seek in progress. Returns the target mark.
    ///
    /// Times before the start of the stream are clamped to the start. If the total number of marks
    /// is known, a time past the end of the stream is an error.
    pub fn start_seek(&mut self, time: TimeUs) -> Result<Mark> {
        self.reset();

        if self.params.stream_end <= self.params.payload_start {
            return seek_error(SeekErrorKind::Unseekable);
        }

        let mut target = self.mapping.time_to_mark(time);

        if target < self.params.start_mark {
            debug!("seek: clamping target mark {} to {}", target, self.params.start_mark);
            target = self.params.start_mark;
        }

        if let Some(total) = self.params.total_marks {
            if target > total {
                return seek_error(SeekErrorKind::OutOfRange);
            }
        }

        info!("seek: time={}us, target mark={}", time, target);

        self.target = target;

        match self.params.total_marks {
            Some(total) => self.begin_bisection(total),
            // The start of the stream is already known.
            None if target <= self.params.start_mark => self.begin_bisection(target),
            None => self.state = SeekState::SeekingToEnd,
        }

        Ok(target)
    }

    /// Advance the seek by one step.
    pub fn step(&mut self, input: &mut dyn SeekInput) -> Result<SeekStep> {
        match self.state {
            SeekState::Idle => return seek_error(SeekErrorKind::NotSeeking),
            SeekState::Converged => {
                if let Some(pos) = self.converged {
                    return Ok(SeekStep::Converged { resume_pos: pos.pos, mark: pos.mark });
                }
            }
            _ => (),
        }

        self.steps += 1;

        if self.steps > self.options.max_steps {
            warn!("seek: no convergence after {} steps", self.options.max_steps);
            self.state = SeekState::Idle;
            return seek_error(SeekErrorKind::StepLimit);
        }

        let result = match self.state {
            SeekState::SeekingToEnd => Ok(self.seek_to_end()),
            SeekState::ReadingTrailingUnit => self.read_trailing_unit(input),
            _ => self.bisect(input),
        };

        if result.is_err() {
            self.state = SeekState::Idle;
        }

        result
    }

    fn begin_bisection(&mut self, total: Mark) {
        let mut bytes = ByteRange::new(self.params.payload_start, self.params.stream_end);
        let mut marks = MarkRange::new(self.params.start_mark, total);

        if let Some(index) = &self.index {
            let payload = self.params.payload_start..=self.params.stream_end;

            let result = index.search(self.target);

            if let SeekSearchResult::Lower(lower) | SeekSearchResult::Range(lower, _) = result {
                let pos = self.params.payload_start.saturating_add(lower.byte_offset);
                if payload.contains(&pos) && lower.mark >= marks.low {
                    bytes.low = pos;
                    marks.low = lower.mark;
                }
            }

            if let SeekSearchResult::Upper(upper) | SeekSearchResult::Range(_, upper) = result {
                let pos = self.params.payload_start.saturating_add(upper.byte_offset);
                if payload.contains(&pos) && pos >= bytes.low && upper.mark <= marks.high {
                    bytes.high = pos;
                    marks.high = upper.mark;
                }
            }

            debug!("seek: index narrowed bracket to [{}, {}]", bytes.low, bytes.high);
        }

        self.estimator = Some(BisectionEstimator::new(
            self.target,
            bytes,
            marks,
            self.params.stream_end,
            &self.options,
        ));
        self.state = SeekState::Bisecting;
    }

    fn seek_to_end(&mut self) -> SeekStep {
        let start = cmp::max(
            self.params.stream_end.saturating_sub(self.trailing_len),
            self.params.payload_start,
        );

        debug!("seek: searching for the last unit in [{}, {})", start, self.params.stream_end);

        self.trailing_start = start;
        self.state = SeekState::ReadingTrailingUnit;

        SeekStep::RepositionTo(start)
    }

    fn read_trailing_unit(&mut self, input: &mut dyn SeekInput) -> Result<SeekStep> {
        let window = ProbeWindow {
            start: self.trailing_start,
            end: self.params.stream_end,
            stream_end: self.params.stream_end,
        };

        if input.pos() != window.start {
            return Ok(SeekStep::RepositionTo(window.start));
        }

        let total = match self.probe.probe_last(input, &window) {
            Ok(total) => total,
            Err(err) if err.is_would_block() => return Ok(SeekStep::RepositionTo(window.start)),
            Err(err) => return Err(err),
        };

        match total {
            Some(total) => {
                info!("seek: stream has {} marks", total);

                self.params.total_marks = Some(total);

                if self.target > total {
                    return seek_error(SeekErrorKind::OutOfRange);
                }

                self.begin_bisection(total);
                self.advance()
            }
            None if window.start <= self.params.payload_start => {
                seek_error(SeekErrorKind::SyncLost)
            }
            None => {
                // Widen the trailing window and try again.
                self.trailing_len = self.trailing_len.saturating_mul(2);
                Ok(self.seek_to_end())
            }
        }
    }

    fn bisect(&mut self, input: &mut dyn SeekInput) -> Result<SeekStep> {
        if let Some(window) = self.pending {
            if input.pos() != window.start {
                return Ok(SeekStep::RepositionTo(window.start));
            }

            let result = match self.probe.probe(input, &window, self.target) {
                Ok(result) => result,
                Err(err) if err.is_would_block() => {
                    return Ok(SeekStep::RepositionTo(window.start))
                }
                Err(err) => return Err(err),
            };

            debug!("seek: probe at {} returned {:?}", window.start, result);

            self.pending = None;

            if let Some(estimator) = self.estimator.as_mut() {
                estimator.update(&window, result)?;
            }
        }

        self.advance()
    }

    fn advance(&mut self) -> Result<SeekStep> {
        let bias = if self.options.interpolation_bias {
            self.probe.unit_len_hint().unwrap_or(0)
        }
        else {
            0
        };

        let estimator = match self.estimator.as_mut() {
            Some(estimator) => estimator,
            None => return seek_error(SeekErrorKind::NotSeeking),
        };

        match estimator.estimate(bias) {
            Estimate::Probe(window) => {
                self.pending = Some(window);
                Ok(SeekStep::RepositionTo(window.start))
            }
            Estimate::Converged(pos) => {
                info!(
                    "seek: converged at {} (mark={}) after {} probes",
                    pos.pos,
                    pos.mark,
                    estimator.probe_count()
                );

                self.converged = Some(pos);
                self.state = SeekState::Converged;
                Ok(SeekStep::Converged { resume_pos: pos.pos, mark: pos.mark })
            }
        }
    }
}
