// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `adapter` module glues a [`SeekSession`] into a demuxer's read loop.

use log::{debug, warn};

use crate::errors::{seek_error, Result, SeekErrorKind};
use crate::io::SeekInput;
use crate::seek::{Probe, SeekMap, SeekPosition, SeekSession, SeekStep};
use crate::units::{Mark, TimeUs};

/// The phase of a demuxer's read loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Units are read sequentially and delivered.
    Streaming,
    /// A seek is in progress. The read loop must drive [`SeekAdapter::poll`] and reposition the
    /// input as asked.
    Seeking,
    /// The seek converged. Units are read sequentially from the resume position, but units that
    /// end at, or before, the target are discarded.
    Discarding,
}

/// What the read loop should do with a unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnitDisposition {
    Discard,
    Deliver,
}

/// A `SeekAdapter` owns the [`SeekSession`] of one stream and tracks which phase the surrounding
/// read loop is in.
pub struct SeekAdapter<P: Probe> {
    session: SeekSession<P>,
    phase: Phase,
    target: Mark,
    resume: Option<SeekPosition>,
}

impl<P: Probe> SeekAdapter<P> {
    pub fn new(session: SeekSession<P>) -> Self {
        SeekAdapter { session, phase: Phase::Streaming, target: 0, resume: None }
    }

    /// Converts this adapter into one that owns a boxed probe, erasing the type of the probe.
    pub fn into_boxed(self) -> SeekAdapter<Box<dyn Probe + Send>>
    where
        P: Send + 'static,
    {
        SeekAdapter {
            session: self.session.into_boxed(),
            phase: self.phase,
            target: self.target,
            resume: self.resume,
        }
    }

    /// Gets the phase of the read loop.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Gets the target mark of the current, or most recent, seek.
    pub fn target_mark(&self) -> Mark {
        self.target
    }

    /// Gets the position the most recent seek converged on, if any.
    pub fn resume_position(&self) -> Option<SeekPosition> {
        self.resume
    }

    /// Gets the underlying session.
    pub fn session(&self) -> &SeekSession<P> {
        &self.session
    }

    /// Gets a mutable reference to the underlying session.
    pub fn session_mut(&mut self) -> &mut SeekSession<P> {
        &mut self.session
    }

    /// Gets a seek map for the stream, if the duration of the stream is known.
    pub fn seek_map(&self) -> Option<SeekMap> {
        self.session.create_seek_map()
    }

    /// Begin seeking to `time`, abandoning any seek in progress. Returns the target mark.
    pub fn seek(&mut self, time: TimeUs) -> Result<Mark> {
        self.resume = None;

        match self.session.start_seek(time) {
            Ok(target) => {
                self.target = target;
                self.phase = Phase::Seeking;
                Ok(target)
            }
            Err(err) => {
                self.phase = Phase::Streaming;
                Err(err)
            }
        }
    }

    /// Drive the seek in progress by one step.
    ///
    /// On convergence the adapter enters the discarding phase. If the seek fails, the adapter
    /// returns to the streaming phase and the error is returned. The caller may then resume from
    /// [`SeekAdapter::fallback_position`].
    pub fn poll(&mut self, input: &mut dyn SeekInput) -> Result<SeekStep> {
        if self.phase != Phase::Seeking {
            return seek_error(SeekErrorKind::NotSeeking);
        }

        match self.session.step(input) {
            Ok(SeekStep::Converged { resume_pos, mark }) => {
                debug!(
                    "adapter: resuming at {}, discarding until mark {}",
                    resume_pos, self.target
                );

                self.resume = Some(SeekPosition { pos: resume_pos, mark });
                self.phase = Phase::Discarding;
                Ok(SeekStep::Converged { resume_pos, mark })
            }
            Ok(step) => Ok(step),
            Err(err) => {
                warn!("adapter: seek failed: {}", err);
                self.phase = Phase::Streaming;
                Err(err)
            }
        }
    }

    /// Decide whether the unit spanning `[start_mark, end_mark)` should be delivered.
    ///
    /// While discarding, units ending at, or before, the target are discarded. The first unit that
    /// reaches the target is delivered and the adapter returns to the streaming phase.
    pub fn filter_unit(&mut self, start_mark: Mark, end_mark: Mark) -> UnitDisposition {
        if self.phase != Phase::Discarding {
            return UnitDisposition::Deliver;
        }

        if end_mark <= self.target {
            debug!("adapter: discarding unit [{}, {})", start_mark, end_mark);
            return UnitDisposition::Discard;
        }

        self.phase = Phase::Streaming;
        UnitDisposition::Deliver
    }

    /// Gets the last known-good position of the current, or most recent, seek.
    pub fn fallback_position(&self) -> SeekPosition {
        self.session.fallback_position()
    }

    /// Abandon any seek in progress and return to the streaming phase.
    pub fn cancel(&mut self) {
        self.session.reset();
        self.phase = Phase::Streaming;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Phase, SeekAdapter, UnitDisposition};
    use crate::errors::{Error, Result, SeekErrorKind};
    use crate::io::{MemoryInput, SeekInput};
    use crate::seek::{
        Probe, ProbeResult, ProbeWindow, SeekOptions, SeekParams, SeekSession, SeekStep, UnitInfo,
    };
    use crate::units::{Mark, SampleRateMapping};

    /// A stream of fixed size units, 100 bytes and 10 marks long, beginning at byte 0.
    struct FixedProbe {
        count: u64,
    }

    impl FixedProbe {
        fn unit(&self, index: u64) -> UnitInfo {
            let start = index as Mark * 10;
            UnitInfo { pos: index * 100, len: 100, start_mark: Some(start), end_mark: start + 10 }
        }
    }

    impl Probe for FixedProbe {
        fn probe(
            &mut self,
            _: &mut dyn SeekInput,
            window: &ProbeWindow,
            target: Mark,
        ) -> Result<ProbeResult> {
            let index = window.start.div_ceil(100);

            if index >= self.count || index * 100 >= window.end {
                return Ok(ProbeResult::NoUnitInRange);
            }

            Ok(self.unit(index).classify(target))
        }

        fn probe_last(&mut self, _: &mut dyn SeekInput, _: &ProbeWindow) -> Result<Option<Mark>> {
            Ok(None)
        }
    }

    fn adapter(total: Option<Mark>) -> SeekAdapter<FixedProbe> {
        let params =
            SeekParams { payload_start: 0, stream_end: 10_000, start_mark: 0, total_marks: total };
        let options = SeekOptions { linear_scan_threshold: 0, ..Default::default() };

        let session = SeekSession::new(
            FixedProbe { count: 100 },
            Arc::new(SampleRateMapping::new(1000)),
            params,
            options,
        );

        SeekAdapter::new(session)
    }

    fn drive(adapter: &mut SeekAdapter<FixedProbe>, input: &mut MemoryInput) -> Result<u64> {
        loop {
            match adapter.poll(input)? {
                SeekStep::RepositionTo(pos) => input.reposition(pos)?,
                SeekStep::Converged { resume_pos, .. } => return Ok(resume_pos),
            }
        }
    }

    #[test]
    fn verify_adapter_discards_until_target() {
        let mut adapter = adapter(Some(1000));
        let mut input = MemoryInput::new(vec![0; 10_000]);

        assert_eq!(adapter.phase(), Phase::Streaming);
        assert_eq!(adapter.seek(423_000).unwrap(), 423);
        assert_eq!(adapter.phase(), Phase::Seeking);

        assert_eq!(drive(&mut adapter, &mut input).unwrap(), 4200);
        assert_eq!(adapter.phase(), Phase::Discarding);
        assert_eq!(adapter.resume_position().map(|p| p.mark), Some(420));

        // Units before the target unit, if the resume position precedes it, are discarded.
        assert_eq!(adapter.filter_unit(410, 420), UnitDisposition::Discard);
        assert_eq!(adapter.phase(), Phase::Discarding);

        assert_eq!(adapter.filter_unit(420, 430), UnitDisposition::Deliver);
        assert_eq!(adapter.phase(), Phase::Streaming);

        // Every unit after is delivered.
        assert_eq!(adapter.filter_unit(0, 10), UnitDisposition::Deliver);

        assert!(adapter.seek_map().is_some());
    }

    #[test]
    fn verify_adapter_failed_seek_streams() {
        // The total is not known, and the trailing unit can not be found.
        let mut adapter = adapter(None);
        let mut input = MemoryInput::new(vec![0; 10_000]);

        adapter.seek(500_000).unwrap();

        assert!(matches!(
            drive(&mut adapter, &mut input),
            Err(Error::SeekError(SeekErrorKind::SyncLost))
        ));
        assert_eq!(adapter.phase(), Phase::Streaming);
        assert_eq!(adapter.fallback_position().pos, 0);

        // Polling without a seek in progress is an error.
        assert!(matches!(
            adapter.poll(&mut input),
            Err(Error::SeekError(SeekErrorKind::NotSeeking))
        ));
    }

    #[test]
    fn verify_adapter_cancel() {
        let mut adapter = adapter(Some(1000));
        let mut input = MemoryInput::new(vec![0; 10_000]);

        adapter.seek(700_000).unwrap();
        let _ = adapter.poll(&mut input).unwrap();

        adapter.cancel();
        assert_eq!(adapter.phase(), Phase::Streaming);
        assert_eq!(adapter.filter_unit(0, 10), UnitDisposition::Deliver);
    }

    #[test]
    fn verify_adapter_into_boxed() {
        let mut adapter = adapter(Some(1000));
        let mut input = MemoryInput::new(vec![0; 10_000]);

        adapter.seek(423_000).unwrap();

        // A seek in progress survives erasing the probe type.
        let mut boxed = adapter.into_boxed();
        assert_eq!(boxed.phase(), Phase::Seeking);
        assert_eq!(boxed.target_mark(), 423);

        let resume = loop {
            match boxed.poll(&mut input).unwrap() {
                SeekStep::RepositionTo(pos) => input.reposition(pos).unwrap(),
                SeekStep::Converged { resume_pos, .. } => break resume_pos,
            }
        };

        assert_eq!(resume, 4200);
        assert_eq!(boxed.phase(), Phase::Discarding);
    }
}
