// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::debug;

use sonde_core::errors::{Error, Result};
use sonde_core::io::SeekInput;
use sonde_core::seek::{Probe, ProbeResult, ProbeWindow};
use sonde_core::units::Mark;

use crate::frame::{find_frame, verify_frame_at, FrameLocation};
use crate::stream::StreamInfo;

/// A decode probe for native FLAC streams.
///
/// Frames do not record their length, so the probe verifies the whole frame at, or after, the
/// candidate position: its header checksum, and the checksum of its footer. A frame states the
/// number of its first sample and its block length, so its exact mark span is known. A frame that
/// undershoots the target is followed by the frames immediately after it until one contains the
/// target.
pub struct FrameProbe {
    info: StreamInfo,
    max_scan_len: u64,
    last_len: Option<u64>,
}

impl FrameProbe {
    pub fn new(info: StreamInfo, max_scan_len: u64) -> Self {
        FrameProbe { info, max_scan_len, last_len: None }
    }

    /// Gets the stream information frames are verified against.
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Reads the frame at `pos` if it is valid.
    fn frame_at(&self, input: &mut dyn SeekInput, pos: u64) -> Result<Option<FrameLocation>> {
        let offset = (pos - input.pos()) as usize;

        match verify_frame_at(input, offset, &self.info) {
            Ok(frame) => Ok(frame),
            Err(Error::DecodeError(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Probe for FrameProbe {
    fn probe(
        &mut self,
        input: &mut dyn SeekInput,
        window: &ProbeWindow,
        target: Mark,
    ) -> Result<ProbeResult> {
        let mut frame =
            match find_frame(input, window.start, window.end, &self.info, self.max_scan_len)? {
                Some(frame) => frame,
                None => return Ok(ProbeResult::NoUnitInRange),
            };

        // The position of the first undershooting frame, the position after the last, and its
        // end mark.
        let mut run: Option<(u64, u64, Mark)> = None;

        loop {
            self.last_len = Some(frame.len);

            let unit = frame.unit();

            match unit.classify(target) {
                ProbeResult::Undershoot { mark, .. } => {
                    let start = run.map_or(unit.pos, |(start, _, _)| start);
                    run = Some((start, unit.next_pos(), mark));
                }
                result @ ProbeResult::TargetFound { .. } => return Ok(result),
                result if run.is_none() => return Ok(result),
                // The target falls in a gap between two frames.
                _ => break,
            }

            let next = unit.next_pos();

            if next >= window.stream_end || next - window.start > self.max_scan_len {
                break;
            }

            frame = match self.frame_at(input, next) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                // Return the progress made so far rather than waiting for more data.
                Err(err) if err.is_would_block() => break,
                Err(err) => return Err(err),
            };
        }

        match run {
            Some((pos, end, mark)) => {
                debug!("flac: frames [{}, {}) end before the target at mark {}", pos, end, mark);
                Ok(ProbeResult::Undershoot { pos, len: end - pos, mark })
            }
            None => Ok(ProbeResult::NoUnitInRange),
        }
    }

    fn probe_last(
        &mut self,
        input: &mut dyn SeekInput,
        window: &ProbeWindow,
    ) -> Result<Option<Mark>> {
        let mut from = window.start;
        let mut last = None;

        while let Some(frame) =
            find_frame(input, from, window.end, &self.info, self.max_scan_len)?
        {
            last = Some(frame.unit().end_mark);
            from = frame.pos + frame.len;
        }

        Ok(last)
    }

    fn unit_len_hint(&self) -> Option<u64> {
        self.last_len
    }
}
