// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::units::{Mark, MarkMapping, TimeUs};

/// A `SeekMap` provides a coarse, constant-time estimate of the byte position of a time by assuming
/// a constant bitrate over the payload.
///
/// Seek maps are handed to consumers, such as a player's UI, that need a position before any
/// probing has taken place. The estimate is not verified.
#[derive(Clone)]
pub struct SeekMap {
    payload_start: u64,
    payload_end: u64,
    start_mark: Mark,
    total_marks: Mark,
    mapping: Arc<dyn MarkMapping>,
}

impl SeekMap {
    pub fn new(
        payload_start: u64,
        payload_end: u64,
        start_mark: Mark,
        total_marks: Mark,
        mapping: Arc<dyn MarkMapping>,
    ) -> Self {
        SeekMap { payload_start, payload_end, start_mark, total_marks, mapping }
    }

    /// Returns `true` if positions can be estimated.
    pub fn is_seekable(&self) -> bool {
        self.total_marks > self.start_mark && self.payload_end > self.payload_start
    }

    /// Gets the duration of the stream.
    pub fn duration(&self) -> TimeUs {
        self.mapping.mark_to_time(self.total_marks)
    }

    /// Gets the total number of marks in the stream.
    pub fn total_marks(&self) -> Mark {
        self.total_marks
    }

    /// Estimates the byte position of `time`. The estimate is clamped to the payload.
    pub fn seek_position(&self, time: TimeUs) -> u64 {
        if !self.is_seekable() {
            return self.payload_start;
        }

        let mark = self.mapping.time_to_mark(time).clamp(self.start_mark, self.total_marks);

        let num = (mark - self.start_mark) as u128
            * u128::from(self.payload_end - self.payload_start);
        let den = (self.total_marks - self.start_mark) as u128;

        // The quotient never exceeds the payload length.
        let offset = (num / den) as u64;

        (self.payload_start + offset).min(self.payload_end - 1)
    }
}
