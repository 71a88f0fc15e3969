// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::units::Mark;

/// A `SeekPoint` maps the start mark of a unit to its byte offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekPoint {
    /// The start mark of the unit.
    pub mark: Mark,
    /// The byte offset of the unit relative to the start of the payload.
    pub byte_offset: u64,
    /// The number of marks the unit covers.
    pub n_marks: u32,
}

impl SeekPoint {
    pub fn new(mark: Mark, byte_offset: u64, n_marks: u32) -> Self {
        SeekPoint { mark, byte_offset, n_marks }
    }
}

/// `SeekSearchResult` is the result of searching a [`SeekIndex`]. It names the range of the stream
/// wherein the unit containing a mark begins. Ranges are lower-bound inclusive and upper-bound
/// exclusive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekSearchResult {
    /// The index is empty. The entire stream must be searched.
    Stream,
    /// The unit begins before the `SeekPoint`.
    Upper(SeekPoint),
    /// The unit begins at, or after, the `SeekPoint`.
    Lower(SeekPoint),
    /// The unit begins at, or after, the first `SeekPoint` and before the second.
    Range(SeekPoint, SeekPoint),
}

/// A `SeekIndex` stores `SeekPoint`s provided by the container, such as a FLAC `SEEKTABLE`, and is
/// used to narrow the initial search bracket of a seek.
///
/// An index does not need to cover the entire stream. The better the coverage, the fewer probes a
/// seek will need.
#[derive(Clone, Debug, Default)]
pub struct SeekIndex {
    points: Vec<SeekPoint>,
}

impl SeekIndex {
    /// Create an empty `SeekIndex`.
    pub fn new() -> SeekIndex {
        SeekIndex { points: Vec::new() }
    }

    /// Insert a `SeekPoint` into the index.
    ///
    /// Points must be strictly increasing in mark and non-decreasing in byte offset. A point that
    /// would violate this ordering is ignored.
    pub fn insert(&mut self, mark: Mark, byte_offset: u64, n_marks: u32) {
        let point = SeekPoint::new(mark, byte_offset, n_marks);

        let i = self.points.partition_point(|p| p.mark < mark);

        // The previous point must not be at or after the new point in either dimension, and the
        // next point must be after it in both.
        let after_prev = i == 0 || self.points[i - 1].byte_offset <= byte_offset;
        let before_next = self
            .points
            .get(i)
            .map_or(true, |next| next.mark > mark && next.byte_offset >= byte_offset);

        if after_prev && before_next {
            self.points.insert(i, point);
        }
    }

    /// Gets the number of points in the index.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if the index has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Gets the points of the index in increasing mark order.
    pub fn points(&self) -> &[SeekPoint] {
        &self.points
    }

    /// Search the index for the range of the stream wherein the unit containing `mark` begins.
    pub fn search(&self, mark: Mark) -> SeekSearchResult {
        // The number of points at or before the mark.
        let i = self.points.partition_point(|p| p.mark <= mark);

        match (i.checked_sub(1).map(|i| self.points[i]), self.points.get(i)) {
            (None, None) => SeekSearchResult::Stream,
            (None, Some(&upper)) => SeekSearchResult::Upper(upper),
            (Some(lower), None) => SeekSearchResult::Lower(lower),
            (Some(lower), Some(&upper)) => SeekSearchResult::Range(lower, upper),
        }
    }
}
