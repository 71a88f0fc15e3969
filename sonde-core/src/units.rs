// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `units` module defines the position units used by the seek engine and the mapping between
//! them and time.

/// A `Mark` is a monotonically non-decreasing position intrinsic to a media stream, such as a
/// sample count or a granule position. It is distinct from both time and byte offset.
pub type Mark = i64;

/// A time, in microseconds.
pub type TimeUs = u64;

const MICROS_PER_SECOND: u128 = 1_000_000;

/// A `MarkMapping` converts between time and marks for a particular stream.
///
/// Implementations must be monotonic: if `a <= b` then `time_to_mark(a) <= time_to_mark(b)`, and
/// likewise for `mark_to_time`. The seek engine relies on this and does not verify it.
pub trait MarkMapping: Send + Sync {
    /// Convert a time, in microseconds, to a mark.
    fn time_to_mark(&self, time: TimeUs) -> Mark;

    /// Convert a mark to a time, in microseconds. Marks before the start of the stream are
    /// mapped to 0.
    fn mark_to_time(&self, mark: Mark) -> TimeUs;
}

/// A `SampleRateMapping` maps time to a sample count at a fixed sample rate, optionally offset by a
/// fixed number of samples (e.g., the Opus pre-skip, which is included in granule positions).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SampleRateMapping {
    /// The number of marks per second.
    pub rate: u32,
    /// The mark that corresponds to time 0.
    pub offset: Mark,
}

impl SampleRateMapping {
    /// Creates a new `SampleRateMapping`. Panics if the rate is 0.
    pub fn new(rate: u32) -> Self {
        SampleRateMapping::with_offset(rate, 0)
    }

    /// Creates a new `SampleRateMapping` where time 0 maps to `offset`. Panics if the rate is 0.
    pub fn with_offset(rate: u32, offset: Mark) -> Self {
        if rate == 0 {
            panic!("SampleRateMapping cannot have a rate of 0");
        }

        SampleRateMapping { rate, offset }
    }
}

impl MarkMapping for SampleRateMapping {
    fn time_to_mark(&self, time: TimeUs) -> Mark {
        // The product requires up-to 96-bits (32-bit rate * 64-bit time).
        let marks = u128::from(time) * u128::from(self.rate) / MICROS_PER_SECOND;
        self.offset.saturating_add(i64::try_from(marks).unwrap_or(i64::MAX))
    }

    fn mark_to_time(&self, mark: Mark) -> TimeUs {
        let marks = mark.saturating_sub(self.offset).max(0) as u128;
        let time = marks * MICROS_PER_SECOND / u128::from(self.rate);
        u64::try_from(time).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::{MarkMapping, SampleRateMapping};

    #[test]
    fn verify_sample_rate_mapping() {
        let mapping = SampleRateMapping::new(44_100);

        assert_eq!(mapping.time_to_mark(0), 0);
        assert_eq!(mapping.time_to_mark(1_000_000), 44_100);
        assert_eq!(mapping.time_to_mark(1_500_000), 66_150);
        assert_eq!(mapping.mark_to_time(44_100), 1_000_000);
        assert_eq!(mapping.mark_to_time(-5), 0);

        // No overflow for very large times.
        assert_eq!(mapping.time_to_mark(u64::MAX), 813_501_413_650_591_226);
    }

    #[test]
    fn verify_sample_rate_mapping_offset() {
        // Opus streams count the pre-skip in their granule positions.
        let mapping = SampleRateMapping::with_offset(48_000, 312);

        assert_eq!(mapping.time_to_mark(0), 312);
        assert_eq!(mapping.time_to_mark(20_000), 1_272);
        assert_eq!(mapping.mark_to_time(1_272), 20_000);
        assert_eq!(mapping.mark_to_time(100), 0);
    }
}
