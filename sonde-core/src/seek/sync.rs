// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;

use crate::errors::Result;
use crate::io::SeekInput;

/// The number of start positions examined by the first scan iteration. Subsequent iterations
/// double it, so a pattern near the start of the window is found with few bytes buffered.
const INITIAL_SCAN_WINDOW: u64 = 256;

/// A `SyncPattern` is a fixed-width synchronization pattern, such as a page or frame magic.
///
/// Each byte of the pattern is compared under a mask so that patterns that are not byte aligned
/// in their entirety (e.g., the 14-bit FLAC frame sync code) may be expressed. An empty mask means
/// every bit is significant.
#[derive(Copy, Clone, Debug)]
pub struct SyncPattern {
    bytes: &'static [u8],
    mask: &'static [u8],
}

impl SyncPattern {
    /// Create a pattern where every bit is significant.
    pub const fn exact(bytes: &'static [u8]) -> Self {
        SyncPattern { bytes, mask: &[] }
    }

    /// Create a masked pattern. The mask must be the same length as the pattern.
    pub const fn masked(bytes: &'static [u8], mask: &'static [u8]) -> Self {
        assert!(bytes.len() == mask.len(), "pattern and mask must be the same length");
        SyncPattern { bytes, mask }
    }

    /// Gets the length of the pattern in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the pattern is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns `true` if the start of `buf` matches the pattern.
    #[inline]
    pub fn matches(&self, buf: &[u8]) -> bool {
        if buf.len() < self.bytes.len() {
            return false;
        }

        if self.mask.is_empty() {
            &buf[..self.bytes.len()] == self.bytes
        }
        else {
            buf.iter().zip(self.bytes).zip(self.mask).all(|((&b, &p), &m)| b & m == p)
        }
    }
}

/// The outcome of locating a synchronization pattern in a [`SeekInput`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncScan {
    /// The pattern begins at the absolute byte position.
    Found(u64),
    /// The pattern does not begin anywhere in the searched region, but the stream continues past
    /// it.
    NotFound,
    /// The pattern does not begin anywhere before the declared end of the stream.
    EndOfStream,
}

/// A `SyncScanner` searches a byte window for a [`SyncPattern`].
#[derive(Copy, Clone, Debug)]
pub struct SyncScanner {
    pattern: SyncPattern,
}

impl SyncScanner {
    /// Panics if the pattern is empty.
    pub const fn new(pattern: SyncPattern) -> Self {
        assert!(!pattern.bytes.is_empty(), "sync pattern must not be empty");
        SyncScanner { pattern }
    }

    /// Gets the pattern.
    pub fn pattern(&self) -> &SyncPattern {
        &self.pattern
    }

    /// Returns the offset of the first match that begins before `limit` and lies entirely within
    /// `buf`, or `None`.
    pub fn scan(&self, buf: &[u8], limit: usize) -> Option<usize> {
        let len = self.pattern.len();

        if buf.len() < len {
            return None;
        }

        let last = cmp::min(limit, buf.len() - len + 1);

        (0..last).find(|&i| self.pattern.matches(&buf[i..]))
    }

    /// Locates the first match beginning in `[from, end)` using bytes peeked from `input`.
    ///
    /// At most `max_len` start positions are examined. Bytes are peeked, never consumed, and no
    /// byte at or after `end + pattern length - 1`, nor past the declared end of the input, is
    /// ever requested. A match straddling the end of one peeked window is found by the next,
    /// larger, window since consecutive windows overlap by the pattern length minus one.
    pub fn locate(
        &self,
        input: &mut dyn SeekInput,
        from: u64,
        end: u64,
        max_len: u64,
    ) -> Result<SyncScan> {
        let pos = input.pos();
        debug_assert!(from >= pos, "cannot locate a pattern behind the input position");

        let stream_end = input.byte_len().unwrap_or(u64::MAX);
        let pattern_len = self.pattern.len() as u64;

        // A match may not begin at or after this position without running past the end of the
        // stream.
        let eos_limit = stream_end.saturating_sub(pattern_len - 1);

        // The last position, exclusive, at which a match may begin.
        let search_end = cmp::min(cmp::min(end, eos_limit), from.saturating_add(max_len));

        let mut window = INITIAL_SCAN_WINDOW;
        let mut scanned = 0;

        while from + scanned < search_end {
            let starts = cmp::min(search_end - from, window);

            let lead = (from - pos) as usize;
            let need = lead + (starts + pattern_len - 1) as usize;

            let buf = &input.peek(need)?[lead..];

            if let Some(offset) = self.scan(&buf[scanned as usize..], (starts - scanned) as usize) {
                return Ok(SyncScan::Found(from + scanned + offset as u64));
            }

            scanned = starts;
            window = window.saturating_mul(2);
        }

        if from.saturating_add(max_len) < cmp::min(end, eos_limit) {
            // Only the scan length was exhausted.
            Ok(SyncScan::NotFound)
        }
        else if end >= eos_limit {
            Ok(SyncScan::EndOfStream)
        }
        else {
            Ok(SyncScan::NotFound)
        }
    }
}
