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

use crate::page::{find_page, verify_page_at, PageLocation};

/// A page-table probe for Ogg streams.
///
/// The probe locates the first page at, or after, the candidate position and classifies it by its
/// granule position without decoding any packets. Since a page only records the mark at its end, a
/// page that undershoots the target is followed by reading the pages immediately after it until
/// one reaches the target. That page begins exactly where the target's page run begins, and is
/// reported as found.
pub struct PageProbe {
    serial: Option<u32>,
    max_scan_len: u64,
    last_len: Option<u64>,
}

impl PageProbe {
    /// Instantiate a probe for the logical stream `serial`, or any stream if `None`.
    pub fn new(serial: Option<u32>, max_scan_len: u64) -> Self {
        PageProbe { serial, max_scan_len, last_len: None }
    }

    /// Reads the page at `pos` if it is valid.
    fn page_at(&self, input: &mut dyn SeekInput, pos: u64) -> Result<Option<PageLocation>> {
        let offset = (pos - input.pos()) as usize;

        match verify_page_at(input, offset) {
            Ok(page) => Ok(page),
            Err(Error::DecodeError(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Probe for PageProbe {
    fn probe(
        &mut self,
        input: &mut dyn SeekInput,
        window: &ProbeWindow,
        target: Mark,
    ) -> Result<ProbeResult> {
        let mut page =
            match find_page(input, window.start, window.end, self.serial, self.max_scan_len)? {
                Some(page) => page,
                None => return Ok(ProbeResult::NoUnitInRange),
            };

        // The position and end mark of the run of undershooting pages.
        let mut run: Option<(u64, Mark)> = None;
        // The position immediately after the last undershooting page.
        let mut resume = page.pos;

        loop {
            self.last_len = Some(page.len);

            let next = page.pos + page.len;

            if self.serial.map_or(true, |serial| serial == page.header.serial) {
                match (page.header.granule(), run) {
                    (Some(granule), _) if granule <= target => {
                        run = Some((run.map_or(page.pos, |(pos, _)| pos), granule));
                        resume = next;
                    }
                    (Some(granule), None) => {
                        return Ok(page.unit(granule).classify(target));
                    }
                    (Some(_), Some((_, mark))) => {
                        // The first page to reach the target follows pages that did not. Resume
                        // where the undershooting pages end.
                        return Ok(ProbeResult::TargetFound { pos: resume, mark });
                    }
                    (None, None) => {
                        // No packet ends on this page so it carries no mark. Try the next page.
                        page = match find_page(
                            input,
                            next,
                            window.end,
                            self.serial,
                            self.max_scan_len,
                        )? {
                            Some(page) => page,
                            None => return Ok(ProbeResult::NoUnitInRange),
                        };
                        continue;
                    }
                    (None, Some(_)) => (),
                }
            }

            // Continue with the page that immediately follows, if one is within reach.
            if next >= window.stream_end || next - window.start > self.max_scan_len {
                break;
            }

            page = match self.page_at(input, next) {
                Ok(Some(page)) => page,
                Ok(None) => break,
                // Return the progress made so far rather than waiting for more data.
                Err(err) if err.is_would_block() => break,
                Err(err) => return Err(err),
            };
        }

        match run {
            Some((pos, mark)) => {
                debug!("ogg: pages [{}, {}) end before the target at mark {}", pos, resume, mark);
                Ok(ProbeResult::Undershoot { pos, len: resume - pos, mark })
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

        while let Some(page) =
            find_page(input, from, window.end, self.serial, self.max_scan_len)?
        {
            if let Some(granule) = page.header.granule() {
                last = Some(granule);
            }
            from = page.pos + page.len;
        }

        Ok(last)
    }

    fn unit_len_hint(&self) -> Option<u64> {
        self.last_len
    }
}

#[cfg(test)]
mod tests {
    use sonde_core::io::MemoryInput;
    use sonde_core::seek::{Probe, ProbeResult, ProbeWindow};

    use super::PageProbe;
    use crate::page::tests::{make_page, make_page_with_len};

    /// 10 pages of 200 bytes, each spanning 1000 marks.
    fn stream() -> Vec<u8> {
        (0..10u32).flat_map(|i| make_page_with_len(1, i, 1000 * (u64::from(i) + 1), 200)).collect()
    }

    fn window(start: u64, end: u64) -> ProbeWindow {
        ProbeWindow { start, end, stream_end: 2000 }
    }

    fn probe(data: &[u8], window: ProbeWindow, target: i64) -> ProbeResult {
        let mut input = MemoryInput::new(data.to_vec());
        input.reposition(window.start).unwrap();
        PageProbe::new(Some(1), 64 * 1024).probe(&mut input, &window, target).unwrap()
    }

    #[test]
    fn verify_page_probe_classify() {
        let data = stream();

        // The first page found overshoots. Its start mark is not known.
        assert_eq!(
            probe(&data, window(650, 2000), 3500),
            ProbeResult::Overshoot { pos: 800, mark: 5000 }
        );

        // The first page found undershoots, the pages following it are read until the target.
        assert_eq!(
            probe(&data, window(250, 2000), 5500),
            ProbeResult::TargetFound { pos: 1000, mark: 5000 }
        );

        // No page begins in the window.
        assert_eq!(probe(&data, window(1001, 1199), 9000), ProbeResult::NoUnitInRange);

        // Every page to the end of the stream undershoots.
        assert_eq!(
            probe(&data, window(1500, 1700), 20_000),
            ProbeResult::Undershoot { pos: 1600, len: 400, mark: 10_000 }
        );
    }

    #[test]
    fn verify_page_probe_skips_unmarked_pages() {
        let mut data = Vec::new();
        data.extend(make_page(1, 0, 1000, &[&[0; 100]]));
        let unmarked = data.len() as u64;
        // A large packet spans two pages, ending on the second.
        data.extend(make_page(1, 1, u64::MAX, &[]));
        data.extend(make_page(1, 2, 2000, &[&[0; 100]]));

        let end = data.len() as u64;
        let window = ProbeWindow { start: 0, end, stream_end: end };

        let mut input = MemoryInput::new(data);
        let mut probe = PageProbe::new(None, 64 * 1024);

        // Resume at the first page after the last undershooting page.
        assert_eq!(
            probe.probe(&mut input, &window, 1500).unwrap(),
            ProbeResult::TargetFound { pos: unmarked, mark: 1000 }
        );
    }

    #[test]
    fn verify_page_probe_last() {
        let mut data = stream();
        data.extend(make_page(2, 0, 99_999, &[&[0; 10]]));
        data.extend(b"junk");

        let end = data.len() as u64;
        let window = ProbeWindow { start: 1500, end, stream_end: end };

        let mut input = MemoryInput::new(data);
        input.reposition(1500).unwrap();

        let mut probe = PageProbe::new(Some(1), 64 * 1024);
        assert_eq!(probe.probe_last(&mut input, &window).unwrap(), Some(10_000));
    }

    #[test]
    fn verify_page_probe_would_block() {
        let data = stream();
        let window = window(0, 2000);

        let mut input = MemoryInput::with_window(data, 100);
        let mut probe = PageProbe::new(Some(1), 64 * 1024);

        // The first page can not be read.
        let err = probe.probe(&mut input, &window, 5500).unwrap_err();
        assert!(err.is_would_block());

        // Progress is reported once at least one page can be read.
        input.fill(500);
        assert_eq!(
            probe.probe(&mut input, &window, 5500).unwrap(),
            ProbeResult::Undershoot { pos: 0, len: 600, mark: 3000 }
        );
    }
}
