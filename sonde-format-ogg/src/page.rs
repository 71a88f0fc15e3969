// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitflags::bitflags;
use log::{debug, warn};

use sonde_core::checksum::Crc32;
use sonde_core::errors::{
    decode_error, end_of_stream_error, seek_error, Error, Result, SeekErrorKind,
};
use sonde_core::io::{BufReader, Monitor, ReadBytes, SeekInput};
use sonde_core::seek::{SyncPattern, SyncScan, SyncScanner, UnitInfo};
use sonde_core::units::Mark;

pub const OGG_PAGE_MARKER: [u8; 4] = *b"OggS";
pub const OGG_PAGE_HEADER_SIZE: usize = 27;

pub const OGG_PAGE_MAX_SIZE: usize = OGG_PAGE_HEADER_SIZE + 255 + 255 * 255;

/// Scanner for the Ogg capture pattern.
pub const OGG_SYNC: SyncScanner = SyncScanner::new(SyncPattern::exact(&OGG_PAGE_MARKER));

/// The offset of the checksum within the page header.
const OGG_PAGE_CRC_OFFSET: usize = 22;

bitflags! {
    /// The header type flags of a page.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// The page begins with the continuation of a packet from the previous page.
        const CONTINUATION = 0x01;
        /// The page is the first page of a logical stream.
        const FIRST_PAGE = 0x02;
        /// The page is the last page of a logical stream.
        const LAST_PAGE = 0x04;
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PageHeader {
    pub absgp: u64,
    pub serial: u32,
    pub sequence: u32,
    pub crc: u32,
    pub n_segments: u8,
    pub flags: PageFlags,
}

impl PageHeader {
    /// Gets the granule position of the page as a mark. Returns `None` if no packet ends on the
    /// page.
    pub fn granule(&self) -> Option<Mark> {
        match self.absgp {
            u64::MAX => None,
            // Granules past the range of a mark can not be bisected.
            absgp => Mark::try_from(absgp).ok(),
        }
    }
}

/// Reads a `PageHeader` from the the provided reader.
fn read_page_header<B: ReadBytes>(reader: &mut B) -> Result<PageHeader> {
    // The OggS marker should be present.
    if reader.read_array::<4>()? != OGG_PAGE_MARKER {
        return decode_error("ogg: missing ogg stream marker");
    }

    // There is only one Ogg version, and that is version 0.
    if reader.read_byte()? != 0 {
        return decode_error("ogg: invalid ogg version");
    }

    // Only the first 3 least-significant bits are used for flags.
    let flags = match PageFlags::from_bits(reader.read_byte()?) {
        Some(flags) => flags,
        None => return decode_error("ogg: invalid flag bits set"),
    };

    let absgp = reader.read_u64()?;
    let serial = reader.read_u32()?;
    let sequence = reader.read_u32()?;
    let crc = reader.read_u32()?;
    let n_segments = reader.read_byte()?;

    Ok(PageHeader { absgp, serial, sequence, crc, n_segments, flags })
}

/// A verified page located in a byte source.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageLocation {
    pub header: PageHeader,
    /// The absolute byte position of the page.
    pub pos: u64,
    /// The total length of the page, including its header and segment table.
    pub len: u64,
}

impl PageLocation {
    /// Gets the page as a unit. The start mark of a page is not recorded by the container.
    pub fn unit(&self, granule: Mark) -> UnitInfo {
        UnitInfo { pos: self.pos, len: self.len, start_mark: None, end_mark: granule }
    }
}

/// Verifies the page beginning `offset` bytes after the current position of `input`.
///
/// Returns `Ok(None)` if the page is truncated by the end of the stream, and a decode error if the
/// page is malformed or its checksum does not match. Nothing is consumed.
pub fn verify_page_at(input: &mut dyn SeekInput, offset: usize) -> Result<Option<PageLocation>> {
    let pos = input.pos() + offset as u64;

    // Read the fixed size portion of the header.
    let buf = input.peek(offset + OGG_PAGE_HEADER_SIZE)?;

    if buf.len() < offset + OGG_PAGE_HEADER_SIZE {
        return Ok(None);
    }

    let header = read_page_header(&mut BufReader::new(&buf[offset..]))?;

    // Read the segment table to get the length of the page body.
    let table_end = offset + OGG_PAGE_HEADER_SIZE + usize::from(header.n_segments);

    let buf = input.peek(table_end)?;

    if buf.len() < table_end {
        return Ok(None);
    }

    let body_len: usize =
        buf[offset + OGG_PAGE_HEADER_SIZE..table_end].iter().map(|&len| usize::from(len)).sum();

    let page_end = table_end + body_len;

    let buf = input.peek(page_end)?;

    if buf.len() < page_end {
        return Ok(None);
    }

    let page = &buf[offset..page_end];

    // The checksum of the page is calculated with the checksum field zeroed.
    let mut crc32 = Crc32::new(0);
    crc32.process_buf_bytes(&page[..OGG_PAGE_CRC_OFFSET]);
    crc32.process_buf_bytes(&[0; 4]);
    crc32.process_buf_bytes(&page[OGG_PAGE_CRC_OFFSET + 4..]);

    if header.crc != crc32.crc() {
        warn!(
            "ogg: crc mismatch at {}: expected {:#x}, got {:#x}",
            pos,
            header.crc,
            crc32.crc()
        );
        return decode_error("ogg: crc mismatch");
    }

    Ok(Some(PageLocation { header, pos, len: page.len() as u64 }))
}

/// Locates the first valid page that begins in `[from, end)`, skipping over corrupt pages. If
/// `serial` is provided, pages of other logical streams are skipped as well.
///
/// The input must be positioned at, or before, `from`. Nothing is consumed.
pub fn find_page(
    input: &mut dyn SeekInput,
    from: u64,
    end: u64,
    serial: Option<u32>,
    max_scan_len: u64,
) -> Result<Option<PageLocation>> {
    let base = input.pos();
    let mut from = from;

    loop {
        let pos = match OGG_SYNC.locate(input, from, end, max_scan_len)? {
            SyncScan::Found(pos) => pos,
            SyncScan::NotFound | SyncScan::EndOfStream => return Ok(None),
        };

        match verify_page_at(input, (pos - base) as usize) {
            Ok(Some(page)) if serial.map_or(true, |serial| serial == page.header.serial) => {
                return Ok(Some(page));
            }
            // A valid page of another logical stream.
            Ok(Some(page)) => from = page.pos + page.len,
            // Truncated page.
            Ok(None) => from = pos + 1,
            Err(err) if err.is_would_block() => return Err(err),
            Err(Error::DecodeError(_)) => {
                debug!("ogg: lost sync at {}", pos);
                from = pos + 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// An iterator over complete packets within a [`Page`].
pub struct PagePackets<'a> {
    lens: core::slice::Iter<'a, u16>,
    data: &'a [u8],
}

impl<'a> Iterator for PagePackets<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = usize::from(*self.lens.next()?);
        let (packet, rem) = self.data.split_at(len);
        self.data = rem;
        Some(packet)
    }
}

/// An Ogg page read by a [`PageReader`].
pub struct Page<'a> {
    pub header: PageHeader,
    /// The page as a unit. The start mark is the granule position of the previous page.
    pub unit: UnitInfo,
    packet_lens: &'a [u16],
    body: &'a [u8],
}

impl Page<'_> {
    /// Returns an iterator over all complete packets within the page.
    pub fn packets(&self) -> PagePackets<'_> {
        PagePackets { lens: self.packet_lens.iter(), data: self.body }
    }

    /// Gets the number of packets completed on this page.
    pub fn num_packets(&self) -> usize {
        self.packet_lens.len()
    }
}

/// A sequential reader of the pages of one logical stream, used to read stream headers and to
/// read, and possibly discard, pages after a seek converges.
pub struct PageReader {
    serial: Option<u32>,
    granule: Mark,
    packet_lens: Vec<u16>,
    page_buf: Vec<u8>,
    max_scan_len: u64,
}

impl PageReader {
    /// Instantiate a reader for pages of the logical stream `serial`, or of any stream if `None`.
    pub fn new(serial: Option<u32>, max_scan_len: u64) -> Self {
        PageReader {
            serial,
            granule: 0,
            packet_lens: Vec::new(),
            page_buf: Vec::new(),
            max_scan_len,
        }
    }

    /// Resets the reader after the input is repositioned. `mark` is the granule position at the
    /// new position, such as the mark a seek converged on.
    pub fn reset(&mut self, mark: Mark) {
        self.granule = mark;
    }

    /// Gets the logical stream the reader follows, if any.
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    /// Follow the logical stream `serial`.
    pub fn set_serial(&mut self, serial: u32) {
        self.serial = Some(serial);
    }

    /// Reads the next page, consuming it and any bytes skipped to reach it.
    ///
    /// Returns an end-of-stream error if the input is exhausted, and a sync error if bytes remain
    /// but no further page can be found in them.
    pub fn next_page(&mut self, input: &mut dyn SeekInput) -> Result<Page<'_>> {
        let pos = input.pos();
        let stream_end = input.byte_len().unwrap_or(u64::MAX);

        if pos >= stream_end {
            return end_of_stream_error();
        }

        let page = match find_page(input, pos, stream_end, self.serial, self.max_scan_len)? {
            Some(page) => page,
            None => return seek_error(SeekErrorKind::SyncLost),
        };

        if page.pos > pos {
            debug!("ogg: skipped {} bytes to page at {}", page.pos - pos, page.pos);
        }

        // Copy the page body and segment table out of the input before consuming it.
        let offset = (page.pos - pos) as usize;
        let buf = input.peek(offset + page.len as usize)?;

        let table = &buf[offset + OGG_PAGE_HEADER_SIZE..][..usize::from(page.header.n_segments)];

        self.packet_lens.clear();

        let mut packet_len = 0;

        for &seg_len in table {
            packet_len += u16::from(seg_len);

            // A segment with a length < 255 indicates that the segment is the end of a packet.
            if seg_len < 255 {
                self.packet_lens.push(packet_len);
                packet_len = 0;
            }
        }

        self.page_buf.clear();
        self.page_buf.extend_from_slice(&buf[offset + OGG_PAGE_HEADER_SIZE + table.len()..]);

        input.skip(offset as u64 + page.len)?;

        let start_mark = self.granule;

        if let Some(granule) = page.header.granule() {
            self.granule = granule;
        }

        Ok(Page {
            header: page.header,
            unit: UnitInfo {
                pos: page.pos,
                len: page.len,
                start_mark: Some(start_mark),
                end_mark: self.granule,
            },
            packet_lens: &self.packet_lens,
            body: &self.page_buf,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use sonde_core::checksum::Crc32;
    use sonde_core::errors::{Error, SeekErrorKind};
    use sonde_core::io::{MemoryInput, Monitor};

    use super::{
        find_page, verify_page_at, PageFlags, PageHeader, PageReader, OGG_PAGE_HEADER_SIZE,
    };

    /// Build a page containing `packets`, with a valid checksum.
    pub fn make_page(serial: u32, sequence: u32, absgp: u64, packets: &[&[u8]]) -> Vec<u8> {
        let mut table = Vec::new();
        let mut body = Vec::new();

        for packet in packets {
            let mut len = packet.len();
            while len >= 255 {
                table.push(255);
                len -= 255;
            }
            table.push(len as u8);
            body.extend_from_slice(packet);
        }

        let flags = if sequence == 0 { PageFlags::FIRST_PAGE } else { PageFlags::empty() };

        let mut page = Vec::new();
        page.extend_from_slice(b"OggS");
        page.push(0);
        page.push(flags.bits());
        page.extend_from_slice(&absgp.to_le_bytes());
        page.extend_from_slice(&serial.to_le_bytes());
        page.extend_from_slice(&sequence.to_le_bytes());
        page.extend_from_slice(&[0; 4]);
        page.push(table.len() as u8);
        page.extend_from_slice(&table);
        page.extend_from_slice(&body);

        let mut crc32 = Crc32::new(0);
        crc32.process_buf_bytes(&page);
        page[22..26].copy_from_slice(&crc32.crc().to_le_bytes());

        page
    }

    /// Build a page of exactly `len` bytes with one packet.
    pub fn make_page_with_len(serial: u32, sequence: u32, absgp: u64, len: usize) -> Vec<u8> {
        let body_len = len - OGG_PAGE_HEADER_SIZE - 1;
        assert!(body_len < 255);
        make_page(serial, sequence, absgp, &[&vec![0x55; body_len]])
    }

    #[test]
    fn verify_page_checksum() {
        let page = make_page(7, 3, 48_000, &[b"abc", &[1; 300]]);
        let mut input = MemoryInput::new(page.clone());

        let loc = verify_page_at(&mut input, 0).unwrap().unwrap();
        assert_eq!(loc.header.serial, 7);
        assert_eq!(loc.header.granule(), Some(48_000));
        assert_eq!(loc.len, page.len() as u64);

        // Flip one bit of the body.
        let mut corrupt = page.clone();
        *corrupt.last_mut().unwrap() ^= 0x10;

        let mut input = MemoryInput::new(corrupt);
        assert!(matches!(verify_page_at(&mut input, 0), Err(Error::DecodeError(_))));

        // A page truncated by the end of the stream.
        let mut input = MemoryInput::new(page[..page.len() - 1].to_vec());
        assert_eq!(verify_page_at(&mut input, 0).unwrap(), None);
    }

    #[test]
    fn verify_page_checksum_field() {
        // The checksum is computed over the page with its own field zeroed.
        let page = make_page(1, 0, 0, &[b"OpusHead"]);

        let mut input = MemoryInput::new(page.clone());
        let loc = verify_page_at(&mut input, 0).unwrap().unwrap();
        assert_eq!(loc.header.crc, u32::from_le_bytes([page[22], page[23], page[24], page[25]]));

        // A corrupt checksum field fails even though the rest of the page is intact.
        let mut corrupt = page;
        corrupt[24] ^= 0x01;

        let mut input = MemoryInput::new(corrupt);
        assert!(matches!(verify_page_at(&mut input, 0), Err(Error::DecodeError(_))));
    }

    #[test]
    fn verify_page_granule_range() {
        let header = |absgp| PageHeader { absgp, ..Default::default() };

        assert_eq!(header(0).granule(), Some(0));
        assert_eq!(header(i64::MAX as u64).granule(), Some(i64::MAX));
        assert_eq!(header(u64::MAX).granule(), None);
        assert_eq!(header(1 << 63).granule(), None);
    }

    #[test]
    fn verify_find_page_resyncs() {
        let mut data = b"junkOggS".to_vec();

        let mut corrupt = make_page(1, 1, 1000, &[&[9; 40]]);
        corrupt[30] ^= 0xff;
        data.extend_from_slice(&corrupt);

        let other = make_page(2, 1, 5, &[&[1; 10]]);
        data.extend_from_slice(&other);

        let good = make_page(1, 2, 2000, &[&[3; 40]]);
        let good_pos = data.len() as u64;
        data.extend_from_slice(&good);

        let end = data.len() as u64;
        let mut input = MemoryInput::new(data);

        let page = find_page(&mut input, 0, end, Some(1), u64::MAX).unwrap().unwrap();
        assert_eq!(page.pos, good_pos);
        assert_eq!(page.header.granule(), Some(2000));

        // Without a serial filter, the page of the other stream is found first.
        let page = find_page(&mut input, 0, end, None, u64::MAX).unwrap().unwrap();
        assert_eq!(page.header.serial, 2);

        // No page begins in the window.
        assert_eq!(find_page(&mut input, good_pos + 1, end, None, u64::MAX).unwrap(), None);
    }

    #[test]
    fn verify_page_reader() {
        let mut data = Vec::new();
        data.extend_from_slice(&make_page(1, 0, 0, &[b"head"]));
        data.extend_from_slice(&make_page(1, 1, 960, &[&[0; 100], &[1; 20]]));
        data.extend_from_slice(&make_page(1, 2, u64::MAX, &[]));
        data.extend_from_slice(&make_page(1, 3, 1920, &[&[2; 600]]));
        data.extend_from_slice(b"trailing garbage");

        let mut input = MemoryInput::new(data);
        let mut reader = PageReader::new(None, 64 * 1024);

        let page = reader.next_page(&mut input).unwrap();
        assert_eq!(page.packets().next(), Some(&b"head"[..]));
        assert!(page.header.flags.contains(PageFlags::FIRST_PAGE));

        let page = reader.next_page(&mut input).unwrap();
        assert_eq!(page.num_packets(), 2);
        assert_eq!((page.unit.start_mark, page.unit.end_mark), (Some(0), 960));

        // No packet ends on this page.
        let page = reader.next_page(&mut input).unwrap();
        assert_eq!((page.unit.start_mark, page.unit.end_mark), (Some(960), 960));

        let page = reader.next_page(&mut input).unwrap();
        assert_eq!(page.packets().next().map(|p| p.len()), Some(600));
        assert_eq!((page.unit.start_mark, page.unit.end_mark), (Some(960), 1920));

        assert!(matches!(
            reader.next_page(&mut input),
            Err(Error::SeekError(SeekErrorKind::SyncLost))
        ));
    }
}
