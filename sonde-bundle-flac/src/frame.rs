// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;

use log::{debug, warn};

use sonde_core::checksum::{Crc16Ansi, Crc8Ccitt};
use sonde_core::errors::{
    decode_error, end_of_stream_error, seek_error, Error, Result, SeekErrorKind,
};
use sonde_core::io::{BufReader, Monitor, MonitorStream, ReadBytes, SeekInput};
use sonde_core::seek::{SyncPattern, SyncScan, SyncScanner, UnitInfo};
use sonde_core::units::Mark;

use crate::stream::StreamInfo;

/// The minimum FLAC frame header size including the sync bytes.
pub const FLAC_MIN_FRAME_HEADER_SIZE: usize = 6;
/// The maximum FLAC frame header size including the sync bytes.
pub const FLAC_MAX_FRAME_HEADER_SIZE: usize = 16;

/// The maximum FLAC frame size.
pub const FLAC_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// The number of bytes first peeked when searching for the end of a frame.
const FLAC_FRAME_PEEK_LEN: usize = 1024;

/// Scanner for the frame sync code.
///
/// FLAC specifies a byte-aligned 14 bit sync code of `0b11_1111_1111_1110`. Expanded to 16 bits
/// this is `0b1111_1111_1111_10xx`.
pub const FLAC_SYNC: SyncScanner =
    SyncScanner::new(SyncPattern::masked(&[0xff, 0xf8], &[0xff, 0xfc]));

/// How a frame header numbers its frame. The blocking strategy bit of the sync code selects one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameNumber {
    /// The number of the first sample of a variable block length frame. At most 36 bits.
    Sample(u64),
    /// The index of a fixed block length frame. At most 31 bits.
    Frame(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub number: FrameNumber,
    /// The number of samples per channel in the frame.
    pub block_len: u16,
    pub channels: u32,
    /// `None` if the stream information states it.
    pub bits_per_sample: Option<u32>,
    /// `None` if the stream information states it.
    pub sample_rate: Option<u32>,
}

impl FrameHeader {
    /// Gets the number of the first sample in the frame.
    pub fn first_sample(&self, info: &StreamInfo) -> u64 {
        match self.number {
            FrameNumber::Sample(sample) => sample,
            // Only the last frame of a fixed block length stream may be shorter than the others.
            FrameNumber::Frame(index) => u64::from(index) * u64::from(info.block_len_max),
        }
    }

    /// Returns `true` if the header agrees with the stream information. Used to reject false sync
    /// codes in audio data that happen to pass the header checksum.
    pub fn is_consistent_with(&self, info: &StreamInfo) -> bool {
        let rate_ok = self.sample_rate.map_or(true, |rate| rate == info.sample_rate);
        let bps_ok = self.bits_per_sample.map_or(true, |bps| bps == info.bits_per_sample);

        if !rate_ok || !bps_ok {
            return false;
        }

        if self.channels != info.channels || self.block_len > info.block_len_max {
            return false;
        }

        // The blocking strategy is fixed for the stream.
        match self.number {
            FrameNumber::Sample(_) => !info.is_fixed_block_len(),
            FrameNumber::Frame(_) => info.is_fixed_block_len(),
        }
    }
}

fn decode_block_len<B: ReadBytes>(code: u8, reader: &mut B) -> Result<u16> {
    let len = match code {
        0x1 => 192,
        0x2..=0x5 => 576 << (code - 0x2),
        0x6 => u16::from(reader.read_u8()?) + 1,
        0x7 => match reader.read_be_u16()?.checked_add(1) {
            Some(len) => len,
            None => return decode_error("flac: block length exceeds 65535"),
        },
        0x8..=0xf => 256 << (code - 0x8),
        _ => return decode_error("flac: reserved block length code"),
    };
    Ok(len)
}

fn decode_sample_rate<B: ReadBytes>(code: u8, reader: &mut B) -> Result<Option<u32>> {
    const RATES: [u32; 11] =
        [88_200, 176_400, 192_000, 8_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 96_000];

    let rate = match code {
        0x0 => return Ok(None),
        0x1..=0xb => RATES[usize::from(code - 1)],
        0xc => 1000 * u32::from(reader.read_u8()?),
        0xd => u32::from(reader.read_be_u16()?),
        0xe => 10 * u32::from(reader.read_be_u16()?),
        _ => return decode_error("flac: reserved sample rate code"),
    };
    Ok(Some(rate))
}

fn decode_bits_per_sample(code: u8) -> Result<Option<u32>> {
    match code {
        0x0 => Ok(None),
        0x1 => Ok(Some(8)),
        0x2 => Ok(Some(12)),
        0x4..=0x6 => Ok(Some(4 * u32::from(code))),
        _ => decode_error("flac: reserved bits per sample code"),
    }
}

fn decode_channels(code: u8) -> Result<u32> {
    match code {
        0x0..=0x7 => Ok(u32::from(code) + 1),
        // Stereo decorrelation modes.
        0x8..=0xa => Ok(2),
        _ => decode_error("flac: reserved channel assignment"),
    }
}

/// Reads the frame header following `sync`, the first two bytes of the frame, and verifies its
/// checksum.
pub fn read_frame_header<B: ReadBytes>(reader: &mut B, sync: u16) -> Result<FrameHeader> {
    if sync & 0xfffc != 0xfff8 {
        return decode_error("flac: not a frame sync code");
    }

    // The checksum covers the sync code.
    let mut crc8 = Crc8Ccitt::new(0);
    crc8.process_buf_bytes(&sync.to_be_bytes());

    let mut crc_reader = MonitorStream::new(reader, crc8);

    let [codes, layout] = crc_reader.read_array::<2>()?;

    if layout & 0x1 != 0 {
        return decode_error("flac: reserved frame header bit is set");
    }

    let number = match (sync & 0x1 == 1, read_coded_number(&mut crc_reader)?) {
        (false, Some(index)) if index <= 0x7fff_ffff => FrameNumber::Frame(index as u32),
        (true, Some(sample)) if sample <= 0xf_ffff_ffff => FrameNumber::Sample(sample),
        _ => return decode_error("flac: invalid frame number"),
    };

    // Trailing block length and sample rate fields follow the frame number, in that order.
    let block_len = decode_block_len(codes >> 4, &mut crc_reader)?;
    let sample_rate = decode_sample_rate(codes & 0xf, &mut crc_reader)?;
    let bits_per_sample = decode_bits_per_sample((layout >> 1) & 0x7)?;
    let channels = decode_channels(layout >> 4)?;

    let computed = crc_reader.monitor().crc();

    if crc_reader.into_inner().read_u8()? != computed {
        return decode_error("flac: frame header checksum mismatch");
    }

    Ok(FrameHeader { number, block_len, channels, bits_per_sample, sample_rate })
}

/// Parses the frame header at the start of `buf`, returning the header and its length. Returns
/// `Ok(None)` if `buf` ends before the header does.
fn parse_frame_header(buf: &[u8]) -> Result<Option<(FrameHeader, usize)>> {
    if buf.len() < FLAC_MIN_FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let mut reader = BufReader::new(buf);

    let result = reader
        .read_be_u16()
        .map_err(Error::from)
        .and_then(|sync| read_frame_header(&mut reader, sync));

    match result {
        Ok(header) => Ok(Some((header, reader.pos() as usize))),
        Err(Error::IoError(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Returns `true` if a valid frame header that agrees with the stream information begins `buf`.
fn is_frame_header(buf: &[u8], info: &StreamInfo) -> bool {
    matches!(parse_frame_header(buf), Ok(Some((header, _))) if header.is_consistent_with(info))
}

/// Reads a frame or sample number. These are coded like UTF-8 but extended to 7 bytes, for up to
/// 36 bits. Returns `Ok(None)` for a malformed sequence.
fn read_coded_number<B: ReadBytes>(reader: &mut B) -> Result<Option<u64>> {
    let lead = reader.read_u8()?;

    // The count of leading ones is the length of the sequence. A lone continuation byte, or 0xff,
    // can not start one.
    let len = match lead.leading_ones() {
        0 => return Ok(Some(u64::from(lead))),
        len @ 2..=7 => len,
        _ => return Ok(None),
    };

    let mut value = u64::from(lead & (0x7f >> len));

    for _ in 1..len {
        let byte = reader.read_u8()?;

        if byte & 0xc0 != 0x80 {
            return Ok(None);
        }

        value = (value << 6) | u64::from(byte & 0x3f);
    }

    Ok(Some(value))
}

/// A verified frame located in a byte source.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameLocation {
    pub header: FrameHeader,
    /// The absolute byte position of the frame.
    pub pos: u64,
    /// The length of the frame, including its header and footer.
    pub len: u64,
    /// The number of the first sample in the frame.
    pub first_sample: u64,
}

impl FrameLocation {
    /// Gets the frame as a unit spanning its samples.
    pub fn unit(&self) -> UnitInfo {
        let start = self.first_sample as Mark;

        UnitInfo {
            pos: self.pos,
            len: self.len,
            start_mark: Some(start),
            end_mark: start + Mark::from(self.header.block_len),
        }
    }
}

/// Verifies the frame beginning `offset` bytes after the current position of `input`.
///
/// FLAC frames do not record their length. The frame ends at the first sync code that is preceded
/// by a footer matching the CRC-16 of the frame, and followed by a valid frame header. The last
/// frame of the stream ends at the end of the stream.
///
/// Returns `Ok(None)` if the frame is truncated by the end of the stream, and a decode error if the
/// frame is malformed. Nothing is consumed.
pub fn verify_frame_at(
    input: &mut dyn SeekInput,
    offset: usize,
    info: &StreamInfo,
) -> Result<Option<FrameLocation>> {
    let pos = input.pos() + offset as u64;

    let (header, header_len) = {
        let buf = input.peek(offset + FLAC_MAX_FRAME_HEADER_SIZE)?;

        match parse_frame_header(buf.get(offset..).unwrap_or_default())? {
            Some(parsed) => parsed,
            None => return Ok(None),
        }
    };

    if !header.is_consistent_with(info) {
        return decode_error("flac: frame header is inconsistent with the stream");
    }

    let first_sample = header.first_sample(info);

    // Enough bytes to verify the header of the frame after the longest permitted frame.
    let max_len = cmp::min(info.max_frame_len() as usize, FLAC_MAX_FRAME_SIZE)
        + FLAC_MAX_FRAME_HEADER_SIZE;

    let mut crc16 = Crc16Ansi::new(0);
    let mut crc_len = 0;
    // The footer follows the header, so the next frame can not begin before both.
    let mut next = header_len + 2;
    let mut want = cmp::min(FLAC_FRAME_PEEK_LEN, max_len);

    loop {
        let buf = input.peek(offset + want)?;
        let frame = buf.get(offset..).unwrap_or_default();
        let at_end = frame.len() < want;

        loop {
            let rest = frame.get(next..).unwrap_or_default();

            let sync_pos = match FLAC_SYNC.scan(rest, rest.len()) {
                Some(found) => next + found,
                None => break,
            };

            // The header of the next frame must be buffered before it can be verified.
            if !at_end && frame.len() - sync_pos < FLAC_MAX_FRAME_HEADER_SIZE {
                break;
            }

            crc16.process_buf_bytes(&frame[crc_len..sync_pos - 2]);
            crc_len = sync_pos - 2;

            let footer = u16::from_be_bytes([frame[crc_len], frame[crc_len + 1]]);

            if footer == crc16.crc() && is_frame_header(&frame[sync_pos..], info) {
                let len = sync_pos as u64;
                return Ok(Some(FrameLocation { header, pos, len, first_sample }));
            }

            next = sync_pos + 1;
        }

        if at_end {
            let len = frame.len();

            if len < header_len + 2 {
                return Ok(None);
            }

            crc16.process_buf_bytes(&frame[crc_len..len - 2]);

            let footer = u16::from_be_bytes([frame[len - 2], frame[len - 1]]);

            if footer != crc16.crc() {
                debug!("flac: frame at {} is truncated by the end of the stream", pos);
                return Ok(None);
            }

            return Ok(Some(FrameLocation { header, pos, len: len as u64, first_sample }));
        }

        if want >= max_len {
            return decode_error("flac: frame exceeds the maximum frame length");
        }

        want = cmp::min(2 * want, max_len);
    }
}

/// Locates the first valid frame that begins in `[from, end)`, skipping over corrupt frames and
/// false sync codes.
///
/// The input must be positioned at, or before, `from`. Nothing is consumed.
pub fn find_frame(
    input: &mut dyn SeekInput,
    from: u64,
    end: u64,
    info: &StreamInfo,
    max_scan_len: u64,
) -> Result<Option<FrameLocation>> {
    let base = input.pos();
    let mut from = from;

    loop {
        let pos = match FLAC_SYNC.locate(input, from, end, max_scan_len)? {
            SyncScan::Found(pos) => pos,
            SyncScan::NotFound | SyncScan::EndOfStream => return Ok(None),
        };

        match verify_frame_at(input, (pos - base) as usize, info) {
            Ok(Some(frame)) => return Ok(Some(frame)),
            Ok(None) => from = pos + 1,
            Err(Error::DecodeError(msg)) => {
                debug!("flac: lost sync at {}: {}", pos, msg);
                from = pos + 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// A FLAC frame read by a [`FrameReader`].
pub struct Frame<'a> {
    pub header: FrameHeader,
    /// The frame as a unit spanning its samples.
    pub unit: UnitInfo,
    /// The encoded frame, including its header and footer.
    pub data: &'a [u8],
}

/// A sequential reader of FLAC frames, used to read frames, and possibly discard them, after a
/// seek converges.
pub struct FrameReader {
    info: StreamInfo,
    max_scan_len: u64,
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new(info: StreamInfo, max_scan_len: u64) -> Self {
        FrameReader { info, max_scan_len, buf: Vec::new() }
    }

    /// Gets the stream information frames are verified against.
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Reads the next frame, consuming it and any bytes skipped to reach it.
    ///
    /// Returns an end-of-stream error if the input is exhausted, and a sync error if bytes remain
    /// but no further frame can be found in them.
    pub fn next_frame(&mut self, input: &mut dyn SeekInput) -> Result<Frame<'_>> {
        let pos = input.pos();
        let stream_end = input.byte_len().unwrap_or(u64::MAX);

        if pos >= stream_end {
            return end_of_stream_error();
        }

        let frame = match find_frame(input, pos, stream_end, &self.info, self.max_scan_len)? {
            Some(frame) => frame,
            None => return seek_error(SeekErrorKind::SyncLost),
        };

        if frame.pos > pos {
            warn!("flac: skipped {} bytes to frame at {}", frame.pos - pos, frame.pos);
        }

        let offset = (frame.pos - pos) as usize;
        let buf = input.peek(offset + frame.len as usize)?;

        self.buf.clear();
        self.buf.extend_from_slice(&buf[offset..]);

        input.skip(offset as u64 + frame.len)?;

        Ok(Frame { header: frame.header, unit: frame.unit(), data: &self.buf })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use sonde_core::checksum::{Crc16Ansi, Crc8Ccitt};
    use sonde_core::errors::{Error, SeekErrorKind};
    use sonde_core::io::{BufReader, MemoryInput, Monitor};

    use super::{
        find_frame, parse_frame_header, read_coded_number, verify_frame_at, FrameNumber,
        FrameReader,
    };
    use crate::stream::tests::stream_info;
    use crate::stream::StreamInfo;

    fn utf8_encode(value: u64) -> Vec<u8> {
        if value < 0x80 {
            return vec![value as u8];
        }

        // The number of continuation bytes required.
        let mut n = 1;
        while value >> (6 * n) >= (0x40 >> n) {
            n += 1;
        }

        let prefix = !(0xffu8 >> (n + 1));

        let mut buf = vec![prefix | (value >> (6 * n)) as u8];
        buf.extend((0..n).rev().map(|i| 0x80 | ((value >> (6 * i)) & 0x3f) as u8));
        buf
    }

    /// Builds a frame of exactly `len` bytes. The sequence number is a frame number for fixed block
    /// length streams, and a sample number otherwise.
    pub fn make_frame(info: &StreamInfo, seq: u64, block_len: u16, len: usize) -> Vec<u8> {
        let sync = if info.is_fixed_block_len() { 0xf8 } else { 0xf9 };

        // 16-bit block size, sample rate and bits per sample from the stream information.
        let mut buf = vec![0xff, sync, 0x70, ((info.channels - 1) << 4) as u8];
        buf.extend(utf8_encode(seq));
        buf.extend((block_len - 1).to_be_bytes());

        let mut crc8 = Crc8Ccitt::new(0);
        crc8.process_buf_bytes(&buf);
        buf.push(crc8.crc());

        // The body never contains a sync code.
        let body_len = len - buf.len() - 2;
        buf.extend((0..body_len).map(|i| (i % 251) as u8));

        let mut crc16 = Crc16Ansi::new(0);
        crc16.process_buf_bytes(&buf);
        buf.extend(crc16.crc().to_be_bytes());
        buf
    }

    #[test]
    fn verify_read_coded_number() {
        let mut stream = BufReader::new(&[
            0x24, 0xc2, 0xa2, 0xe2, 0x82, 0xac, 0xf0, 0x90, //
            0x8d, 0x88, 0xfe, 0xbf, 0xbf, 0xbf, 0xbf, 0xbf, //
            0xbf, 0xff, 0x80, 0xc2, 0x24, //
        ]);

        assert_eq!(read_coded_number(&mut stream).unwrap(), Some(36));
        assert_eq!(read_coded_number(&mut stream).unwrap(), Some(162));
        assert_eq!(read_coded_number(&mut stream).unwrap(), Some(8364));
        assert_eq!(read_coded_number(&mut stream).unwrap(), Some(66376));
        assert_eq!(read_coded_number(&mut stream).unwrap(), Some(0xf_ffff_ffff));
        assert_eq!(read_coded_number(&mut stream).unwrap(), None);
        assert_eq!(read_coded_number(&mut stream).unwrap(), None);
        // Missing continuation byte.
        assert_eq!(read_coded_number(&mut stream).unwrap(), None);
    }

    #[test]
    fn verify_read_frame_header() {
        let info = stream_info(None);
        let frame = make_frame(&info, 300, 1000, 200);

        let (header, len) = parse_frame_header(&frame).unwrap().unwrap();

        assert_eq!(len, 9);
        assert_eq!(header.number, FrameNumber::Frame(300));
        assert_eq!(header.block_len, 1000);
        assert_eq!(header.channels, 1);
        assert_eq!(header.sample_rate, None);
        assert!(header.is_consistent_with(&info));
        assert_eq!(header.first_sample(&info), 300_000);

        // Variable block length streams number samples.
        let variable = StreamInfo { block_len_min: 16, ..info };
        assert!(!header.is_consistent_with(&variable));

        // Truncated.
        assert!(parse_frame_header(&frame[..8]).unwrap().is_none());

        // Header checksum mismatch.
        let mut corrupt = frame.clone();
        corrupt[4] ^= 0x01;
        assert!(matches!(parse_frame_header(&corrupt), Err(Error::DecodeError(_))));
    }

    #[test]
    fn verify_frame_at_finds_frame_end() {
        let info = stream_info(None);

        let mut data = make_frame(&info, 0, 1000, 200);
        data.extend(make_frame(&info, 1, 1000, 150));
        data.extend(make_frame(&info, 2, 400, 300));

        let mut input = MemoryInput::new(data);

        let frame = verify_frame_at(&mut input, 0, &info).unwrap().unwrap();
        assert_eq!((frame.pos, frame.len, frame.first_sample), (0, 200, 0));

        let frame = verify_frame_at(&mut input, 200, &info).unwrap().unwrap();
        assert_eq!((frame.pos, frame.len, frame.first_sample), (200, 150, 1000));

        // The last frame ends at the end of the stream.
        let frame = verify_frame_at(&mut input, 350, &info).unwrap().unwrap();
        assert_eq!((frame.pos, frame.len), (350, 300));
        assert_eq!(frame.unit().start_mark, Some(2000));
        assert_eq!(frame.unit().end_mark, 2400);

        // Not a frame.
        assert!(verify_frame_at(&mut input, 1, &info).is_err());
    }

    #[test]
    fn verify_find_frame_resyncs() {
        let info = StreamInfo { frame_byte_len_max: 200, ..stream_info(None) };

        let mut data: Vec<u8> = (0..4).flat_map(|i| make_frame(&info, i, 1000, 200)).collect();

        // Corrupt the body of the second frame.
        data[300] ^= 0x01;

        let mut input = MemoryInput::new(data);

        let frame = find_frame(&mut input, 100, 800, &info, 64 * 1024).unwrap().unwrap();
        assert_eq!(frame.pos, 400);

        assert!(find_frame(&mut input, 601, 800, &info, 64 * 1024).unwrap().is_none());
    }

    #[test]
    fn verify_frame_reader() {
        let info = stream_info(None);

        let data: Vec<u8> = (0..3).flat_map(|i| make_frame(&info, i, 1000, 120)).collect();

        let mut input = MemoryInput::new(data);
        let mut reader = FrameReader::new(info, 64 * 1024);

        for i in 0..3 {
            let frame = reader.next_frame(&mut input).unwrap();
            assert_eq!(frame.unit.pos, 120 * i);
            assert_eq!(frame.unit.start_mark, Some(1000 * i as i64));
            assert_eq!(frame.data.len(), 120);
        }

        match reader.next_frame(&mut input) {
            Err(Error::IoError(err)) => assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof),
            _ => panic!("expected end of stream"),
        }

        // Bytes remain, but there are no frames in them.
        let mut input = MemoryInput::new(vec![0; 100]);

        assert!(matches!(
            reader.next_frame(&mut input),
            Err(Error::SeekError(SeekErrorKind::SyncLost))
        ));
    }
}
