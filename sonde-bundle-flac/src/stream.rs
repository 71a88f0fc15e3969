// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::debug;

use sonde_core::errors::{decode_error, Result};
use sonde_core::io::{BufReader, ReadBytes, SeekInput};
use sonde_core::seek::SeekIndex;

use crate::frame::FLAC_MAX_FRAME_SIZE;

/// The FLAC start of stream marker: "fLaC" in ASCII.
pub const FLAC_STREAM_MARKER: [u8; 4] = *b"fLaC";

/// The size of a metadata block header.
const METADATA_BLOCK_HEADER_SIZE: usize = 4;

/// The size of a single seek table entry.
const SEEK_POINT_SIZE: u32 = 18;

/// The metadata blocks that matter to a seek. Every other block is skipped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BlockKind {
    StreamInfo,
    SeekTable,
    Other(u8),
}

/// A metadata block header: a last-block flag and 7-bit block type, then a 24-bit length.
struct BlockHeader {
    kind: BlockKind,
    len: u32,
    is_last: bool,
}

impl BlockHeader {
    fn parse(buf: [u8; METADATA_BLOCK_HEADER_SIZE]) -> BlockHeader {
        let [flags, len @ ..] = buf;

        let kind = match flags & 0x7f {
            0 => BlockKind::StreamInfo,
            3 => BlockKind::SeekTable,
            id => BlockKind::Other(id),
        };

        let len = u32::from_be_bytes([0, len[0], len[1], len[2]]);

        BlockHeader { kind, len, is_last: flags & 0x80 != 0 }
    }
}

/// The parts of a FLAC stream information block needed to locate and verify frames.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// The minimum and maximum number of samples per block.
    pub block_len_min: u16,
    pub block_len_max: u16,
    /// The minimum and maximum byte length of a frame. Either value may be 0 if unknown.
    pub frame_byte_len_min: u32,
    pub frame_byte_len_max: u32,
    /// The sample rate in Hz.
    pub sample_rate: u32,
    /// The number of channels.
    pub channels: u32,
    /// The number of bits per sample.
    pub bits_per_sample: u32,
    /// The total number of samples per channel, if known.
    pub n_samples: Option<u64>,
}

impl StreamInfo {
    /// The size of a stream information block.
    pub const SIZE: u32 = 34;

    /// Read a stream information block.
    pub fn read<B: ReadBytes>(reader: &mut B) -> Result<StreamInfo> {
        let block_len_min = reader.read_be_u16()?;
        let block_len_max = reader.read_be_u16()?;

        // Block lengths are in the range [16, 65535] samples.
        if block_len_min < 16 || block_len_max < 16 {
            return decode_error("flac: minimum block length is 16 samples");
        }

        if block_len_max < block_len_min {
            return decode_error(
                "flac: maximum block length is less than the minimum block length",
            );
        }

        let frame_byte_len_min = reader.read_be_u24()?;
        let frame_byte_len_max = reader.read_be_u24()?;

        if frame_byte_len_min > 0
            && frame_byte_len_max > 0
            && frame_byte_len_max < frame_byte_len_min
        {
            return decode_error(
                "flac: maximum frame length is less than the minimum frame length",
            );
        }

        // Sample rate (20 bits), channels - 1 (3 bits), bits per sample - 1 (5 bits), and the total
        // number of samples (36 bits) are packed into 64 bits.
        let packed = reader.read_be_u64()?;

        let sample_rate = (packed >> 44) as u32;

        if sample_rate < 1 || sample_rate > 655_350 {
            return decode_error("flac: stream sample rate out of bounds");
        }

        let channels = ((packed >> 41) & 0x7) as u32 + 1;
        let bits_per_sample = ((packed >> 36) & 0x1f) as u32 + 1;

        if bits_per_sample < 4 {
            return decode_error("flac: stream bits per sample are out of bounds");
        }

        // A total of 0 samples indicates a stream of unknown length.
        let n_samples = match packed & 0xf_ffff_ffff {
            0 => None,
            samples => Some(samples),
        };

        // The MD5 of the decoded audio is not used.
        reader.ignore_bytes(16)?;

        Ok(StreamInfo {
            block_len_min,
            block_len_max,
            frame_byte_len_min,
            frame_byte_len_max,
            sample_rate,
            channels,
            bits_per_sample,
            n_samples,
        })
    }

    /// Returns `true` if every frame, except possibly the last, has the same number of samples.
    pub fn is_fixed_block_len(&self) -> bool {
        self.block_len_min == self.block_len_max
    }

    /// Gets the maximum byte length of a frame.
    pub fn max_frame_len(&self) -> u64 {
        match self.frame_byte_len_max {
            0 => FLAC_MAX_FRAME_SIZE as u64,
            len => u64::from(len),
        }
    }
}

/// Read a seek table block into `index`. Byte offsets are relative to the first frame.
pub fn read_seek_table_block<B: ReadBytes>(
    reader: &mut B,
    block_len: u32,
    index: &mut SeekIndex,
) -> Result<()> {
    let count = block_len / SEEK_POINT_SIZE;

    for _ in 0..count {
        let sample = reader.read_be_u64()?;

        // Placeholder points are ignored. The rest of the point must still be consumed.
        if sample != u64::MAX {
            let byte_offset = reader.read_be_u64()?;
            let n_samples = reader.read_be_u16()?;
            index.insert(sample as i64, byte_offset, u32::from(n_samples));
        }
        else {
            reader.ignore_bytes(10)?;
        }
    }

    Ok(())
}

/// The headers of a native FLAC stream.
pub struct FlacStream {
    pub info: StreamInfo,
    /// The index built from the seek table, if any.
    pub index: SeekIndex,
    /// The absolute byte position of the first frame.
    pub first_frame_offset: u64,
}

impl FlacStream {
    /// Reads the stream marker and all metadata blocks. The input must be positioned at the start
    /// of the stream, and is left positioned at the first frame.
    pub fn read(input: &mut dyn SeekInput) -> Result<FlacStream> {
        if input.peek(FLAC_STREAM_MARKER.len())? != FLAC_STREAM_MARKER {
            return decode_error("flac: missing flac stream marker");
        }

        input.skip(FLAC_STREAM_MARKER.len() as u64)?;

        let mut info = None;
        let mut index = None;

        loop {
            let buf = input.peek(METADATA_BLOCK_HEADER_SIZE)?;
            let header = BlockHeader::parse(BufReader::new(buf).read_array()?);

            input.skip(METADATA_BLOCK_HEADER_SIZE as u64)?;

            let block_len = header.len;

            match header.kind {
                BlockKind::StreamInfo => {
                    if info.is_some() {
                        return decode_error("flac: found more than one stream info block");
                    }
                    if block_len != StreamInfo::SIZE {
                        return decode_error("flac: invalid stream info block size");
                    }

                    let buf = input.peek(block_len as usize)?;
                    info = Some(StreamInfo::read(&mut BufReader::new(buf))?);
                }
                BlockKind::SeekTable => {
                    if index.is_some() {
                        return decode_error("flac: found more than one seek table block");
                    }

                    let mut table = SeekIndex::new();
                    let buf = input.peek(block_len as usize)?;
                    read_seek_table_block(&mut BufReader::new(buf), block_len, &mut table)?;
                    index = Some(table);
                }
                // Other blocks do not affect seeking.
                BlockKind::Other(id) => {
                    debug!("flac: skipping metadata block of type {} ({} bytes)", id, block_len);
                }
            }

            input.skip(u64::from(block_len))?;

            if header.is_last {
                break;
            }
        }

        let info = match info {
            Some(info) => info,
            None => return decode_error("flac: no stream info block"),
        };

        Ok(FlacStream { info, index: index.unwrap_or_default(), first_frame_offset: input.pos() })
    }
}
