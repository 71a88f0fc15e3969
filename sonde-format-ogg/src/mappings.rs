// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identification of the codec carried by a logical stream, and the mapping from time to granule
//! position it implies.

use log::warn;

use sonde_core::errors::Result;
use sonde_core::io::{BufReader, ReadBytes};
use sonde_core::units::SampleRateMapping;

/// The signature for an Opus identification packet.
const OGG_OPUS_MAGIC_SIGNATURE: &[u8] = b"OpusHead";

/// The minimum size of an Opus identification packet.
const OGG_OPUS_MIN_IDENTIFICATION_PACKET_SIZE: usize = 19;

/// Opus granule positions are always in units of 48kHz samples.
const OGG_OPUS_GRANULE_RATE: u32 = 48_000;

/// The size of a Vorbis identification packet.
const VORBIS_IDENTIFICATION_HEADER_SIZE: usize = 30;

/// The signature shared by all Vorbis header packets.
const VORBIS_HEADER_PACKET_SIGNATURE: &[u8] = b"vorbis";

/// The size of an Ogg FLAC identification packet: the mapping header followed by the native
/// signature and a STREAMINFO metadata block.
const OGG_FLAC_HEADER_PACKET_SIZE: usize = 51;

/// The Ogg FLAC header packet signature.
const OGG_FLAC_HEADER_SIGNATURE: &[u8] = b"FLAC";

/// The native FLAC signature.
const FLAC_SIGNATURE: &[u8] = b"fLaC";

/// The codec of a logical stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OggCodec {
    Vorbis,
    Opus,
    Flac,
}

/// The timing parameters of a logical stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StreamMapping {
    pub codec: OggCodec,
    /// The number of granule positions per second.
    pub granule_rate: u32,
    /// The number of leading samples that must be discarded. These are counted in the granule
    /// position.
    pub pre_skip: u32,
}

impl StreamMapping {
    /// Gets the mapping between time and granule position.
    pub fn mark_mapping(&self) -> SampleRateMapping {
        SampleRateMapping::with_offset(self.granule_rate, i64::from(self.pre_skip))
    }
}

/// Detect the codec of a logical stream given its identification packet.
pub fn detect(packet: &[u8]) -> Result<Option<StreamMapping>> {
    let mapping = match detect_vorbis(packet)? {
        Some(mapping) => Some(mapping),
        None => match detect_opus(packet)? {
            Some(mapping) => Some(mapping),
            None => detect_flac(packet)?,
        },
    };

    Ok(mapping)
}

fn detect_vorbis(packet: &[u8]) -> Result<Option<StreamMapping>> {
    if packet.len() != VORBIS_IDENTIFICATION_HEADER_SIZE {
        return Ok(None);
    }

    let mut reader = BufReader::new(packet);

    // Packet type 1 is the identification header.
    if reader.read_u8()? != 1 {
        return Ok(None);
    }

    let mut signature = [0; 6];
    reader.read_buf_exact(&mut signature)?;

    if signature != VORBIS_HEADER_PACKET_SIGNATURE {
        return Ok(None);
    }

    // Only Vorbis version 0 exists.
    if reader.read_u32()? != 0 {
        return Ok(None);
    }

    let channels = reader.read_u8()?;
    let sample_rate = reader.read_u32()?;

    if channels == 0 || sample_rate == 0 {
        warn!("ogg: vorbis stream must not have a sample rate or channel count of 0");
        return Ok(None);
    }

    Ok(Some(StreamMapping { codec: OggCodec::Vorbis, granule_rate: sample_rate, pre_skip: 0 }))
}

fn detect_opus(packet: &[u8]) -> Result<Option<StreamMapping>> {
    if packet.len() < OGG_OPUS_MIN_IDENTIFICATION_PACKET_SIZE {
        return Ok(None);
    }

    let mut reader = BufReader::new(packet);

    let mut magic = [0; 8];
    reader.read_buf_exact(&mut magic)?;

    if magic != *OGG_OPUS_MAGIC_SIGNATURE {
        return Ok(None);
    }

    // Only major version 0 of the encapsulation is supported.
    if reader.read_u8()? > 0x0f {
        return Ok(None);
    }

    if reader.read_u8()? == 0 {
        return Ok(None);
    }

    let pre_skip = reader.read_u16()?;

    Ok(Some(StreamMapping {
        codec: OggCodec::Opus,
        granule_rate: OGG_OPUS_GRANULE_RATE,
        pre_skip: u32::from(pre_skip),
    }))
}

fn detect_flac(packet: &[u8]) -> Result<Option<StreamMapping>> {
    if packet.len() != OGG_FLAC_HEADER_PACKET_SIZE {
        return Ok(None);
    }

    let mut reader = BufReader::new(packet);

    if reader.read_u8()? != 0x7f {
        return Ok(None);
    }

    if reader.read_array::<4>()? != OGG_FLAC_HEADER_SIGNATURE {
        return Ok(None);
    }

    // Only major version 1 of the mapping exists. The minor version and the number of header
    // packets are ignored.
    if reader.read_u8()? != 1 {
        return Ok(None);
    }

    reader.ignore_bytes(3)?;

    if reader.read_array::<4>()? != FLAC_SIGNATURE {
        return Ok(None);
    }

    // The metadata block header must be that of a STREAMINFO block (type 0), with or without the
    // last block flag.
    if reader.read_u8()? & 0x7f != 0 {
        return Ok(None);
    }

    reader.ignore_bytes(3)?;

    // Skip the block size and frame size bounds. The sample rate is the next 20 bits.
    reader.ignore_bytes(10)?;

    let sample_rate = reader.read_be_u24()? >> 4;

    if sample_rate == 0 {
        warn!("ogg: flac stream must not have a sample rate of 0");
        return Ok(None);
    }

    Ok(Some(StreamMapping { codec: OggCodec::Flac, granule_rate: sample_rate, pre_skip: 0 }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{detect, OggCodec, StreamMapping};

    pub fn vorbis_id_packet(sample_rate: u32) -> Vec<u8> {
        let mut packet = vec![1];
        packet.extend_from_slice(b"vorbis");
        packet.extend_from_slice(&0u32.to_le_bytes());
        packet.push(2);
        packet.extend_from_slice(&sample_rate.to_le_bytes());
        packet.extend_from_slice(&[0; 12]);
        packet.push(0xb8);
        packet.push(1);
        packet
    }

    pub fn opus_id_packet(pre_skip: u16) -> Vec<u8> {
        let mut packet = b"OpusHead".to_vec();
        packet.push(1);
        packet.push(2);
        packet.extend_from_slice(&pre_skip.to_le_bytes());
        packet.extend_from_slice(&44_100u32.to_le_bytes());
        packet.extend_from_slice(&[0, 0, 0]);
        packet
    }

    #[test]
    fn verify_detect() {
        assert_eq!(
            detect(&vorbis_id_packet(44_100)).unwrap(),
            Some(StreamMapping { codec: OggCodec::Vorbis, granule_rate: 44_100, pre_skip: 0 })
        );
        assert_eq!(
            detect(&opus_id_packet(312)).unwrap(),
            Some(StreamMapping { codec: OggCodec::Opus, granule_rate: 48_000, pre_skip: 312 })
        );

        // Ogg FLAC with a STREAMINFO block for a 96kHz stream.
        let mut flac = vec![0x7f];
        flac.extend_from_slice(b"FLAC");
        flac.extend_from_slice(&[1, 0, 0, 1]);
        flac.extend_from_slice(b"fLaC");
        flac.extend_from_slice(&[0x80, 0, 0, 34]);
        flac.extend_from_slice(&[0x10, 0, 0x10, 0, 0, 0, 0, 0, 0, 0]);
        flac.extend_from_slice(&[0x17, 0x70, 0x02]);
        flac.resize(51, 0);

        assert_eq!(
            detect(&flac).unwrap(),
            Some(StreamMapping { codec: OggCodec::Flac, granule_rate: 96_000, pre_skip: 0 })
        );

        assert_eq!(detect(b"Speex   ").unwrap(), None);
    }
}
