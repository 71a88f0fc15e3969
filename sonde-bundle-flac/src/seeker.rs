// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use log::info;

use sonde_core::adapter::SeekAdapter;
use sonde_core::errors::{seek_error, Result, SeekErrorKind};
use sonde_core::io::SeekInput;
use sonde_core::registry::{ContainerInfo, DynSeeker, SeekerDescriptor};
use sonde_core::seek::{SeekIndex, SeekOptions, SeekParams, SeekSession};
use sonde_core::units::{Mark, SampleRateMapping};

use crate::probe::FrameProbe;
use crate::stream::{FlacStream, StreamInfo};

/// A seeker for a native FLAC stream.
pub type FlacSeeker = SeekAdapter<FrameProbe>;

/// The layout of a native FLAC stream.
#[derive(Clone)]
pub struct FlacSeekParams {
    /// The position of the first frame.
    pub payload_start: u64,
    /// The length of the stream.
    pub stream_end: u64,
    pub info: StreamInfo,
    /// Seek points relative to the first frame. May be empty.
    pub index: SeekIndex,
}

impl FlacSeekParams {
    /// Reads the metadata blocks of the stream. The input must be positioned at the start of the
    /// stream.
    pub fn read(input: &mut dyn SeekInput) -> Result<FlacSeekParams> {
        let stream_end = match input.byte_len() {
            Some(len) => len,
            None => return seek_error(SeekErrorKind::Unseekable),
        };

        let stream = FlacStream::read(input)?;

        info!(
            "flac: {} Hz, {} channels, {} samples, {} seek points",
            stream.info.sample_rate,
            stream.info.channels,
            stream.info.n_samples.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            stream.index.len()
        );

        Ok(FlacSeekParams {
            payload_start: stream.first_frame_offset,
            stream_end,
            info: stream.info,
            index: stream.index,
        })
    }
}

/// Instantiate a [`FlacSeeker`] for a stream with a known layout.
///
/// Panics if the sample rate of the stream is 0.
pub fn make_seeker(params: FlacSeekParams, options: SeekOptions) -> FlacSeeker {
    let seek_params = SeekParams {
        payload_start: params.payload_start,
        stream_end: params.stream_end,
        start_mark: 0,
        total_marks: params.info.n_samples.map(|n| n as Mark),
    };

    let mapping = Arc::new(SampleRateMapping::new(params.info.sample_rate));
    let probe = FrameProbe::new(params.info, options.max_scan_len);

    let mut session = SeekSession::new(probe, mapping, seek_params, options);
    session.set_index(params.index);

    SeekAdapter::new(session)
}

/// Read the metadata blocks of the FLAC stream at the start of `input` and instantiate a
/// [`FlacSeeker`] for it.
pub fn try_new_seeker(input: &mut dyn SeekInput, options: SeekOptions) -> Result<FlacSeeker> {
    let params = FlacSeekParams::read(input)?;
    Ok(make_seeker(params, options))
}

/// Describes the Native FLAC seeker for registration with a
/// [`Registry`](sonde_core::registry::Registry).
pub const FLAC_SEEKER: SeekerDescriptor = SeekerDescriptor {
    info: ContainerInfo { short_name: "flac", long_name: "Native FLAC" },
    markers: &[b"fLaC"],
    factory: new_dyn_seeker,
};

fn new_dyn_seeker(input: &mut dyn SeekInput, options: SeekOptions) -> Result<DynSeeker> {
    Ok(try_new_seeker(input, options)?.into_boxed())
}

#[cfg(test)]
mod tests {
    use sonde_core::adapter::{Phase, UnitDisposition};
    use sonde_core::errors::Result;
    use sonde_core::io::{MemoryInput, SeekInput};
    use sonde_core::seek::{SeekIndex, SeekOptions, SeekStep};
    use sonde_core::units::{Mark, MarkMapping, SampleRateMapping};

    use super::{make_seeker, try_new_seeker, FlacSeekParams, FlacSeeker};
    use crate::frame::tests::make_frame;
    use crate::frame::FrameReader;
    use crate::stream::tests::{seek_table_block, stream_info, stream_info_block};
    use crate::stream::{StreamInfo, FLAC_STREAM_MARKER};

    /// The length of the stream marker and stream information block.
    const HEADER_LEN: u64 = 42;

    /// A stream of 100 frames of 200 bytes, each spanning 1000 samples.
    fn stream(info: &StreamInfo) -> Vec<u8> {
        let mut data = FLAC_STREAM_MARKER.to_vec();
        data.extend(stream_info_block(info, true));
        data.extend((0..100).flat_map(|i| make_frame(info, i, 1000, 200)));
        data
    }

    fn seeker(info: StreamInfo) -> FlacSeeker {
        let params = FlacSeekParams {
            payload_start: HEADER_LEN,
            stream_end: HEADER_LEN + 20_000,
            info,
            index: SeekIndex::new(),
        };

        make_seeker(params, SeekOptions::default())
    }

    fn drive(seeker: &mut FlacSeeker, input: &mut MemoryInput) -> Result<(u64, Mark)> {
        loop {
            match seeker.poll(input)? {
                SeekStep::RepositionTo(pos) if pos == input.pos() => input.fill(1024),
                SeekStep::RepositionTo(pos) => input.reposition(pos)?,
                SeekStep::Converged { resume_pos, mark } => return Ok((resume_pos, mark)),
            }
        }
    }

    #[test]
    fn verify_seek_to_frame() {
        let info = stream_info(Some(100_000));

        let mut seeker = seeker(info);
        let mut input = MemoryInput::new(stream(&info));

        assert_eq!(seeker.seek(55_500_000).unwrap(), 55_500);
        assert_eq!(drive(&mut seeker, &mut input).unwrap(), (HEADER_LEN + 11_000, 55_000));
        assert!(seeker.session().probe_count() <= 8);
    }

    #[test]
    fn verify_seek_round_trip() {
        let info = stream_info(Some(100_000));

        let mut seeker = seeker(info);
        let mut input = MemoryInput::new(stream(&info));
        let mut reader = FrameReader::new(info, 64 * 1024);

        let mapping = SampleRateMapping::new(1000);

        for i in 0..100 {
            let target = i * 1000 + 250 * (i % 4);

            seeker.seek(mapping.mark_to_time(target)).unwrap();

            let (pos, mark) = drive(&mut seeker, &mut input).unwrap();
            assert_eq!((pos, mark), (HEADER_LEN + 200 * i as u64, i * 1000));

            // The first frame read at the resume position contains the target.
            input.reposition(pos).unwrap();

            let frame = reader.next_frame(&mut input).unwrap();
            let (start, end) = (frame.unit.start_mark.unwrap(), frame.unit.end_mark);

            assert!(start <= target && target < end);
            assert_eq!(seeker.filter_unit(start, end), UnitDisposition::Deliver);
            assert_eq!(seeker.phase(), Phase::Streaming);
        }
    }

    #[test]
    fn verify_seek_unknown_total() {
        let info = stream_info(None);

        let mut seeker = seeker(info);
        let mut input = MemoryInput::new(stream(&info));

        seeker.seek(73_300_000).unwrap();

        // The total is found by reading the last frame first.
        assert_eq!(seeker.poll(&mut input).unwrap(), SeekStep::RepositionTo(HEADER_LEN));

        assert_eq!(drive(&mut seeker, &mut input).unwrap(), (HEADER_LEN + 14_600, 73_000));
        assert_eq!(seeker.seek_map().map(|map| map.total_marks()), Some(100_000));
    }

    #[test]
    fn verify_seek_with_seek_table() {
        let info = stream_info(Some(100_000));

        let mut data = FLAC_STREAM_MARKER.to_vec();
        data.extend(stream_info_block(&info, false));
        data.extend(seek_table_block(&[(50_000, 10_000, 1000), (60_000, 12_000, 1000)], true));

        let payload_start = data.len() as u64;
        data.extend((0..100).flat_map(|i| make_frame(&info, i, 1000, 200)));

        let mut input = MemoryInput::new(data);
        let mut seeker = try_new_seeker(&mut input, SeekOptions::default()).unwrap();

        seeker.seek(55_500_000).unwrap();

        // The seek table narrows the search before any frame is read.
        let (bytes, marks) = seeker.session().bracket().unwrap();
        assert_eq!((bytes.low, bytes.high), (payload_start + 10_000, payload_start + 12_000));
        assert_eq!((marks.low, marks.high), (50_000, 60_000));

        assert_eq!(drive(&mut seeker, &mut input).unwrap(), (payload_start + 11_000, 55_000));
    }

    #[test]
    fn verify_seek_resyncs_after_corruption() {
        let info = StreamInfo { frame_byte_len_max: 200, ..stream_info(Some(100_000)) };

        let mut data = stream(&info);

        // Corrupt the body of the frame holding samples [30000, 31000).
        data[(HEADER_LEN + 6_100) as usize] ^= 0x01;

        let mut seeker = seeker(info);
        let mut input = MemoryInput::new(data);

        // The corrupt frame is the best known position for targets within it.
        seeker.seek(30_500_000).unwrap();
        assert_eq!(drive(&mut seeker, &mut input).unwrap(), (HEADER_LEN + 6_000, 30_000));

        seeker.seek(31_500_000).unwrap();
        assert_eq!(drive(&mut seeker, &mut input).unwrap(), (HEADER_LEN + 6_200, 31_000));

        seeker.seek(29_500_000).unwrap();
        assert_eq!(drive(&mut seeker, &mut input).unwrap(), (HEADER_LEN + 5_800, 29_000));
    }

    #[test]
    fn verify_seek_would_block() {
        let info = stream_info(Some(100_000));

        let mut seeker = seeker(info);
        let mut input = MemoryInput::with_window(stream(&info), 128);

        seeker.seek(87_300_000).unwrap();
        assert_eq!(drive(&mut seeker, &mut input).unwrap(), (HEADER_LEN + 17_400, 87_000));
    }

    #[test]
    fn verify_try_new_seeker() {
        let info = stream_info(Some(100_000));

        let mut input = MemoryInput::new(stream(&info));
        let mut seeker = try_new_seeker(&mut input, SeekOptions::default()).unwrap();

        let map = seeker.seek_map().unwrap();
        assert!(map.is_seekable());
        assert_eq!(map.duration(), 100_000_000);

        seeker.seek(12_345_000).unwrap();
        assert_eq!(drive(&mut seeker, &mut input).unwrap(), (HEADER_LEN + 2_400, 12_000));
    }
}
