// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use log::{debug, info};

use sonde_core::adapter::SeekAdapter;
use sonde_core::errors::{decode_error, seek_error, Result, SeekErrorKind};
use sonde_core::io::SeekInput;
use sonde_core::registry::{ContainerInfo, DynSeeker, SeekerDescriptor};
use sonde_core::seek::{SeekOptions, SeekParams, SeekSession};
use sonde_core::units::{Mark, MarkMapping};

use crate::mappings::{self, StreamMapping};
use crate::page::{PageFlags, PageReader};
use crate::probe::PageProbe;

/// A seeker for one logical stream of an Ogg physical stream.
pub type OggSeeker = SeekAdapter<PageProbe>;

/// The layout of a logical stream within an Ogg physical stream.
#[derive(Clone)]
pub struct OggSeekParams {
    /// The serial of the logical stream to seek, or `None` to consider every page.
    pub serial: Option<u32>,
    /// The position of the first page containing audio data.
    pub payload_start: u64,
    /// The length of the physical stream.
    pub stream_end: u64,
    /// The final granule position of the logical stream, if known.
    pub total_marks: Option<Mark>,
    /// The mapping between time and granule position.
    pub mapping: Arc<dyn MarkMapping>,
}

impl OggSeekParams {
    /// Reads the headers of the first logical stream of the physical stream. The input must be
    /// positioned at the start of the physical stream.
    ///
    /// The payload of the logical stream starts at the first page with a granule position other
    /// than 0, since header pages never complete an audio packet.
    pub fn read(
        input: &mut dyn SeekInput,
        options: &SeekOptions,
    ) -> Result<(OggSeekParams, StreamMapping)> {
        let stream_end = match input.byte_len() {
            Some(len) => len,
            None => return seek_error(SeekErrorKind::Unseekable),
        };

        let mut reader = PageReader::new(None, options.max_scan_len);

        let (serial, mapping) = {
            let page = reader.next_page(input)?;

            if !page.header.flags.contains(PageFlags::FIRST_PAGE) {
                return decode_error("ogg: stream does not begin with a first page");
            }

            let packet = page.packets().next().unwrap_or_default();

            match mappings::detect(packet)? {
                Some(mapping) => (page.header.serial, mapping),
                None => return decode_error("ogg: unsupported codec"),
            }
        };

        info!("ogg: stream {:#x} is {:?} ({} Hz)", serial, mapping.codec, mapping.granule_rate);

        reader.set_serial(serial);

        let payload_start = loop {
            let page = reader.next_page(input)?;

            if page.header.granule() != Some(0) {
                break page.unit.pos;
            }
        };

        debug!("ogg: payload of stream {:#x} begins at {}", serial, payload_start);

        let params = OggSeekParams {
            serial: Some(serial),
            payload_start,
            stream_end,
            total_marks: None,
            mapping: Arc::new(mapping.mark_mapping()),
        };

        Ok((params, mapping))
    }
}

/// Instantiate an [`OggSeeker`] for a stream with a known layout.
pub fn make_seeker(params: OggSeekParams, options: SeekOptions) -> OggSeeker {
    let seek_params = SeekParams {
        payload_start: params.payload_start,
        stream_end: params.stream_end,
        // Time 0 maps to the pre-skip, if any.
        start_mark: params.mapping.time_to_mark(0),
        total_marks: params.total_marks,
    };

    let probe = PageProbe::new(params.serial, options.max_scan_len);

    SeekAdapter::new(SeekSession::new(probe, params.mapping, seek_params, options))
}

/// Read the headers of the Ogg stream at the start of `input` and instantiate an [`OggSeeker`] for
/// its first logical stream.
pub fn try_new_seeker(input: &mut dyn SeekInput, options: SeekOptions) -> Result<OggSeeker> {
    let (params, _) = OggSeekParams::read(input, &options)?;
    Ok(make_seeker(params, options))
}

/// Describes the OGG seeker for registration with a
/// [`Registry`](sonde_core::registry::Registry).
pub const OGG_SEEKER: SeekerDescriptor = SeekerDescriptor {
    info: ContainerInfo { short_name: "ogg", long_name: "OGG" },
    markers: &[b"OggS"],
    factory: new_dyn_seeker,
};

fn new_dyn_seeker(input: &mut dyn SeekInput, options: SeekOptions) -> Result<DynSeeker> {
    Ok(try_new_seeker(input, options)?.into_boxed())
}
