// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Native FLAC frame probe and seeker for Project Sonde.

mod frame;
mod probe;
mod seeker;
mod stream;

pub use frame::{Frame, FrameHeader, FrameNumber, FrameReader, FLAC_MAX_FRAME_SIZE};
pub use probe::FrameProbe;
pub use seeker::{make_seeker, try_new_seeker, FlacSeekParams, FlacSeeker, FLAC_SEEKER};
pub use stream::{FlacStream, StreamInfo, FLAC_STREAM_MARKER};
