// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Ogg page-table probe and seeker for Project Sonde.

mod mappings;
mod page;
mod probe;
mod seeker;

pub use mappings::{detect, OggCodec, StreamMapping};
pub use page::{Page, PageFlags, PageHeader, PagePackets, PageReader, OGG_PAGE_MAX_SIZE};
pub use probe::PageProbe;
pub use seeker::{make_seeker, try_new_seeker, OggSeekParams, OggSeeker, OGG_SEEKER};
