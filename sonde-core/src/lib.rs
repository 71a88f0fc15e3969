// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Project Sonde shared structs, traits, and the seek estimation engine.
//!
//! Most users should use the `sonde` crate, which re-exports this crate as `sonde::core`, together
//! with the container specific probes.

pub mod adapter;
pub mod checksum;
pub mod errors;
pub mod io;
pub mod registry;
pub mod seek;
pub mod units;
