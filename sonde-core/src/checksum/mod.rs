// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `checksum` module provides the error-detecting codes used by container formats to verify
//! unit headers and bodies. Every checksum is a [`Monitor`](crate::io::Monitor).

mod crc16;
mod crc32;
mod crc8;

pub use crc16::Crc16Ansi;
pub use crc32::Crc32;
pub use crc8::Crc8Ccitt;
