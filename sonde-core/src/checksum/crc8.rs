// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::io::Monitor;

const fn make_crc8_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ poly } else { crc << 1 };
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

static CRC8_CCITT_TABLE: [u8; 256] = make_crc8_table(0x07);

/// `Crc8Ccitt` implements the CRC-8 algorithm using the CCITT polynomial (x^8 + x^2 + x + 1).
///
/// * Polynomial = 0x07
/// * RefIn = false
/// * RefOut = false
/// * XorOut = false
pub struct Crc8Ccitt {
    state: u8,
}

impl Crc8Ccitt {
    /// Instantiate a `Crc8Ccitt` instance with an initial state.
    pub fn new(state: u8) -> Self {
        Crc8Ccitt { state }
    }

    /// Returns the computed CRC.
    pub fn crc(&self) -> u8 {
        self.state
    }
}

impl Monitor for Crc8Ccitt {
    #[inline(always)]
    fn process_byte(&mut self, byte: u8) {
        self.state = CRC8_CCITT_TABLE[usize::from(self.state ^ byte)];
    }
}
