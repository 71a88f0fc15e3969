// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::io::Monitor;

const fn make_crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;

        while j < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ poly } else { crc << 1 };
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

static CRC16_ANSI_TABLE: [u16; 256] = make_crc16_table(0x8005);

/// `Crc16Ansi` implements the CRC-16 algorithm using the ANSI polynomial
/// (x^16 + x^15 + x^2 + 1).
///
/// * Polynomial = 0x8005
/// * RefIn = false
/// * RefOut = false
/// * XorOut = false
pub struct Crc16Ansi {
    state: u16,
}

impl Crc16Ansi {
    /// Instantiate a `Crc16Ansi` instance with an initial state.
    pub fn new(state: u16) -> Self {
        Crc16Ansi { state }
    }

    /// Returns the computed CRC.
    pub fn crc(&self) -> u16 {
        self.state
    }
}

impl Monitor for Crc16Ansi {
    #[inline(always)]
    fn process_byte(&mut self, byte: u8) {
        let index = (self.state >> 8) as u8 ^ byte;
        self.state = (self.state << 8) ^ CRC16_ANSI_TABLE[usize::from(index)];
    }
}
