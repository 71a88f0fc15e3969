// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements the byte source consumed by the seek engine, and the byte readers
//! used to parse unit headers peeked from it.
//!
//! Header parsing never reads from a [`SeekInput`] directly. A parser peeks the bytes it needs,
//! wraps them in a [`BufReader`], and only skips them on the input once the header is known to be
//! valid. A truncated header therefore surfaces as an [`io::ErrorKind::UnexpectedEof`] from the
//! reader while the input remains untouched.

use std::io;

mod buf_reader;
mod input;
mod monitor_stream;

pub use buf_reader::BufReader;
pub use input::{MediaSourceInput, MemoryInput, SeekInput};
pub use monitor_stream::{Monitor, MonitorStream};

/// `ReadBytes` reads bytes sequentially and interprets them as integers of the widths and byte
/// orders found in container headers.
pub trait ReadBytes {
    /// Reads one byte.
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Fills `buf` completely, or returns an error.
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Skips `count` bytes.
    fn ignore_bytes(&mut self, count: u64) -> io::Result<()>;

    /// Gets the number of bytes read, or skipped, so far.
    fn pos(&self) -> u64;

    /// Reads `N` bytes into an array.
    #[inline(always)]
    fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_buf_exact(&mut buf)?;
        Ok(buf)
    }

    #[inline(always)]
    fn read_u8(&mut self) -> io::Result<u8> {
        self.read_byte()
    }

    /// Reads a little-endian `u16`.
    #[inline(always)]
    fn read_u16(&mut self) -> io::Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Reads a big-endian `u16`.
    #[inline(always)]
    fn read_be_u16(&mut self) -> io::Result<u16> {
        self.read_array().map(u16::from_be_bytes)
    }

    /// Reads a big-endian 24-bit integer.
    #[inline(always)]
    fn read_be_u24(&mut self) -> io::Result<u32> {
        let [a, b, c] = self.read_array()?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }

    /// Reads a little-endian `u32`.
    #[inline(always)]
    fn read_u32(&mut self) -> io::Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads a little-endian `u64`.
    #[inline(always)]
    fn read_u64(&mut self) -> io::Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Reads a big-endian `u64`.
    #[inline(always)]
    fn read_be_u64(&mut self) -> io::Result<u64> {
        self.read_array().map(u64::from_be_bytes)
    }
}

impl<R: ReadBytes> ReadBytes for &mut R {
    fn read_byte(&mut self) -> io::Result<u8> {
        (**self).read_byte()
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_buf_exact(buf)
    }

    fn ignore_bytes(&mut self, count: u64) -> io::Result<()> {
        (**self).ignore_bytes(count)
    }

    fn pos(&self) -> u64 {
        (**self).pos()
    }
}
