// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use super::ReadBytes;

/// A `Monitor` observes the bytes read through a [`MonitorStream`]. The checksums in
/// [`crate::checksum`] are monitors.
pub trait Monitor {
    fn process_byte(&mut self, byte: u8);

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.process_byte(byte);
        }
    }
}

/// A `MonitorStream` passes every byte read from the inner reader to a [`Monitor`]. Skipped bytes
/// are not observed.
pub struct MonitorStream<B: ReadBytes, M: Monitor> {
    inner: B,
    monitor: M,
}

impl<B: ReadBytes, M: Monitor> MonitorStream<B, M> {
    pub fn new(inner: B, monitor: M) -> MonitorStream<B, M> {
        MonitorStream { inner, monitor }
    }

    /// Gets the monitor.
    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    /// Stops monitoring and returns the inner reader.
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: ReadBytes, M: Monitor> ReadBytes for MonitorStream<B, M> {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        let byte = self.inner.read_byte()?;
        self.monitor.process_byte(byte);
        Ok(byte)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_buf_exact(buf)?;
        self.monitor.process_buf_bytes(buf);
        Ok(())
    }

    fn ignore_bytes(&mut self, count: u64) -> io::Result<()> {
        self.inner.ignore_bytes(count)
    }

    fn pos(&self) -> u64 {
        self.inner.pos()
    }
}
