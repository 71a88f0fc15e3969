// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io;
use std::io::{Read, Seek, SeekFrom};

use crate::errors::would_block_error;

/// `SeekInput` is the byte source consumed by the seek engine.
///
/// An input is forward-only from the engine's point of view: the engine may peek at buffered bytes
/// and skip over them, but it never moves the input backward. Whenever the engine needs the input
/// at a different position it asks its owner to reposition it and call back.
pub trait SeekInput {
    /// Returns exactly `min(len, remaining)` bytes starting at the current position without
    /// consuming them, where `remaining` is the number of bytes until the declared end of the
    /// input.
    ///
    /// If the bytes are not buffered yet, returns an error of kind
    /// [`io::ErrorKind::WouldBlock`]. The caller should make more data available and retry.
    fn peek(&mut self, len: usize) -> io::Result<&[u8]>;

    /// Consumes `count` bytes.
    fn skip(&mut self, count: u64) -> io::Result<()>;

    /// Gets the absolute byte position of the input.
    fn pos(&self) -> u64;

    /// Gets the declared length of the input in bytes, if known.
    fn byte_len(&self) -> Option<u64>;
}

impl<T: SeekInput + ?Sized> SeekInput for &mut T {
    fn peek(&mut self, len: usize) -> io::Result<&[u8]> {
        (**self).peek(len)
    }

    fn skip(&mut self, count: u64) -> io::Result<()> {
        (**self).skip(count)
    }

    fn pos(&self) -> u64 {
        (**self).pos()
    }

    fn byte_len(&self) -> Option<u64> {
        (**self).byte_len()
    }
}

/// `MemoryInput` is a [`SeekInput`] over an in-memory buffer.
///
/// Optionally, only a limited window of bytes is "buffered" after each reposition, mimicking a
/// network transport where every read delivers a few kilobytes. Peeking beyond the buffered window
/// returns [`io::ErrorKind::WouldBlock`] until [`MemoryInput::fill`] is called.
pub struct MemoryInput {
    data: Box<[u8]>,
    pos: u64,
    window: Option<u64>,
    buffered: u64,
    high_water: u64,
}

impl MemoryInput {
    /// Instantiate a fully buffered `MemoryInput`.
    pub fn new(data: impl Into<Box<[u8]>>) -> Self {
        MemoryInput { data: data.into(), pos: 0, window: None, buffered: u64::MAX, high_water: 0 }
    }

    /// Instantiate a `MemoryInput` that only buffers `window` bytes after each reposition.
    pub fn with_window(data: impl Into<Box<[u8]>>, window: u64) -> Self {
        MemoryInput {
            data: data.into(),
            pos: 0,
            window: Some(window),
            buffered: window,
            high_water: 0,
        }
    }

    /// Moves the input to an absolute position. The position may not exceed the length of the
    /// data.
    pub fn reposition(&mut self, pos: u64) -> io::Result<()> {
        if pos > self.data.len() as u64 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "position out of range"));
        }
        self.pos = pos;
        self.buffered = self.window.unwrap_or(u64::MAX);
        Ok(())
    }

    /// Makes `count` more bytes available beyond the current position.
    pub fn fill(&mut self, count: u64) {
        self.buffered = self.buffered.saturating_add(count);
    }

    /// Gets the furthest absolute position ever returned by a peek.
    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    fn remaining(&self) -> u64 {
        self.data.len() as u64 - self.pos
    }
}

impl SeekInput for MemoryInput {
    fn peek(&mut self, len: usize) -> io::Result<&[u8]> {
        let len = cmp::min(len as u64, self.remaining());

        if len > self.buffered {
            return would_block_error();
        }

        let start = self.pos as usize;
        let end = start + len as usize;

        self.high_water = cmp::max(self.high_water, end as u64);

        Ok(&self.data[start..end])
    }

    fn skip(&mut self, count: u64) -> io::Result<()> {
        if count > self.remaining() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "skip past end of input"));
        }
        if count > self.buffered {
            return would_block_error();
        }
        self.pos += count;
        self.buffered -= count;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// `MediaSourceInput` adapts any seekable reader, such as a `std::fs::File`, into a
/// [`SeekInput`].
///
/// Peeked bytes are retained in an internal buffer so that repeated peeks at the same position do
/// not touch the underlying reader. Reads from the underlying reader are blocking, so a
/// `MediaSourceInput` never returns [`io::ErrorKind::WouldBlock`].
pub struct MediaSourceInput<R: Read + Seek> {
    inner: R,
    buf: Vec<u8>,
    buf_pos: u64,
    pos: u64,
    len: u64,
}

impl<R: Read + Seek> MediaSourceInput<R> {
    /// Instantiate a new `MediaSourceInput`. The length of the source is determined by seeking to
    /// its end.
    pub fn try_new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;

        Ok(MediaSourceInput { inner, buf: Vec::new(), buf_pos: 0, pos: 0, len })
    }

    /// Moves the input to an absolute position.
    pub fn reposition(&mut self, pos: u64) -> io::Result<()> {
        if pos > self.len {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "position out of range"));
        }
        self.pos = pos;
        Ok(())
    }

    /// Unwraps this `MediaSourceInput`, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> SeekInput for MediaSourceInput<R> {
    fn peek(&mut self, len: usize) -> io::Result<&[u8]> {
        let want = cmp::min(len as u64, self.len - self.pos) as usize;

        // If the position is outside of the buffered region, drop the buffer.
        if self.pos < self.buf_pos || self.pos > self.buf_pos + self.buf.len() as u64 {
            self.buf.clear();
            self.buf_pos = self.pos;
        }

        let mut start = (self.pos - self.buf_pos) as usize;

        if start + want > self.buf.len() {
            // Discard the consumed prefix before growing the buffer.
            self.buf.drain(..start);
            self.buf_pos = self.pos;
            start = 0;

            let filled = self.buf.len();
            self.buf.resize(want, 0);

            let result = self
                .inner
                .seek(SeekFrom::Start(self.buf_pos + filled as u64))
                .and_then(|_| self.inner.read_exact(&mut self.buf[filled..want]));

            // Only bytes actually read may remain buffered.
            if let Err(err) = result {
                self.buf.truncate(filled);
                return Err(err);
            }
        }

        Ok(&self.buf[start..start + want])
    }

    fn skip(&mut self, count: u64) -> io::Result<()> {
        if count > self.len - self.pos {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "skip past end of input"));
        }
        self.pos += count;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, ErrorKind, Read, Seek, SeekFrom};

    use super::{MediaSourceInput, MemoryInput, SeekInput};

    /// A reader whose first read fails.
    struct FailFirstRead {
        inner: Cursor<Vec<u8>>,
        failed: bool,
    }

    impl Read for FailFirstRead {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(io::Error::new(ErrorKind::Other, "transport reset"));
            }
            self.inner.read(buf)
        }
    }

    impl Seek for FailFirstRead {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn verify_media_source_input_failed_read() {
        let data: Vec<u8> = (1..=64).collect();
        let reader = FailFirstRead { inner: Cursor::new(data), failed: false };

        let mut input = MediaSourceInput::try_new(reader).unwrap();

        assert_eq!(input.peek(4).unwrap_err().kind(), ErrorKind::Other);

        // The failed read leaves nothing behind.
        assert_eq!(input.peek(4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(input.peek(8).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn verify_memory_input_window() {
        let data: Vec<u8> = (0..=255).collect();
        let mut input = MemoryInput::with_window(data, 16);

        assert_eq!(input.peek(16).unwrap(), &(0..16).collect::<Vec<u8>>()[..]);
        assert_eq!(input.peek(17).unwrap_err().kind(), ErrorKind::WouldBlock);

        input.fill(16);
        assert_eq!(input.peek(32).unwrap().len(), 32);

        input.reposition(250).unwrap();
        // Only 6 bytes remain, which is within the window.
        assert_eq!(input.peek(64).unwrap(), &[250, 251, 252, 253, 254, 255]);
        assert_eq!(input.high_water(), 256);
    }

    #[test]
    fn verify_media_source_input_peek() {
        let data: Vec<u8> = (0..100).collect();
        let mut input = MediaSourceInput::try_new(Cursor::new(data)).unwrap();

        assert_eq!(input.byte_len(), Some(100));
        assert_eq!(input.peek(4).unwrap(), &[0, 1, 2, 3]);

        input.skip(2).unwrap();
        assert_eq!(input.peek(4).unwrap(), &[2, 3, 4, 5]);

        input.reposition(90).unwrap();
        assert_eq!(input.peek(64).unwrap(), &[90, 91, 92, 93, 94, 95, 96, 97, 98, 99]);

        input.reposition(10).unwrap();
        assert_eq!(input.peek(2).unwrap(), &[10, 11]);
        assert!(input.skip(91).is_err());
    }
}
