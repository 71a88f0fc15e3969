// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the error type shared by every Sonde crate.
//!
//! Byte sources report a short read through [`std::io::Error`]. Two kinds are significant to a
//! seek: `UnexpectedEof` when the stream truly ends, and `WouldBlock` when the requested bytes
//! have not arrived yet. Use [`Error::is_would_block`] to tell the latter apart.

use std::error;
use std::fmt;
use std::io;

/// Why a seek could not be completed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeekErrorKind {
    /// The stream has neither a known length nor a known duration, so it cannot be bisected.
    Unseekable,
    /// The requested time lies outside the stream.
    OutOfRange,
    /// No synchronization pattern was found before the declared end of the stream. The stream is
    /// either truncated or not of the expected container type.
    SyncLost,
    /// Too many candidate positions failed verification.
    RetriesExhausted,
    /// The seek session performed more steps than allowed.
    StepLimit,
    /// A seek step was requested while no seek was in progress.
    NotSeeking,
}

impl fmt::Display for SeekErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match self {
            SeekErrorKind::Unseekable => "stream is not seekable",
            SeekErrorKind::OutOfRange => "time is outside the stream",
            SeekErrorKind::SyncLost => "lost synchronization before the end of the stream",
            SeekErrorKind::RetriesExhausted => "too many candidates failed verification",
            SeekErrorKind::StepLimit => "did not converge within the step limit",
            SeekErrorKind::NotSeeking => "no seek in progress",
        };
        f.write_str(desc)
    }
}

/// Every error reported by Sonde.
#[derive(Debug)]
pub enum Error {
    /// Reading or peeking the byte source failed.
    IoError(io::Error),
    /// Malformed data was found where a unit was expected.
    DecodeError(&'static str),
    /// The container, or a feature of it, is not supported.
    Unsupported(&'static str),
    /// The seek failed.
    SeekError(SeekErrorKind),
}

impl Error {
    /// Returns `true` if the byte source signalled that the requested bytes are not buffered yet.
    /// The operation may be retried once more data is available.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::IoError(err) if err.kind() == io::ErrorKind::WouldBlock)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "io error: {}", err),
            Error::DecodeError(msg) => write!(f, "malformed stream: {}", msg),
            Error::Unsupported(feature) => write!(f, "unsupported feature: {}", feature),
            Error::SeekError(kind) => write!(f, "seek error: {}", kind),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns a [`Error::DecodeError`].
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::DecodeError(desc))
}

/// Returns a [`Error::Unsupported`].
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::Unsupported(feature))
}

/// Returns a [`Error::SeekError`].
pub fn seek_error<T>(kind: SeekErrorKind) -> Result<T> {
    Err(Error::SeekError(kind))
}

/// Returns the error for a read past the end of the stream.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream")))
}

/// Returns the error a byte source reports when the requested bytes are not buffered yet.
pub fn would_block_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::WouldBlock, "more data required"))
}
