// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `registry` module detects the container format of a stream from its start of stream marker
//! and instantiates a seeker for it.

use std::fmt;

use log::{debug, info};

use crate::adapter::SeekAdapter;
use crate::errors::{unsupported_error, Result};
use crate::io::SeekInput;
use crate::seek::{Probe, SeekOptions};

/// A seeker with a type-erased probe.
pub type DynSeeker = SeekAdapter<Box<dyn Probe + Send>>;

/// Seeker factory function. Reads the headers of the stream at the current position of the input
/// and creates a [`DynSeeker`] for it.
pub type SeekerFactoryFn = fn(&mut dyn SeekInput, SeekOptions) -> Result<DynSeeker>;

/// Basic information about a container format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ContainerInfo {
    /// A short ASCII-only string identifying the container format.
    pub short_name: &'static str,
    /// A longer, more descriptive, string identifying the container format.
    pub long_name: &'static str,
}

/// Describes how to detect a container format and instantiate a seeker for it.
#[derive(Copy, Clone)]
pub struct SeekerDescriptor {
    pub info: ContainerInfo,
    /// Byte-string start of stream markers. A stream beginning with any of them is assumed to be of
    /// this container format.
    pub markers: &'static [&'static [u8]],
    /// A factory function to create a seeker for the container format.
    pub factory: SeekerFactoryFn,
}

impl fmt::Debug for SeekerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeekerDescriptor")
            .field("info", &self.info)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}

/// `Registry` maps start of stream markers to the seekers of the container formats they identify.
#[derive(Default)]
pub struct Registry {
    descriptors: Vec<SeekerDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { descriptors: Vec::new() }
    }

    /// Register a seeker. A previously registered seeker with the same short name is replaced.
    pub fn register(&mut self, descriptor: SeekerDescriptor) {
        let short_name = descriptor.info.short_name;

        match self.descriptors.iter_mut().find(|d| d.info.short_name == short_name) {
            Some(existing) => {
                debug!("registry: replacing seeker for {}", short_name);
                *existing = descriptor;
            }
            None => self.descriptors.push(descriptor),
        }
    }

    /// Gets all registered seekers in the order they were registered.
    pub fn descriptors(&self) -> &[SeekerDescriptor] {
        &self.descriptors
    }

    /// Detect the container format of the stream at the current position of `input`. Nothing is
    /// consumed.
    ///
    /// Returns `None` if no registered marker matches.
    pub fn detect(&self, input: &mut dyn SeekInput) -> Result<Option<&SeekerDescriptor>> {
        let max_len = self
            .descriptors
            .iter()
            .flat_map(|d| d.markers.iter())
            .map(|marker| marker.len())
            .max()
            .unwrap_or(0);

        let buf = input.peek(max_len)?;

        let found = self
            .descriptors
            .iter()
            .find(|d| d.markers.iter().any(|marker| !marker.is_empty() && buf.starts_with(marker)));

        Ok(found)
    }

    /// Detect the container format of the stream at the current position of `input`, and
    /// instantiate a seeker for it.
    pub fn make_seeker(
        &self,
        input: &mut dyn SeekInput,
        options: SeekOptions,
    ) -> Result<(ContainerInfo, DynSeeker)> {
        let descriptor = match self.detect(input)? {
            Some(descriptor) => *descriptor,
            None => return unsupported_error("registry: no suitable container seeker found"),
        };

        info!("registry: found {} stream at {}", descriptor.info.long_name, input.pos());

        let seeker = (descriptor.factory)(input, options)?;

        Ok((descriptor.info, seeker))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ContainerInfo, DynSeeker, Registry, SeekerDescriptor};
    use crate::adapter::SeekAdapter;
    use crate::errors::{Error, Result};
    use crate::io::{MemoryInput, SeekInput};
    use crate::seek::{Probe, ProbeResult, ProbeWindow, SeekOptions, SeekParams, SeekSession};
    use crate::units::{Mark, SampleRateMapping};

    struct NullProbe;

    impl Probe for NullProbe {
        fn probe(
            &mut self,
            _: &mut dyn SeekInput,
            _: &ProbeWindow,
            _: Mark,
        ) -> Result<ProbeResult> {
            Ok(ProbeResult::NoUnitInRange)
        }

        fn probe_last(&mut self, _: &mut dyn SeekInput, _: &ProbeWindow) -> Result<Option<Mark>> {
            Ok(None)
        }
    }

    /// Creates a seeker whose payload begins after the 4 byte marker and has a rate of `rate`.
    fn null_seeker(
        input: &mut dyn SeekInput,
        options: SeekOptions,
        rate: u32,
    ) -> Result<DynSeeker> {
        let stream_end = input.byte_len().unwrap_or(0);
        let params = SeekParams { payload_start: 4, stream_end, start_mark: 0, total_marks: None };

        let session =
            SeekSession::new(NullProbe, Arc::new(SampleRateMapping::new(rate)), params, options);

        Ok(SeekAdapter::new(session).into_boxed())
    }

    fn null_seeker_1k(input: &mut dyn SeekInput, options: SeekOptions) -> Result<DynSeeker> {
        null_seeker(input, options, 1000)
    }

    fn null_seeker_8k(input: &mut dyn SeekInput, options: SeekOptions) -> Result<DynSeeker> {
        null_seeker(input, options, 8000)
    }

    fn descriptor(short_name: &'static str, markers: &'static [&'static [u8]]) -> SeekerDescriptor {
        SeekerDescriptor {
            info: ContainerInfo { short_name, long_name: short_name },
            markers,
            factory: null_seeker_1k,
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(descriptor("abcd", &[b"ABCD"]));
        registry.register(descriptor("wxyz", &[b"WX", b"WXYZ"]));
        registry
    }

    #[test]
    fn verify_detect_by_marker() {
        let registry = registry();

        let mut input = MemoryInput::new(b"WXYZ0000".to_vec());
        assert_eq!(registry.detect(&mut input).unwrap().map(|d| d.info.short_name), Some("wxyz"));

        // A stream shorter than the longest marker can still match a shorter one.
        let mut input = MemoryInput::new(b"WX".to_vec());
        assert_eq!(registry.detect(&mut input).unwrap().map(|d| d.info.short_name), Some("wxyz"));

        let mut input = MemoryInput::new(b"ABCD0000".to_vec());
        assert_eq!(registry.detect(&mut input).unwrap().map(|d| d.info.short_name), Some("abcd"));

        // Nothing is consumed.
        assert_eq!(input.pos(), 0);

        let mut input = MemoryInput::new(b"ABC".to_vec());
        assert!(registry.detect(&mut input).unwrap().is_none());
    }

    #[test]
    fn verify_detect_would_block() {
        let registry = registry();

        let mut input = MemoryInput::with_window(b"ABCD0000".to_vec(), 2);

        match registry.detect(&mut input) {
            Err(err) => assert!(err.is_would_block()),
            Ok(found) => panic!("detected {:?} without enough data", found),
        }

        input.fill(2);
        assert!(registry.detect(&mut input).unwrap().is_some());
    }

    #[test]
    fn verify_make_seeker() {
        let registry = registry();

        let mut input = MemoryInput::new(b"ABCD0000".to_vec());
        let (info, seeker) = registry.make_seeker(&mut input, SeekOptions::default()).unwrap();

        assert_eq!(info.short_name, "abcd");
        assert_eq!(seeker.session().params().payload_start, 4);

        let mut input = MemoryInput::new(b"0000".to_vec());

        match registry.make_seeker(&mut input, SeekOptions::default()) {
            Err(Error::Unsupported(_)) => (),
            _ => panic!("expected an unsupported error"),
        }
    }

    #[test]
    fn verify_register_replaces() {
        let mut registry = registry();

        registry.register(SeekerDescriptor {
            factory: null_seeker_8k,
            ..descriptor("abcd", &[b"ABCD"])
        });

        assert_eq!(registry.descriptors().len(), 2);

        let mut input = MemoryInput::new(b"ABCD0000".to_vec());
        let (_, seeker) = registry.make_seeker(&mut input, SeekOptions::default()).unwrap();

        assert_eq!(seeker.session().mapping().time_to_mark(1_000_000), 8000);
    }
}
