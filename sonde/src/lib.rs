// Sonde
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # Project Sonde
//!
//! Sonde is a 100% pure Rust streaming seek estimation library for media containers.
//!
//! Given a partially buffered, forward-only byte source, Sonde converges on the byte position of
//! the unit (page, frame) containing a requested time without ever blocking on the source. Each
//! step of a seek either asks the caller to reposition the source, or reports where to resume
//! reading.
//!
//! # Support
//!
//! Supported container formats are individually gated behind features.
//!
//! | Format   | Feature Flag | Default |
//! |----------|--------------|---------|
//! | FLAC     | `flac`       | Yes     |
//! | Ogg      | `ogg`        | Yes     |
//!
//! # Usage
//!
//! 1. Wrap the byte source in a [`SeekInput`](core::io::SeekInput). For files, use
//!    [`MediaSourceInput`](core::io::MediaSourceInput).
//! 2. Instantiate a seeker with [`default::get_registry`]. The registry detects the container
//!    format from the start of the stream and reads its headers.
//! 3. Call `seek` with the time to seek to, then call `poll` with the input until it returns
//!    [`SeekStep::Converged`](core::seek::SeekStep::Converged). Whenever `poll` returns
//!    [`SeekStep::RepositionTo`](core::seek::SeekStep::RepositionTo), move the input to that
//!    position first. If the position is the current position, make more bytes available.
//! 4. Resume reading from the converged position. Pass every unit read to `filter_unit` to discard
//!    the units that end before the requested time.

pub mod default {
    //! The `default` module provides a convenience registry with every enabled container format
    //! pre-registered. Using the `default` module is completely optional and incurs no overhead
    //! unless actually used.

    pub mod formats {
        //! The `formats` module re-exports the seekers of all enabled container formats.

        #[cfg(feature = "flac")]
        pub use sonde_bundle_flac::{FlacSeeker, FLAC_SEEKER};
        #[cfg(feature = "ogg")]
        pub use sonde_format_ogg::{OggSeeker, OGG_SEEKER};
    }

    use lazy_static::lazy_static;

    use sonde_core::registry::Registry;

    lazy_static! {
        static ref REGISTRY: Registry = {
            let mut registry = Registry::new();
            register_enabled_formats(&mut registry);
            registry
        };
    }

    /// Gets the default `Registry`. This registry pre-registers all the container formats selected
    /// by the `feature` flags in the includer's `Cargo.toml`. If `features` is not set, the default
    /// set of Sonde formats is registered.
    ///
    /// This function is lazy and does not instantiate the `Registry` until the first call to this
    /// function.
    pub fn get_registry() -> &'static Registry {
        &REGISTRY
    }

    /// Registers all the container formats selected by the `feature` flags in the includer's
    /// `Cargo.toml` on the provided `Registry`.
    ///
    /// Use this function to easily populate a custom registry with all enabled formats.
    pub fn register_enabled_formats(registry: &mut Registry) {
        #[cfg(feature = "flac")]
        registry.register(formats::FLAC_SEEKER);

        #[cfg(feature = "ogg")]
        registry.register(formats::OGG_SEEKER);
    }
}

pub use sonde_core as core;
