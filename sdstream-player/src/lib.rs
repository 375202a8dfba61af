//! # sdstream player library
//!
//! Streams compressed audio from slow block storage into a fixed-cadence
//! output sink.
//!
//! **Architecture:** per player slot, a producer-side fill scheduler reads
//! storage into a staging buffer, decodes frames (MPEG Layer III via
//! symphonia, or 16-bit PCM behind a WAV header) and pushes mono samples into
//! a lock-protected ring buffer. A consumer on the output cadence drains one
//! fixed-size chunk per period into the sink, substituting silence on
//! shortfall.

pub mod audio;
pub mod config;
pub mod console;
pub mod error;
pub mod playback;
pub mod storage;

pub use config::{FileConfig, PlayerConfig};
pub use error::{Error, Result};
pub use playback::{Engine, PlayerStatus, StopOutcome};
