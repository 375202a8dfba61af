//! Audio subsystem
//!
//! Decode primitives (MPEG Layer III via symphonia, 16-bit PCM), the WAV
//! header parser, and the output sinks the playback consumer feeds.

pub mod decoder;
#[cfg(feature = "device")]
pub mod device;
pub mod mp3;
pub mod output;
pub mod pcm;
pub mod types;
pub mod wav;

pub use decoder::{DecodeOutcome, FrameDecoder};
#[cfg(feature = "device")]
pub use device::{DeviceOutput, DeviceSink};
pub use mp3::{FrameHeader, Mp3FrameDecoder};
pub use output::{CaptureSink, NullSink, OutputGain, OutputSink, WavFileSink};
pub use pcm::PcmFrameDecoder;
pub use types::{downmix_to_mono, is_playable_name, ContainerKind, DecodedFrame, FormatInfo};
pub use wav::{ParseProgress, WavFormat, WavHeader, WavParser, WavState};
