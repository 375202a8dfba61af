//! Frame decode primitive
//!
//! A [`FrameDecoder`] looks only at the bytes staged at offset 0 and either
//! produces one frame or reports why it could not. It never skips input on
//! its own; resynchronization is the caller's job.

use super::types::DecodedFrame;

/// Result of one decode attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// One frame decoded; the caller consumes `consumed_bytes`
    Frame(DecodedFrame),
    /// No decodable frame starts at offset 0
    NoFrame,
    /// A frame starts at offset 0 but is not fully staged yet
    NeedMoreData,
    /// The decoder has delivered its last frame; remaining input is ignored
    EndOfStream,
}

pub trait FrameDecoder: Send {
    /// Attempt to decode one frame from the start of `bytes`.
    ///
    /// `end_of_stream` tells the decoder no further bytes will be appended,
    /// so an incomplete trailing frame must be reported as `NoFrame`.
    fn decode(&mut self, bytes: &[u8], end_of_stream: bool) -> DecodeOutcome;
}
