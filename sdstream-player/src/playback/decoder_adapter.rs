//! Frame decoder adapter
//!
//! Runs one decode attempt against the staging buffer and moves the result
//! into the player's ring:
//! - success: downmix to mono, push (excess beyond free space is dropped and
//!   counted, the frame is never split across calls), compact by the frame
//!   length
//! - failure: compact by exactly one byte so the next attempt starts one
//!   byte later

use super::player::{Player, PlayerCounters};
use super::staging::StagingBuffer;
use crate::audio::{downmix_to_mono, DecodeOutcome, FormatInfo, FrameDecoder};
use tracing::trace;

/// What one decode attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    Decoded {
        pushed: usize,
        dropped: usize,
        /// Set when this was the first frame of the stream
        first_format: Option<FormatInfo>,
    },
    /// No frame at offset 0; one byte was skipped
    Resync,
    /// The frame at offset 0 is incomplete and storage has more bytes
    NeedMoreData,
    /// The decoder will produce no more frames
    EndOfStream,
}

pub struct DecoderAdapter {
    decoder: Box<dyn FrameDecoder>,
}

impl DecoderAdapter {
    pub fn new(decoder: Box<dyn FrameDecoder>) -> Self {
        Self { decoder }
    }

    pub fn step(&mut self, staging: &mut StagingBuffer, player: &Player) -> DecodeStep {
        let counters = player.counters();

        // an incomplete frame is not an attempt; it is retried after a refill
        match self.decoder.decode(staging.bytes(), staging.end_of_stream()) {
            DecodeOutcome::Frame(frame) => {
                PlayerCounters::add(&counters.decode_attempts, 1);
                let first_format = player.capture_format(frame.format());
                let mono = downmix_to_mono(&frame.samples, frame.channels);
                let pushed = player.ring().push(&mono);
                let dropped = mono.len() - pushed;
                if dropped > 0 {
                    trace!("Ring full, dropped {} samples", dropped);
                    PlayerCounters::add(&counters.overflow_dropped, dropped as u64);
                }

                let consumed = frame.consumed_bytes.max(1);
                staging.compact(consumed);
                PlayerCounters::add(&counters.frames_decoded, 1);
                PlayerCounters::add(&counters.samples_decoded, mono.len() as u64);
                PlayerCounters::add(&counters.position, consumed as u64);

                DecodeStep::Decoded {
                    pushed,
                    dropped,
                    first_format,
                }
            }
            DecodeOutcome::NoFrame => {
                PlayerCounters::add(&counters.decode_attempts, 1);
                staging.compact(1);
                PlayerCounters::add(&counters.resync_skips, 1);
                PlayerCounters::add(&counters.position, 1);
                DecodeStep::Resync
            }
            DecodeOutcome::NeedMoreData => DecodeStep::NeedMoreData,
            DecodeOutcome::EndOfStream => DecodeStep::EndOfStream,
        }
    }
}
