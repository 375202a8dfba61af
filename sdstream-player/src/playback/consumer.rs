//! Playback consumer
//!
//! Runs on the output cadence. Each call delivers exactly one chunk to the
//! sink: decoded audio, or silence when the player is not streaming or the
//! ring is short. It never blocks, never allocates, never logs, and never
//! touches storage or the decoder.

use super::player::{Player, PlayerCounters};
use super::ring_buffer::Pop;
use crate::audio::{OutputGain, OutputSink};
use sdstream_common::PlayerStateKind;
use std::sync::Arc;

/// What one cadence delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sink signaled back-pressure; nothing was popped or written
    Skipped,
    /// Player not streaming
    Silence,
    Audio,
    /// Last partial chunk of a finished stream, padded with silence
    Tail { samples: usize },
    /// Ring short while the stream is still decoding
    Underrun,
}

pub struct PlaybackConsumer {
    player: Arc<Player>,
    sink: Box<dyn OutputSink>,
    gain: OutputGain,
    chunk: Vec<i16>,
}

impl PlaybackConsumer {
    pub fn new(player: Arc<Player>, sink: Box<dyn OutputSink>, gain: OutputGain, chunk_size: usize) -> Self {
        Self {
            player,
            sink,
            gain,
            chunk: vec![0; chunk_size],
        }
    }

    pub fn player(&self) -> &Arc<Player> {
        &self.player
    }

    /// Deliver one chunk
    pub fn tick(&mut self) -> Delivery {
        let counters = self.player.counters();
        if self.sink.is_full() {
            PlayerCounters::add(&counters.skipped_cycles, 1);
            return Delivery::Skipped;
        }

        let silence = if self.sink.powers_down_on_silence() { 1 } else { 0 };
        if self.player.state() != PlayerStateKind::Streaming {
            self.chunk.fill(silence);
            self.sink.write(&self.chunk);
            return Delivery::Silence;
        }

        match self.player.ring().pop(&mut self.chunk) {
            Pop::Full => {
                self.gain.apply(&mut self.chunk);
                self.sink.write(&self.chunk);
                PlayerCounters::add(&counters.samples_played, self.chunk.len() as u64);
                Delivery::Audio
            }
            Pop::Shortfall { .. } if self.player.decode_complete() => {
                let samples = self.player.ring().drain_into(&mut self.chunk);
                self.gain.apply(&mut self.chunk[..samples]);
                self.chunk[samples..].fill(silence);
                self.sink.write(&self.chunk);
                PlayerCounters::add(&counters.samples_played, samples as u64);
                if samples == 0 {
                    Delivery::Silence
                } else {
                    Delivery::Tail { samples }
                }
            }
            Pop::Shortfall { .. } => {
                self.chunk.fill(silence);
                self.sink.write(&self.chunk);
                PlayerCounters::add(&counters.underruns, 1);
                Delivery::Underrun
            }
        }
    }

    /// Release the sink at shutdown
    pub fn finish(mut self) -> crate::error::Result<()> {
        self.sink.finish()
    }
}
