//! Fill scheduler (producer-side state machine)
//!
//! `Idle -> Opening -> Streaming -> Stopping -> (Finished | Error)`
//!
//! One scheduler per player, driven by `tick()` from the producer thread.
//! A tick never blocks except inside a storage read, and the ring lock is
//! never held across a read or a decode. Stop requests are honored before
//! any queued play request, so a stopped stream's buffers are never reused
//! while it is still attached.

use super::decoder_adapter::{DecodeStep, DecoderAdapter};
use super::player::{Player, PlayerCounters, StreamInfo};
use super::staging::StagingBuffer;
use crate::audio::{
    ContainerKind, FormatInfo, Mp3FrameDecoder, ParseProgress, PcmFrameDecoder, WavParser,
};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::storage::{StorageHandle, StorageReader};
use sdstream_common::events::{EventBus, PlayerEvent};
use sdstream_common::PlayerStateKind;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bounds the work of one tick so the other players get their turn
const DECODE_ATTEMPTS_PER_TICK: usize = 4096;

/// Whether a tick changed anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do; the producer may wait
    Idle,
    Busy,
}

enum Phase {
    /// Waiting for the first bytes to pick a container
    Detect,
    WavHeader(WavParser),
    Decode(DecoderAdapter),
}

struct ActiveStream {
    stream_id: Uuid,
    name: String,
    handle: Option<Box<dyn StorageHandle>>,
    phase: Phase,
}

enum HeaderProgress {
    Waiting { progressed: bool },
    Ready { format: Option<FormatInfo> },
}

#[derive(Default)]
struct FillOutcome {
    progressed: bool,
    end_of_stream: bool,
    first_format: Option<FormatInfo>,
}

pub struct FillScheduler {
    player: Arc<Player>,
    storage: Arc<dyn StorageReader>,
    events: EventBus,
    config: PlayerConfig,
    staging: StagingBuffer,
    stream: Option<ActiveStream>,
}

impl FillScheduler {
    pub fn new(
        player: Arc<Player>,
        storage: Arc<dyn StorageReader>,
        config: PlayerConfig,
        events: EventBus,
    ) -> Self {
        let staging = StagingBuffer::new(config.staging_capacity);
        Self {
            player,
            storage,
            events,
            config,
            staging,
            stream: None,
        }
    }

    pub fn player(&self) -> &Arc<Player> {
        &self.player
    }

    /// A storage handle is currently held
    pub fn has_open_handle(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.handle.is_some())
    }

    /// Run one scheduler pass
    pub fn tick(&mut self) -> TickOutcome {
        if self.player.stop_requested() {
            return self.handle_stop();
        }

        match self.player.state() {
            PlayerStateKind::Idle | PlayerStateKind::Finished | PlayerStateKind::Error => {
                match self.player.take_pending() {
                    Some(name) => {
                        self.open(name);
                        TickOutcome::Busy
                    }
                    None => TickOutcome::Idle,
                }
            }
            PlayerStateKind::Opening => self.tick_opening(),
            PlayerStateKind::Streaming => self.tick_streaming(),
            PlayerStateKind::Stopping => self.handle_stop(),
        }
    }

    /// Close whatever is open; used when the producer thread exits
    pub fn shutdown(&mut self) {
        self.player.request_stop();
        self.handle_stop();
    }

    fn handle_stop(&mut self) -> TickOutcome {
        self.player.clear_stop();
        if !self.player.state().is_active() {
            return TickOutcome::Idle;
        }

        self.transition(PlayerStateKind::Stopping);
        if let Some(stream) = self.close_stream() {
            info!("Player {}: stopped {}", self.player.slot(), stream.name);
        }
        self.transition(PlayerStateKind::Finished);
        TickOutcome::Busy
    }

    fn open(&mut self, name: String) {
        let stream_id = Uuid::new_v4();
        self.stream = Some(ActiveStream {
            stream_id,
            name: name.clone(),
            handle: None,
            phase: Phase::Detect,
        });
        // Opening first: the consumer only emits silence from here on
        self.transition(PlayerStateKind::Opening);
        self.staging.reset();
        self.player.reset_for_stream(StreamInfo {
            stream_id,
            name: name.clone(),
            container: None,
            size_bytes: 0,
            total_samples: None,
        });
        info!("Player {}: opening {}", self.player.slot(), name);

        match self.storage.open(&name) {
            Ok(handle) => {
                let size = handle.size();
                debug!("Opened {} ({} bytes)", name, size);
                self.player.update_stream(|info| info.size_bytes = size);
                if let Some(stream) = self.stream.as_mut() {
                    stream.handle = Some(handle);
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn tick_opening(&mut self) -> TickOutcome {
        match self.advance_header() {
            Ok(HeaderProgress::Ready { format }) => {
                if let Some(format) = format {
                    self.announce_format(format);
                }
                self.transition(PlayerStateKind::Streaming);
                self.tick_streaming();
                TickOutcome::Busy
            }
            Ok(HeaderProgress::Waiting { progressed: true }) => TickOutcome::Busy,
            Ok(HeaderProgress::Waiting { progressed: false }) => TickOutcome::Idle,
            Err(e) => {
                self.fail(e);
                TickOutcome::Busy
            }
        }
    }

    /// Pick the container and, for WAV, parse the header up to the data chunk
    fn advance_header(&mut self) -> Result<HeaderProgress> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::InvalidState("No stream attached".to_string()))?;
        let counters = self.player.counters();
        let mut progressed = false;

        loop {
            if self.player.stop_requested() {
                return Ok(HeaderProgress::Waiting { progressed });
            }

            if self.staging.needs_refill() && !self.staging.end_of_stream() {
                let handle = stream
                    .handle
                    .as_mut()
                    .ok_or_else(|| Error::InvalidState("Stream handle closed".to_string()))?;
                let read = self.staging.refill(handle.as_mut(), self.config.read_chunk)?;
                PlayerCounters::add(&counters.bytes_read, read as u64);
                progressed = true;
            }

            match &mut stream.phase {
                Phase::Detect => {
                    let kind = ContainerKind::detect(&stream.name, self.staging.bytes());
                    debug!("{}: {:?} container", stream.name, kind);
                    self.player.update_stream(|info| info.container = Some(kind));
                    match kind {
                        ContainerKind::Mp3 => {
                            let decoder = Mp3FrameDecoder::new()?;
                            stream.phase = Phase::Decode(DecoderAdapter::new(Box::new(decoder)));
                            return Ok(HeaderProgress::Ready { format: None });
                        }
                        ContainerKind::Wav => stream.phase = Phase::WavHeader(WavParser::new()),
                    }
                }

                Phase::WavHeader(parser) => {
                    let (consumed, parsed) = parser.feed(self.staging.bytes())?;
                    self.staging.compact(consumed);
                    PlayerCounters::add(&counters.position, consumed as u64);

                    match parsed {
                        ParseProgress::Ready(header) => {
                            let format = header.format;
                            let block_align = 2 * format.channels as u64;
                            self.player.update_stream(|info| {
                                info.total_samples = Some(header.data_length as u64 / block_align)
                            });

                            let decoder = PcmFrameDecoder::new(
                                format.sample_rate,
                                format.channels,
                                header.data_length as u64,
                            );
                            let info = FormatInfo {
                                sample_rate: format.sample_rate,
                                channels: format.channels,
                                bitrate_kbps: (format.byte_rate as u64 * 8 / 1000) as u32,
                            };
                            stream.phase = Phase::Decode(DecoderAdapter::new(Box::new(decoder)));
                            return Ok(HeaderProgress::Ready {
                                format: self.player.capture_format(info),
                            });
                        }
                        ParseProgress::NeedMoreData => {
                            if self.staging.end_of_stream() {
                                return Err(parser.truncated_error());
                            }
                            if consumed == 0 && !self.staging.needs_refill() {
                                return Err(Error::Format(
                                    "WAV header does not fit the staging buffer".to_string(),
                                ));
                            }
                            progressed = true;
                        }
                    }
                }

                Phase::Decode(_) => return Ok(HeaderProgress::Ready { format: None }),
            }
        }
    }

    fn tick_streaming(&mut self) -> TickOutcome {
        if self.player.decode_complete() {
            if self.player.ring().available() == 0 {
                self.finish();
                return TickOutcome::Busy;
            }
            return TickOutcome::Idle;
        }

        match self.fill() {
            Ok(outcome) => {
                if let Some(format) = outcome.first_format {
                    self.announce_format(format);
                }
                if outcome.end_of_stream {
                    self.end_of_stream();
                    return TickOutcome::Busy;
                }
                if outcome.progressed {
                    TickOutcome::Busy
                } else {
                    TickOutcome::Idle
                }
            }
            Err(e) => {
                self.fail(e);
                TickOutcome::Busy
            }
        }
    }

    /// Refill and decode until the ring reaches the high-watermark or no
    /// forward progress is possible
    fn fill(&mut self) -> Result<FillOutcome> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::InvalidState("No stream attached".to_string()))?;
        let Phase::Decode(adapter) = &mut stream.phase else {
            return Err(Error::InvalidState("Decoder not initialized".to_string()));
        };
        let counters = self.player.counters();
        let high_watermark = self.config.high_watermark();
        let mut outcome = FillOutcome::default();
        let mut attempts = 0;

        while self.player.ring().available() < high_watermark && attempts < DECODE_ATTEMPTS_PER_TICK {
            // also covers the storage read below
            if self.player.stop_requested() {
                break;
            }

            if self.staging.needs_refill() && !self.staging.end_of_stream() {
                let handle = stream
                    .handle
                    .as_mut()
                    .ok_or_else(|| Error::InvalidState("Stream handle closed".to_string()))?;
                let read = self.staging.refill(handle.as_mut(), self.config.read_chunk)?;
                PlayerCounters::add(&counters.bytes_read, read as u64);
            }

            if self.staging.is_empty() && self.staging.end_of_stream() {
                outcome.end_of_stream = true;
                break;
            }

            attempts += 1;
            match adapter.step(&mut self.staging, &self.player) {
                DecodeStep::Decoded { first_format, .. } => {
                    outcome.progressed = true;
                    if first_format.is_some() {
                        outcome.first_format = first_format;
                    }
                }
                DecodeStep::Resync => outcome.progressed = true,
                DecodeStep::NeedMoreData => {
                    let handle = stream
                        .handle
                        .as_mut()
                        .ok_or_else(|| Error::InvalidState("Stream handle closed".to_string()))?;
                    let read = self.staging.refill(handle.as_mut(), self.config.read_chunk)?;
                    PlayerCounters::add(&counters.bytes_read, read as u64);
                    if read == 0 && !self.staging.end_of_stream() {
                        // staging is full and the frame still does not fit
                        self.staging.compact(1);
                        PlayerCounters::add(&counters.resync_skips, 1);
                        PlayerCounters::add(&counters.position, 1);
                    }
                    outcome.progressed = true;
                }
                DecodeStep::EndOfStream => {
                    outcome.end_of_stream = true;
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Storage and decoder are exhausted; only the ring remains to drain
    fn end_of_stream(&mut self) {
        let counters = self.player.counters();
        let frames = PlayerCounters::get(&counters.frames_decoded);
        let resync_skips = PlayerCounters::get(&counters.resync_skips);
        // a WAV that declares an empty data chunk has nothing to decode
        let expected_audio = self.player.stream_info().map_or(true, |info| {
            info.container != Some(ContainerKind::Wav) || info.total_samples.unwrap_or(0) > 0
        });
        if frames == 0 && (resync_skips > 0 || expected_audio) {
            self.fail(Error::Format("No decodable frame found in stream".to_string()));
            return;
        }

        if let Some(stream) = self.stream.as_mut() {
            if let Some(mut handle) = stream.handle.take() {
                handle.close();
            }
            debug!("{}: decode complete after {} frames", stream.name, frames);
        }
        self.player.set_decode_complete(true);

        if self.player.ring().available() == 0 {
            self.finish();
        }
    }

    fn finish(&mut self) {
        let Some(stream) = self.close_stream() else {
            return;
        };
        self.transition(PlayerStateKind::Finished);

        let counters = self.player.counters();
        let frames_decoded = PlayerCounters::get(&counters.frames_decoded);
        let underruns = PlayerCounters::get(&counters.underruns);
        info!(
            "Player {}: finished {} ({} frames, {} underruns)",
            self.player.slot(),
            stream.name,
            frames_decoded,
            underruns
        );
        self.events.emit(PlayerEvent::StreamFinished {
            slot: self.player.slot(),
            stream_id: stream.stream_id,
            name: stream.name,
            frames_decoded,
            underruns,
        });
    }

    fn fail(&mut self, err: Error) {
        let stream = self.close_stream();
        error!("Player {}: stream failed: {}", self.player.slot(), err);
        self.transition(PlayerStateKind::Error);

        if let Some(stream) = stream {
            self.events.emit(PlayerEvent::StreamFailed {
                slot: self.player.slot(),
                stream_id: stream.stream_id,
                name: stream.name,
                reason: err.to_string(),
            });
        }
    }

    /// Detach the stream, closing its storage handle
    fn close_stream(&mut self) -> Option<ActiveStream> {
        let mut stream = self.stream.take()?;
        if let Some(mut handle) = stream.handle.take() {
            handle.close();
        }
        self.staging.reset();
        Some(stream)
    }

    fn announce_format(&self, format: FormatInfo) {
        info!(
            "Player {}: {} Hz, {} ch, {} kbps",
            self.player.slot(),
            format.sample_rate,
            format.channels,
            format.bitrate_kbps
        );
        if format.sample_rate != self.config.sample_rate {
            warn!(
                "Player {}: stream is {} Hz but output runs at {} Hz",
                self.player.slot(),
                format.sample_rate,
                self.config.sample_rate
            );
        }
        if let Some(stream) = &self.stream {
            self.events.emit(PlayerEvent::FormatDetected {
                slot: self.player.slot(),
                stream_id: stream.stream_id,
                sample_rate: format.sample_rate,
                channels: format.channels,
                bitrate_kbps: format.bitrate_kbps,
            });
        }
    }

    fn transition(&self, new_state: PlayerStateKind) {
        let old_state = self.player.set_state(new_state);
        if old_state == new_state {
            return;
        }
        debug!("Player {}: {} -> {}", self.player.slot(), old_state, new_state);
        self.events.emit(PlayerEvent::StateChanged {
            slot: self.player.slot(),
            stream_id: self.stream.as_ref().map(|s| s.stream_id),
            old_state,
            new_state,
        });
    }
}
