//! End-to-end pipeline tests
//!
//! Drive one player's fill scheduler and playback consumer by hand, in
//! lockstep, against in-memory storage and a capturing sink. No threads, so
//! every counter is deterministic.

mod helpers;

use helpers::*;
use sdstream_common::events::{EventBus, PlayerEvent};
use sdstream_common::PlayerStateKind;
use sdstream_player::audio::{CaptureSink, OutputGain};
use sdstream_player::playback::{Delivery, FillScheduler, PlaybackConsumer, Player, TickOutcome};
use sdstream_player::storage::MemoryStorage;
use sdstream_player::PlayerConfig;
use std::sync::Arc;

/// Safety cap on lockstep iterations
const MAX_CYCLES: usize = 100_000;

struct Pipeline {
    scheduler: FillScheduler,
    consumer: PlaybackConsumer,
    storage: MemoryStorage,
    sink: CaptureSink,
    events: EventBus,
}

impl Pipeline {
    fn new(config: PlayerConfig) -> Self {
        let storage = MemoryStorage::new();
        let events = EventBus::default();
        let sink = CaptureSink::new();
        let player = Arc::new(Player::new(0, &config));
        let consumer = PlaybackConsumer::new(
            Arc::clone(&player),
            Box::new(sink.clone()),
            OutputGain::default(),
            config.chunk_size,
        );
        let scheduler = FillScheduler::new(player, Arc::new(storage.clone()), config, events.clone());
        Self {
            scheduler,
            consumer,
            storage,
            sink,
            events,
        }
    }

    fn player(&self) -> &Arc<Player> {
        self.scheduler.player()
    }

    /// Alternate producer and consumer passes until the player settles in
    /// Finished or Error. Returns every delivery in order.
    fn run_to_end(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for _ in 0..MAX_CYCLES {
            self.scheduler.tick();
            let state = self.player().state();
            if matches!(state, PlayerStateKind::Finished | PlayerStateKind::Error) {
                return deliveries;
            }
            deliveries.push(self.consumer.tick());
        }
        panic!("pipeline did not settle, state {}", self.player().state());
    }
}

fn failure_reason(events: &mut tokio::sync::broadcast::Receiver<PlayerEvent>) -> Option<String> {
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::StreamFailed { reason, .. } = event {
            return Some(reason);
        }
    }
    None
}

#[test]
fn test_wav_plays_to_completion_without_underruns() {
    let (source, bytes) = sine_wav(2000);
    assert_eq!(source.len(), 88200);

    let mut pipeline = Pipeline::new(PlayerConfig::default());
    pipeline.storage.insert("sine.wav", bytes);
    let mut events = pipeline.events.subscribe();
    pipeline.player().set_pending("sine.wav".to_string());

    let deliveries = pipeline.run_to_end();
    let status = pipeline.player().status();

    assert_eq!(status.state, PlayerStateKind::Finished);
    assert_eq!(status.total_samples, Some(88200));
    assert_eq!(status.samples_decoded, 88200);
    assert_eq!(status.samples_played, 88200);
    assert_eq!(status.underruns, 0);
    assert_eq!(status.overflow_dropped, 0);
    assert_eq!(status.resync_skips, 0);
    assert_eq!(status.length_ms, 2000);
    assert_eq!(pipeline.storage.open_handles(), 0);

    // 88200 = 689 * 128 + 8
    let tails: Vec<_> = deliveries
        .iter()
        .filter(|d| matches!(d, Delivery::Tail { .. }))
        .collect();
    assert_eq!(tails, vec![&Delivery::Tail { samples: 8 }]);
    assert_eq!(deliveries.iter().filter(|d| **d == Delivery::Audio).count(), 689);

    let leading_silence = deliveries
        .iter()
        .take_while(|d| **d == Delivery::Silence)
        .count();
    assert!(leading_silence >= 1, "consumer runs while the stream opens");
    let captured = pipeline.sink.samples();
    let start = leading_silence * 128;
    assert_eq!(&captured[start..start + source.len()], &source[..]);
    assert!(captured[start + source.len()..].iter().all(|&s| s == 0));

    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::StreamFinished { name, underruns, .. } = event {
            assert_eq!(name, "sine.wav");
            assert_eq!(underruns, 0);
            finished = true;
        }
    }
    assert!(finished, "StreamFinished was not emitted");
}

#[test]
fn test_stereo_wav_is_downmixed() {
    let frames = 4000;
    let interleaved: Vec<i16> = (0..frames).flat_map(|_| [1000i16, -3000]).collect();
    let bytes = wav_bytes(&interleaved, 2, TEST_SAMPLE_RATE);

    let mut pipeline = Pipeline::new(PlayerConfig::default());
    pipeline.storage.insert("stereo.wav", bytes);
    pipeline.player().set_pending("stereo.wav".to_string());

    let deliveries = pipeline.run_to_end();
    let status = pipeline.player().status();
    assert_eq!(status.state, PlayerStateKind::Finished);
    assert_eq!(status.samples_played, frames as u64);
    assert_eq!(status.format.map(|f| f.channels), Some(2));

    let leading_silence = deliveries
        .iter()
        .take_while(|d| **d == Delivery::Silence)
        .count();
    let captured = pipeline.sink.samples();
    let audio = &captured[leading_silence * 128..leading_silence * 128 + frames];
    assert!(audio.iter().all(|&s| s == -1000));
}

#[test]
fn test_producer_respects_high_watermark() {
    let config = PlayerConfig::default();
    let watermark = config.high_watermark();
    assert_eq!(watermark, 24576);

    let (_, bytes) = sine_wav(10_000);
    let mut pipeline = Pipeline::new(config);
    pipeline.storage.insert("long.wav", bytes);
    let player = Arc::clone(pipeline.player());
    player.set_pending("long.wav".to_string());

    // open, then parse the header and fill
    assert_eq!(pipeline.scheduler.tick(), TickOutcome::Busy);
    assert_eq!(pipeline.scheduler.tick(), TickOutcome::Busy);
    assert_eq!(player.state(), PlayerStateKind::Streaming);
    assert!(player.ring().available() >= watermark);

    let bytes_read = player.status().bytes_read;
    assert_eq!(pipeline.scheduler.tick(), TickOutcome::Idle);
    assert_eq!(player.status().bytes_read, bytes_read);

    let mut drained = vec![0i16; player.ring().available() - 24000];
    player.ring().pop(&mut drained);
    assert_eq!(player.ring().available(), 24000);

    assert_eq!(pipeline.scheduler.tick(), TickOutcome::Busy);
    let available = player.ring().available();
    assert!(available >= watermark);
    assert!(available < player.ring().capacity());
    assert_eq!(player.status().overflow_dropped, 0);
}

#[test]
fn test_garbage_mp3_resyncs_byte_by_byte_then_fails() {
    let mut pipeline = Pipeline::new(PlayerConfig::default());
    pipeline.storage.insert("noise.mp3", garbage(1000));
    let mut events = pipeline.events.subscribe();
    pipeline.player().set_pending("noise.mp3".to_string());

    pipeline.run_to_end();
    let status = pipeline.player().status();

    assert_eq!(status.state, PlayerStateKind::Error);
    assert_eq!(status.decode_attempts, 1000);
    assert_eq!(status.resync_skips, 1000);
    assert_eq!(status.frames_decoded, 0);
    assert_eq!(pipeline.storage.open_handles(), 0);

    let reason = failure_reason(&mut events).expect("StreamFailed was not emitted");
    assert!(reason.contains("No decodable frame"), "reason: {}", reason);
}

#[test]
fn test_mp3_resyncs_past_leading_garbage() {
    let mut bytes = garbage(5);
    bytes.extend(silent_mp3_frames(3));

    let mut pipeline = Pipeline::new(PlayerConfig::default());
    pipeline.storage.insert("lead.mp3", bytes);
    pipeline.player().set_pending("lead.mp3".to_string());

    pipeline.run_to_end();
    let status = pipeline.player().status();

    assert_eq!(status.state, PlayerStateKind::Finished);
    assert_eq!(status.resync_skips, 5);
    assert_eq!(status.frames_decoded, 3);
    assert_eq!(status.samples_decoded, 3 * 1152);
    assert_eq!(status.samples_played, 3 * 1152);

    let format = status.format.expect("format captured from first frame");
    assert_eq!(format.sample_rate, 44100);
    assert_eq!(format.channels, 2);
    assert_eq!(format.bitrate_kbps, 128);
}

#[test]
fn test_storage_read_failure_stops_stream() {
    let (_, bytes) = sine_wav(2000);
    let mut pipeline = Pipeline::new(PlayerConfig::default());
    pipeline.storage.insert_failing("broken.wav", bytes, 10_000);
    let mut events = pipeline.events.subscribe();
    pipeline.player().set_pending("broken.wav".to_string());

    pipeline.run_to_end();

    assert_eq!(pipeline.player().state(), PlayerStateKind::Error);
    assert_eq!(pipeline.storage.open_handles(), 0);
    assert!(failure_reason(&mut events).is_some());
}

#[test]
fn test_wav_without_data_chunk_fails() {
    let mut bytes = b"RIFF".to_vec();
    bytes.extend_from_slice(&(4u32 + 24 + 12).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&TEST_SAMPLE_RATE.to_le_bytes());
    bytes.extend_from_slice(&(TEST_SAMPLE_RATE * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"LIST");
    bytes.extend_from_slice(&4u32.to_le_bytes());
    bytes.extend_from_slice(b"INFO");

    let mut pipeline = Pipeline::new(PlayerConfig::default());
    pipeline.storage.insert("empty.wav", bytes);
    let mut events = pipeline.events.subscribe();
    pipeline.player().set_pending("empty.wav".to_string());

    pipeline.run_to_end();

    assert_eq!(pipeline.player().state(), PlayerStateKind::Error);
    let reason = failure_reason(&mut events).expect("StreamFailed was not emitted");
    assert!(reason.contains("No data chunk"), "reason: {}", reason);
}

#[test]
fn test_back_pressure_skips_cycles_without_popping() {
    let (_, bytes) = sine_wav(500);
    let mut pipeline = Pipeline::new(PlayerConfig::default());
    pipeline.storage.insert("short.wav", bytes);
    pipeline.player().set_pending("short.wav".to_string());

    pipeline.scheduler.tick();
    pipeline.scheduler.tick();
    let available = pipeline.player().ring().available();

    pipeline.sink.set_full(true);
    assert_eq!(pipeline.consumer.tick(), Delivery::Skipped);
    assert_eq!(pipeline.consumer.tick(), Delivery::Skipped);
    assert_eq!(pipeline.player().ring().available(), available);
    assert_eq!(pipeline.player().status().skipped_cycles, 2);
    assert_eq!(pipeline.sink.chunk_count(), 0);

    pipeline.sink.set_full(false);
    assert_eq!(pipeline.consumer.tick(), Delivery::Audio);
    assert_eq!(pipeline.player().ring().available(), available - 128);
}
