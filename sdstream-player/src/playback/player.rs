//! Per-slot player state shared between the producer and output contexts
//!
//! Every field has a single writer. The producer owns the lifecycle state,
//! stream metadata, and decode-side counters; the consumer only writes the
//! playback-side counters. Control flags are atomics so any context may
//! request a stop without taking a lock.
//!
//! Each attached stream gets a new generation number. A stop request records
//! the generation it was raised against, so a request that arrives after its
//! stream has been replaced never reaches the next one.

use super::ring_buffer::RingBuffer;
use crate::audio::{ContainerKind, FormatInfo};
use crate::config::PlayerConfig;
use sdstream_common::PlayerStateKind;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// `stop_target` value meaning no stop is pending; generations start above it
const NO_STOP: u64 = 0;

fn state_to_u8(state: PlayerStateKind) -> u8 {
    match state {
        PlayerStateKind::Idle => 0,
        PlayerStateKind::Opening => 1,
        PlayerStateKind::Streaming => 2,
        PlayerStateKind::Stopping => 3,
        PlayerStateKind::Finished => 4,
        PlayerStateKind::Error => 5,
    }
}

fn state_from_u8(value: u8) -> PlayerStateKind {
    match value {
        1 => PlayerStateKind::Opening,
        2 => PlayerStateKind::Streaming,
        3 => PlayerStateKind::Stopping,
        4 => PlayerStateKind::Finished,
        5 => PlayerStateKind::Error,
        _ => PlayerStateKind::Idle,
    }
}

/// Stream counters
///
/// Reset by the producer when a stream opens, while the consumer is only
/// emitting silence.
#[derive(Debug, Default)]
pub struct PlayerCounters {
    // producer
    pub frames_decoded: AtomicU64,
    pub samples_decoded: AtomicU64,
    pub bytes_read: AtomicU64,
    pub position: AtomicU64,
    pub decode_attempts: AtomicU64,
    pub resync_skips: AtomicU64,
    pub overflow_dropped: AtomicU64,
    // consumer
    pub underruns: AtomicU64,
    pub samples_played: AtomicU64,
    pub skipped_cycles: AtomicU64,
}

impl PlayerCounters {
    fn reset(&self) {
        for counter in [
            &self.frames_decoded,
            &self.samples_decoded,
            &self.bytes_read,
            &self.position,
            &self.decode_attempts,
            &self.resync_skips,
            &self.overflow_dropped,
            &self.underruns,
            &self.samples_played,
            &self.skipped_cycles,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Metadata of the stream currently attached to a player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_id: Uuid,
    pub name: String,
    pub container: Option<ContainerKind>,
    /// Resource size reported by storage
    pub size_bytes: u64,
    /// Decoded length in samples, when the container declares it
    pub total_samples: Option<u64>,
}

/// One independent playback slot
pub struct Player {
    slot: usize,
    state: AtomicU8,
    generation: AtomicU64,
    stop_target: AtomicU64,
    decode_complete: AtomicBool,
    ring: RingBuffer<i16>,
    counters: PlayerCounters,
    format: Mutex<Option<FormatInfo>>,
    stream: Mutex<Option<StreamInfo>>,
    pending: Mutex<Option<String>>,
    settle_lock: Mutex<()>,
    settled: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Player {
    pub fn new(slot: usize, config: &PlayerConfig) -> Self {
        Self {
            slot,
            state: AtomicU8::new(state_to_u8(PlayerStateKind::Idle)),
            generation: AtomicU64::new(NO_STOP + 1),
            stop_target: AtomicU64::new(NO_STOP),
            decode_complete: AtomicBool::new(false),
            ring: RingBuffer::new(config.ring_capacity),
            counters: PlayerCounters::default(),
            format: Mutex::new(None),
            stream: Mutex::new(None),
            pending: Mutex::new(None),
            settle_lock: Mutex::new(()),
            settled: Condvar::new(),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn ring(&self) -> &RingBuffer<i16> {
        &self.ring
    }

    pub fn counters(&self) -> &PlayerCounters {
        &self.counters
    }

    pub fn state(&self) -> PlayerStateKind {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Producer only. Wakes anyone waiting for the player to settle.
    pub(crate) fn set_state(&self, state: PlayerStateKind) -> PlayerStateKind {
        let old = state_from_u8(self.state.swap(state_to_u8(state), Ordering::SeqCst));
        let _guard = lock(&self.settle_lock);
        self.settled.notify_all();
        old
    }

    /// Bumped every time a new stream is attached
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// A stop is pending for the stream attached now. Requests raised
    /// against an earlier stream read as false.
    pub fn stop_requested(&self) -> bool {
        let target = self.stop_target.load(Ordering::SeqCst);
        target != NO_STOP && target == self.generation()
    }

    /// Ask the producer to stop the current stream. Any context may call this.
    pub fn request_stop(&self) {
        self.stop_target.store(self.generation(), Ordering::SeqCst);
    }

    pub(crate) fn clear_stop(&self) {
        self.stop_target.store(NO_STOP, Ordering::SeqCst);
    }

    /// Every sample of the stream is in the ring; only draining remains
    pub fn decode_complete(&self) -> bool {
        self.decode_complete.load(Ordering::Acquire)
    }

    pub(crate) fn set_decode_complete(&self, complete: bool) {
        self.decode_complete.store(complete, Ordering::Release);
    }

    /// Queue a resource for the producer to open on its next pass
    pub fn set_pending(&self, name: String) {
        *lock(&self.pending) = Some(name);
    }

    pub(crate) fn take_pending(&self) -> Option<String> {
        lock(&self.pending).take()
    }

    /// Drop a queued play request that the producer has not picked up yet
    pub fn cancel_pending(&self) -> bool {
        lock(&self.pending).take().is_some()
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    pub fn format(&self) -> Option<FormatInfo> {
        *lock(&self.format)
    }

    /// Record the stream format if none is known yet; returns it when this
    /// call was the one that set it.
    pub(crate) fn capture_format(&self, format: FormatInfo) -> Option<FormatInfo> {
        let mut current = lock(&self.format);
        if current.is_some() {
            return None;
        }
        *current = Some(format);
        Some(format)
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        lock(&self.stream).clone()
    }

    pub(crate) fn update_stream<F: FnOnce(&mut StreamInfo)>(&self, update: F) {
        if let Some(info) = lock(&self.stream).as_mut() {
            update(info);
        }
    }

    /// Producer only: zero everything for a new stream. The state must not
    /// be Streaming, so the consumer is not touching the ring.
    pub(crate) fn reset_for_stream(&self, info: StreamInfo) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.ring.clear();
        self.counters.reset();
        self.set_decode_complete(false);
        *lock(&self.format) = None;
        *lock(&self.stream) = Some(info);
    }

    /// Block until the player is no longer active, or `timeout` elapses.
    /// Returns true if it settled.
    pub fn wait_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = lock(&self.settle_lock);
        loop {
            if !self.state().is_active() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match self.settled.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Point-in-time view for status reporting
    pub fn status(&self) -> PlayerStatus {
        let stats = self.ring.stats();
        let stream = self.stream_info();
        let format = self.format();
        let c = &self.counters;

        let position_bytes = PlayerCounters::get(&c.position);
        let samples_played = PlayerCounters::get(&c.samples_played);
        let total_bytes = stream.as_ref().map(|s| s.size_bytes).unwrap_or(0);
        let total_samples = stream.as_ref().and_then(|s| s.total_samples);

        let percent = if total_bytes > 0 {
            (position_bytes.min(total_bytes) * 100 / total_bytes) as u8
        } else {
            0
        };

        let (position_ms, length_ms) = match format {
            Some(f) if f.sample_rate > 0 => {
                let position_ms = samples_played * 1000 / f.sample_rate as u64;
                let length_ms = match total_samples {
                    Some(samples) => samples * 1000 / f.sample_rate as u64,
                    None if f.bitrate_kbps > 0 => total_bytes * 8 / f.bitrate_kbps as u64,
                    None => 0,
                };
                (position_ms, length_ms)
            }
            _ => (0, 0),
        };

        PlayerStatus {
            slot: self.slot,
            state: self.state(),
            name: stream.as_ref().map(|s| s.name.clone()),
            stream_id: stream.as_ref().map(|s| s.stream_id),
            container: stream.as_ref().and_then(|s| s.container),
            format,
            position_bytes,
            total_bytes,
            percent,
            total_samples,
            ring_available: stats.available,
            ring_capacity: stats.capacity,
            frames_decoded: PlayerCounters::get(&c.frames_decoded),
            samples_decoded: PlayerCounters::get(&c.samples_decoded),
            bytes_read: PlayerCounters::get(&c.bytes_read),
            decode_attempts: PlayerCounters::get(&c.decode_attempts),
            resync_skips: PlayerCounters::get(&c.resync_skips),
            overflow_dropped: PlayerCounters::get(&c.overflow_dropped),
            underruns: PlayerCounters::get(&c.underruns),
            samples_played,
            skipped_cycles: PlayerCounters::get(&c.skipped_cycles),
            position_ms,
            length_ms,
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("slot", &self.slot)
            .field("state", &self.state())
            .field("ring", &self.ring)
            .finish()
    }
}

/// Snapshot returned by `Engine::status`
#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub slot: usize,
    pub state: PlayerStateKind,
    pub name: Option<String>,
    pub stream_id: Option<Uuid>,
    pub container: Option<ContainerKind>,
    pub format: Option<FormatInfo>,
    pub position_bytes: u64,
    pub total_bytes: u64,
    pub percent: u8,
    pub total_samples: Option<u64>,
    pub ring_available: usize,
    pub ring_capacity: usize,
    pub frames_decoded: u64,
    pub samples_decoded: u64,
    pub bytes_read: u64,
    pub decode_attempts: u64,
    pub resync_skips: u64,
    pub overflow_dropped: u64,
    pub underruns: u64,
    pub samples_played: u64,
    pub skipped_cycles: u64,
    pub position_ms: u64,
    pub length_ms: u64,
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.slot, self.state)?;
        if let Some(name) = &self.name {
            write!(f, " {}", name)?;
        }
        if let Some(format) = &self.format {
            write!(
                f,
                " ({} Hz, {} ch, {} kbps)",
                format.sample_rate, format.channels, format.bitrate_kbps
            )?;
        }
        write!(
            f,
            " {}.{:01}s/{}.{:01}s {}% ring {}/{} frames {} underruns {}",
            self.position_ms / 1000,
            self.position_ms % 1000 / 100,
            self.length_ms / 1000,
            self.length_ms % 1000 / 100,
            self.percent,
            self.ring_available,
            self.ring_capacity,
            self.frames_decoded,
            self.underruns
        )
    }
}
