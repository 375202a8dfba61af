//! Multi-player streaming engine
//!
//! Owns `players` independent slots and two threads:
//! - the producer thread runs every slot's [`FillScheduler`] round-robin and
//!   waits on a condition variable when no slot has work
//! - the output thread runs every slot's [`PlaybackConsumer`] once per chunk
//!   period
//!
//! Control calls (`play`, `stop`, ...) come from any thread. They only set
//! flags and queue requests; all stream state changes happen on the
//! producer thread.

use super::consumer::PlaybackConsumer;
use super::player::{Player, PlayerStatus};
use super::scheduler::{FillScheduler, TickOutcome};
use crate::audio::{is_playable_name, OutputGain, OutputSink};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::storage::{StorageEntry, StorageReader};
use sdstream_common::events::{EventBus, PlayerEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was playing or queued
    NotActive,
    Stopped,
    /// The producer did not confirm within the stop timeout. The player is
    /// treated as stopped; the producer still honors the request later.
    TimedOut,
}

/// Wakes the producer thread early when a request arrives
#[derive(Debug, Default)]
struct ProducerWake {
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl ProducerWake {
    fn notify(&self) {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cv.notify_one();
    }

    fn wait(&self, timeout: Duration) {
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        if !*signaled {
            signaled = match self.cv.wait_timeout(signaled, timeout) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *signaled = false;
    }
}

pub struct Engine {
    config: PlayerConfig,
    players: Vec<Arc<Player>>,
    storage: Arc<dyn StorageReader>,
    events: EventBus,
    gain: OutputGain,
    wake: Arc<ProducerWake>,
    running: Arc<AtomicBool>,
    producer: Mutex<Option<JoinHandle<()>>>,
    output: Mutex<Option<JoinHandle<Vec<PlaybackConsumer>>>>,
}

impl Engine {
    /// Build the player slots and start the producer and output threads.
    ///
    /// `sinks` supplies one output sink per slot.
    pub fn start(
        config: PlayerConfig,
        storage: Arc<dyn StorageReader>,
        sinks: Vec<Box<dyn OutputSink>>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;
        if sinks.len() != config.players {
            return Err(Error::Config(format!(
                "{} output sinks for {} players",
                sinks.len(),
                config.players
            )));
        }

        let gain = OutputGain::new(config.gain);
        let players: Vec<Arc<Player>> = (0..config.players)
            .map(|slot| Arc::new(Player::new(slot, &config)))
            .collect();

        let schedulers: Vec<FillScheduler> = players
            .iter()
            .map(|p| FillScheduler::new(Arc::clone(p), Arc::clone(&storage), config.clone(), events.clone()))
            .collect();
        let consumers: Vec<PlaybackConsumer> = players
            .iter()
            .zip(sinks)
            .map(|(p, sink)| PlaybackConsumer::new(Arc::clone(p), sink, gain.clone(), config.chunk_size))
            .collect();

        let wake = Arc::new(ProducerWake::default());
        let running = Arc::new(AtomicBool::new(true));

        let producer = {
            let wake = Arc::clone(&wake);
            let running = Arc::clone(&running);
            let idle_wait = config.tick_interval();
            thread::Builder::new()
                .name("sdstream-producer".to_string())
                .spawn(move || run_producer(schedulers, wake, running, idle_wait))?
        };

        let output = {
            let running = Arc::clone(&running);
            let period = config.chunk_period();
            thread::Builder::new()
                .name("sdstream-output".to_string())
                .spawn(move || run_output(consumers, running, period))?
        };

        info!(
            "Engine started: {} player(s), ring {} samples, chunk {} samples every {:?}",
            config.players,
            config.ring_capacity,
            config.chunk_size,
            config.chunk_period()
        );

        Ok(Self {
            config,
            players,
            storage,
            events,
            gain,
            wake,
            running,
            producer: Mutex::new(Some(producer)),
            output: Mutex::new(Some(output)),
        })
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn player(&self, slot: usize) -> Result<&Arc<Player>> {
        self.players.get(slot).ok_or_else(|| {
            Error::InvalidState(format!(
                "No player slot {} (valid: 0..{})",
                slot,
                self.players.len()
            ))
        })
    }

    /// Start streaming `name` on `slot`.
    ///
    /// A stream already running on the slot is stopped first; the wait is
    /// bounded by the stop timeout. The new request is queued behind the
    /// stop, so the producer never reuses buffers before the old stream is
    /// detached.
    pub fn play(&self, slot: usize, name: &str) -> Result<()> {
        let player = self.player(slot)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(sdstream_common::Error::InvalidInput("Empty resource name".to_string()).into());
        }

        if player.state().is_active() || player.has_pending() {
            if self.stop(slot)? == StopOutcome::TimedOut {
                warn!("Player {}: previous stream still stopping, queueing {}", slot, name);
            }
        }

        player.set_pending(name.to_string());
        self.wake.notify();
        info!("Player {}: play {}", slot, name);
        Ok(())
    }

    /// Stop `slot` and wait (bounded) for the producer to detach the stream.
    ///
    /// A no-op on a player that is idle, finished, or failed.
    pub fn stop(&self, slot: usize) -> Result<StopOutcome> {
        let player = self.player(slot)?;
        let cancelled = player.cancel_pending();
        if !player.state().is_active() {
            if cancelled {
                // the producer never saw the request, so nothing to stop
                return Ok(StopOutcome::Stopped);
            }
            return Ok(StopOutcome::NotActive);
        }

        debug!("Player {}: stop requested", slot);
        player.request_stop();
        self.wake.notify();

        let started = Instant::now();
        let timeout = self.config.stop_timeout();
        if player.wait_settled(timeout) {
            Ok(StopOutcome::Stopped)
        } else {
            let waited_ms = started.elapsed().as_millis() as u64;
            warn!(
                "Player {}: stop not confirmed after {} ms, treating as stopped",
                slot, waited_ms
            );
            self.events.emit(PlayerEvent::StopTimedOut { slot, waited_ms });
            Ok(StopOutcome::TimedOut)
        }
    }

    pub fn stop_all(&self) -> Result<Vec<StopOutcome>> {
        (0..self.players.len()).map(|slot| self.stop(slot)).collect()
    }

    pub fn status(&self, slot: usize) -> Result<PlayerStatus> {
        Ok(self.player(slot)?.status())
    }

    pub fn statuses(&self) -> Vec<PlayerStatus> {
        self.players.iter().map(|p| p.status()).collect()
    }

    /// Playable resources in storage
    pub fn list(&self) -> Result<Vec<StorageEntry>> {
        Ok(self
            .storage
            .list()?
            .into_iter()
            .filter(|entry| is_playable_name(&entry.name))
            .collect())
    }

    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
        debug!("Gain set to {:.2}", self.gain.get());
    }

    /// Stop every stream, join both threads, and finish the sinks.
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down engine");
        let consumers = self.stop_threads();

        let mut result = Ok(());
        for consumer in consumers {
            if let Err(e) = consumer.finish() {
                error!("Failed to finish output sink: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn stop_threads(&self) -> Vec<PlaybackConsumer> {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify();

        let producer = self.producer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = producer {
            if handle.join().is_err() {
                error!("Producer thread panicked");
            }
        }

        let output = self.output.lock().unwrap_or_else(PoisonError::into_inner).take();
        match output.map(|handle| handle.join()) {
            Some(Ok(consumers)) => consumers,
            Some(Err(_)) => {
                error!("Output thread panicked");
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

fn run_producer(
    mut schedulers: Vec<FillScheduler>,
    wake: Arc<ProducerWake>,
    running: Arc<AtomicBool>,
    idle_wait: Duration,
) {
    debug!("Producer thread started");
    while running.load(Ordering::SeqCst) {
        let mut busy = false;
        for scheduler in schedulers.iter_mut() {
            busy |= scheduler.tick() == TickOutcome::Busy;
        }
        if !busy {
            wake.wait(idle_wait);
        }
    }

    for scheduler in schedulers.iter_mut() {
        scheduler.shutdown();
    }
    debug!("Producer thread stopped");
}

fn run_output(
    mut consumers: Vec<PlaybackConsumer>,
    running: Arc<AtomicBool>,
    period: Duration,
) -> Vec<PlaybackConsumer> {
    let mut next = Instant::now();
    while running.load(Ordering::SeqCst) {
        for consumer in consumers.iter_mut() {
            consumer.tick();
        }

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else if now - next > period * 8 {
            // fell far behind; restart the cadence instead of bursting
            next = now;
        }
    }
    consumers
}
