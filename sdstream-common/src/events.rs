//! Event types for the sdstream event system
//!
//! Events are emitted by the producer context only (the fill scheduler and the
//! engine control surface). The real-time output context never emits events;
//! it only bumps counters that show up in status snapshots.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default capacity of the event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Lifecycle state of one player slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStateKind {
    Idle,
    Opening,
    Streaming,
    Stopping,
    Finished,
    Error,
}

impl PlayerStateKind {
    /// True while the player owns an open stream (or is about to)
    pub fn is_active(self) -> bool {
        matches!(self, Self::Opening | Self::Streaming | Self::Stopping)
    }
}

impl std::fmt::Display for PlayerStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
            Self::Finished => "finished",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// sdstream event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Player slot changed lifecycle state
    StateChanged {
        slot: usize,
        stream_id: Option<Uuid>,
        old_state: PlayerStateKind,
        new_state: PlayerStateKind,
    },

    /// Stream format established (from the container header or first decoded frame)
    FormatDetected {
        slot: usize,
        stream_id: Uuid,
        sample_rate: u32,
        channels: u16,
        bitrate_kbps: u32,
    },

    /// Stream played to the end
    StreamFinished {
        slot: usize,
        stream_id: Uuid,
        name: String,
        frames_decoded: u64,
        underruns: u64,
    },

    /// Stream failed to open, validate or read
    StreamFailed {
        slot: usize,
        stream_id: Uuid,
        name: String,
        reason: String,
    },

    /// A caller gave up waiting for a stop to complete
    StopTimedOut { slot: usize, waited_ms: u64 },
}

/// Broadcast bus for player events
///
/// Cloning the bus is cheap; all clones feed the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
