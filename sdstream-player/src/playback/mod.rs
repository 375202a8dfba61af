//! Streaming pipeline
//!
//! Storage -> staging buffer -> decoder adapter -> ring buffer -> consumer -> sink,
//! one pipeline per player slot, hosted by the [`Engine`].

pub mod consumer;
pub mod decoder_adapter;
pub mod engine;
pub mod player;
pub mod ring_buffer;
pub mod scheduler;
pub mod staging;

pub use consumer::{Delivery, PlaybackConsumer};
pub use decoder_adapter::{DecodeStep, DecoderAdapter};
pub use engine::{Engine, StopOutcome};
pub use player::{Player, PlayerCounters, PlayerStatus, StreamInfo};
pub use ring_buffer::{Pop, RingBuffer, RingBufferStats};
pub use scheduler::{FillScheduler, TickOutcome};
pub use staging::StagingBuffer;
