//! sdstream-player configuration
//!
//! Settings come from the `[player]` table of the TOML config file, with
//! command-line overrides applied by the binary. Every field has a built-in
//! default tuned for slow SD-card storage (32K-sample ring, 8 KiB
//! compressed staging, 2 KiB storage reads, 128-sample output chunks).

use crate::error::{Error, Result};
use sdstream_common::config::{read_config_file, LoggingConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Whole config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Media root folder (see `RootFolderResolver` for priority rules)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub player: PlayerConfig,
}

impl FileConfig {
    /// Parse a config file. Missing `[player]` keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = read_config_file(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.player.validate()?;
        Ok(config)
    }
}

/// Streaming pipeline tuning for every player slot
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Decoded mono samples held per player
    pub ring_capacity: usize,

    /// Compressed bytes staged per player
    pub staging_capacity: usize,

    /// Maximum bytes requested from storage per refill
    pub read_chunk: usize,

    /// Samples delivered to the sink per output cadence
    pub chunk_size: usize,

    /// Output sample rate (Hz); sets the cadence period
    pub sample_rate: u32,

    /// Producer pauses decoding once the ring is this full (percent of capacity)
    pub high_watermark_percent: u8,

    /// How long a stop request waits for the producer before giving up
    pub stop_timeout_ms: u64,

    /// Producer idle wait between scheduler passes
    pub tick_interval_ms: u64,

    /// Number of independent player slots
    pub players: usize,

    /// Global output gain (0.0 - 1.0)
    pub gain: f32,

    /// Emit 1 instead of 0 for silence (keeps DACs that mute on zero awake)
    pub anti_pop_silence: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 32768,
            staging_capacity: 8192,
            read_chunk: 2048,
            chunk_size: 128,
            sample_rate: 44100,
            high_watermark_percent: 75,
            stop_timeout_ms: 2000,
            tick_interval_ms: 1,
            players: 1,
            gain: 1.0,
            anti_pop_silence: true,
        }
    }
}

impl PlayerConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity == 0 || self.staging_capacity == 0 {
            return Err(Error::Config("Buffer capacities must be non-zero".to_string()));
        }
        if self.read_chunk == 0 || self.read_chunk > self.staging_capacity {
            return Err(Error::Config(format!(
                "read_chunk must be in 1..={} (staging_capacity)",
                self.staging_capacity
            )));
        }
        if self.chunk_size == 0 || self.chunk_size > self.ring_capacity {
            return Err(Error::Config(format!(
                "chunk_size must be in 1..={} (ring_capacity)",
                self.ring_capacity
            )));
        }
        if !(1..=100).contains(&self.high_watermark_percent) {
            return Err(Error::Config(
                "high_watermark_percent must be in 1..=100".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".to_string()));
        }
        if self.players == 0 {
            return Err(Error::Config("players must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.gain) {
            return Err(Error::Config("gain must be in 0.0..=1.0".to_string()));
        }
        Ok(())
    }

    /// Ring occupancy at which the producer stops decoding
    pub fn high_watermark(&self) -> usize {
        self.ring_capacity * self.high_watermark_percent as usize / 100
    }

    /// Wall-clock length of one output chunk
    pub fn chunk_period(&self) -> Duration {
        Duration::from_nanos(self.chunk_size as u64 * 1_000_000_000 / self.sample_rate as u64)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
