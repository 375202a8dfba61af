//! Output sinks
//!
//! The playback consumer hands each sink one fixed-size mono chunk per
//! cadence. Sinks must not block: a sink that cannot take another chunk
//! reports `is_full` and the consumer skips that cycle.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub trait OutputSink: Send {
    /// Back-pressure: the consumer skips the cycle instead of writing
    fn is_full(&self) -> bool {
        false
    }

    /// Accept one chunk of mono samples
    fn write(&mut self, chunk: &[i16]);

    /// The transport mutes itself on all-zero input, so silence is sent as 1
    fn powers_down_on_silence(&self) -> bool {
        false
    }

    /// Flush and release the sink. Called once at shutdown.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Global output gain shared by every player
///
/// Stored as f32 bits in an atomic so the real-time path never takes a lock.
#[derive(Debug, Clone)]
pub struct OutputGain {
    bits: Arc<AtomicU32>,
}

impl OutputGain {
    pub fn new(gain: f32) -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(gain.clamp(0.0, 1.0).to_bits())),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Values are clamped to 0.0..=1.0
    pub fn set(&self, gain: f32) {
        self.bits.store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn apply(&self, samples: &mut [i16]) {
        let gain = self.get();
        if gain >= 1.0 {
            return;
        }
        for sample in samples.iter_mut() {
            *sample = (*sample as f32 * gain) as i16;
        }
    }
}

impl Default for OutputGain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink {
    anti_pop: bool,
}

impl NullSink {
    pub fn new(anti_pop: bool) -> Self {
        Self { anti_pop }
    }
}

impl OutputSink for NullSink {
    fn write(&mut self, _chunk: &[i16]) {}

    fn powers_down_on_silence(&self) -> bool {
        self.anti_pop
    }
}

/// Records every chunk written; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    samples: Arc<Mutex<Vec<i16>>>,
    chunks: Arc<AtomicU32>,
    full: Arc<AtomicBool>,
    anti_pop: bool,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_anti_pop(mut self, anti_pop: bool) -> Self {
        self.anti_pop = anti_pop;
        self
    }

    /// Simulate transport back-pressure
    pub fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::SeqCst);
    }

    pub fn samples(&self) -> Vec<i16> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunks.load(Ordering::SeqCst)
    }
}

impl OutputSink for CaptureSink {
    fn is_full(&self) -> bool {
        self.full.load(Ordering::SeqCst)
    }

    fn write(&mut self, chunk: &[i16]) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
        self.chunks.fetch_add(1, Ordering::SeqCst);
    }

    fn powers_down_on_silence(&self) -> bool {
        self.anti_pop
    }
}

/// Renders the output to a mono 16-bit WAV file using hound
pub struct WavFileSink {
    writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>,
    write_error: Option<hound::Error>,
}

impl WavFileSink {
    pub fn create(path: &std::path::Path, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec).map_err(|e| {
            Error::AudioOutput(format!("Failed to create {}: {}", path.display(), e))
        })?;
        Ok(Self {
            writer: Some(writer),
            write_error: None,
        })
    }
}

impl OutputSink for WavFileSink {
    fn write(&mut self, chunk: &[i16]) {
        if self.write_error.is_some() {
            return;
        }
        if let Some(writer) = self.writer.as_mut() {
            for &sample in chunk {
                if let Err(e) = writer.write_sample(sample) {
                    self.write_error = Some(e);
                    return;
                }
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(e) = self.write_error.take() {
            return Err(Error::AudioOutput(format!("WAV write failed: {}", e)));
        }
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| Error::AudioOutput(format!("Failed to finalize WAV: {}", e)))?;
        }
        Ok(())
    }
}
