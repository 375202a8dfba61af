//! Audio device output using cpal
//!
//! Each player slot gets a [`DeviceSink`] backed by a lock-free `ringbuf`
//! queue. The cpal callback drains every queue, sums the slots with
//! saturation, and writes the mono mix to all device channels. A queue with
//! no room reports `is_full`, which makes the consumer skip its cycle.

use super::output::OutputSink;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Output chunks buffered per slot between the consumer and the callback
const QUEUE_CHUNKS: usize = 4;

/// Producer half handed to a player's consumer
pub struct DeviceSink {
    queue: HeapProd<i16>,
    chunk_size: usize,
    anti_pop: bool,
    dropped: u64,
}

impl DeviceSink {
    fn new(queue: HeapProd<i16>, chunk_size: usize, anti_pop: bool) -> Self {
        Self {
            queue,
            chunk_size,
            anti_pop,
            dropped: 0,
        }
    }

    /// Samples that did not fit the queue
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl OutputSink for DeviceSink {
    fn is_full(&self) -> bool {
        self.queue.vacant_len() < self.chunk_size
    }

    fn write(&mut self, chunk: &[i16]) {
        let pushed = self.queue.push_slice(chunk);
        if pushed < chunk.len() {
            let short = chunk.len() - pushed;
            self.dropped += short as u64;
            warn!("Device queue full, dropped {} samples ({} total)", short, self.dropped);
        }
    }

    fn powers_down_on_silence(&self) -> bool {
        self.anti_pop
    }
}

/// Running cpal output stream; must stay alive for playback to continue
pub struct DeviceOutput {
    stream: Stream,
    device_name: String,
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

impl DeviceOutput {
    /// Open the default output device and create one sink per player.
    pub fn open(
        players: usize,
        sample_rate: u32,
        chunk_size: usize,
        anti_pop: bool,
    ) -> Result<(Self, Vec<DeviceSink>)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using default audio device: {}", device_name);

        let default_config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to query device config: {}", e)))?;
        let sample_format = default_config.sample_format();
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            sample_rate, config.channels, sample_format
        );

        let mut sinks = Vec::with_capacity(players);
        let mut queues = Vec::with_capacity(players);
        for _ in 0..players {
            let (prod, cons) = HeapRb::<i16>::new(chunk_size * QUEUE_CHUNKS).split();
            sinks.push(DeviceSink::new(prod, chunk_size, anti_pop));
            queues.push(cons);
        }

        let error_flag = Arc::new(AtomicBool::new(false));
        let error_count = Arc::new(AtomicU32::new(0));
        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, queues, &error_flag, &error_count, |s| s)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &config, queues, &error_flag, &error_count, |s| {
                s as f32 / i16::MAX as f32
            })?,
            other => {
                return Err(Error::AudioOutput(format!("Unsupported sample format {:?}", other)));
            }
        };
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

        Ok((
            Self {
                stream,
                device_name,
                error_flag,
                error_count,
            },
            sinks,
        ))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    /// Pause the device stream
    pub fn stop(&self) -> Result<()> {
        info!("Stopping audio stream");
        self.stream
            .pause()
            .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut queues: Vec<HeapCons<i16>>,
    error_flag: &Arc<AtomicBool>,
    error_count: &Arc<AtomicU32>,
    convert: fn(i16) -> T,
) -> Result<Stream>
where
    T: cpal::SizedSample + Send + 'static,
{
    let channels = config.channels as usize;
    let error_flag = Arc::clone(error_flag);
    let error_count = Arc::clone(error_count);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let mixed: i32 = queues
                        .iter_mut()
                        .map(|queue| queue.try_pop().unwrap_or(0) as i32)
                        .sum();
                    let sample = convert(mixed.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_flag.store(true, Ordering::SeqCst);
                error_count.fetch_add(1, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}
