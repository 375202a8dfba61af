//! Core audio data types
//!
//! Decoded frames, stream format metadata, and container detection shared by
//! the decoders and the playback pipeline.

use serde::Serialize;
use std::path::Path;

/// Stream format captured from the first decoded frame or a parsed header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FormatInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
}

/// One decoded frame as returned by a [`FrameDecoder`](super::FrameDecoder)
///
/// Samples are interleaved when `channels > 1`. `consumed_bytes` is how much
/// of the staged input the frame occupied, header included.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
    pub consumed_bytes: usize,
}

impl DecodedFrame {
    pub fn format(&self) -> FormatInfo {
        FormatInfo {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bitrate_kbps: self.bitrate_kbps,
        }
    }

    /// Sample frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        match self.channels {
            0 => 0,
            n => self.samples.len() / n as usize,
        }
    }
}

/// Mix interleaved samples down to mono by arithmetic mean.
///
/// The sum is taken in i32 and divided with truncation toward zero, so
/// `(-3 + 0) / 2 == -1`. A trailing partial frame is ignored.
pub fn downmix_to_mono(interleaved: &[i16], channels: u16) -> Vec<i16> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.to_vec(),
        2 => interleaved
            .chunks_exact(2)
            .map(|lr| ((lr[0] as i32 + lr[1] as i32) / 2) as i16)
            .collect(),
        n => interleaved
            .chunks_exact(n as usize)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / n as i32) as i16
            })
            .collect(),
    }
}

/// How a resource's bytes are turned into samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// Raw MPEG audio frames, located by resynchronization
    Mp3,
    /// RIFF/WAVE header followed by 16-bit PCM
    Wav,
}

impl ContainerKind {
    /// Pick a container from the file extension, falling back to sniffing
    /// the first staged bytes. Unknown data is handed to the MP3 path.
    pub fn detect(name: &str, first_bytes: &[u8]) -> Self {
        match extension(name).as_deref() {
            Some("wav") => ContainerKind::Wav,
            Some("mp3") => ContainerKind::Mp3,
            _ if first_bytes.starts_with(b"RIFF") => ContainerKind::Wav,
            _ => ContainerKind::Mp3,
        }
    }
}

/// File names the console offers for playback
pub fn is_playable_name(name: &str) -> bool {
    matches!(extension(name).as_deref(), Some("mp3") | Some("wav"))
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
