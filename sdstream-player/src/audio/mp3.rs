//! MPEG audio Layer III frame decoder using symphonia
//!
//! The frame header at offset 0 is parsed here to find the frame length; the
//! frame body is then handed to symphonia's MPEG audio decoder as a single
//! packet. Anything that is not a complete Layer III frame reports `NoFrame`
//! so the caller can slide forward one byte and try again.

use super::decoder::{DecodeOutcome, FrameDecoder};
use super::types::DecodedFrame;
use crate::error::{Error, Result};
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::formats::Packet;
use symphonia::default::codecs::MpaDecoder;
use tracing::{debug, trace};

/// Frame header is 4 bytes
pub const HEADER_LEN: usize = 4;

const BITRATES_MPEG1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_MPEG2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLE_RATES_MPEG1: [u32; 3] = [44100, 48000, 32000];
const SAMPLE_RATES_MPEG2: [u32; 3] = [22050, 24000, 16000];
const SAMPLE_RATES_MPEG25: [u32; 3] = [11025, 12000, 8000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// Parsed MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channels: u16,
}

impl FrameHeader {
    /// Parse a Layer III header from the first four bytes.
    ///
    /// Free-format and reserved bitrate indices, reserved sample-rate
    /// indices, and other layers are rejected.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        if bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };

        // Layer bits: 01 = Layer III
        if (bytes[1] >> 1) & 0x03 != 0x01 {
            return None;
        }

        let bitrate_index = (bytes[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let bitrate_kbps = match version {
            MpegVersion::Mpeg1 => BITRATES_MPEG1_L3[bitrate_index],
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => BITRATES_MPEG2_L3[bitrate_index],
        };

        let rate_index = ((bytes[2] >> 2) & 0x03) as usize;
        if rate_index == 3 {
            return None;
        }
        let sample_rate = match version {
            MpegVersion::Mpeg1 => SAMPLE_RATES_MPEG1[rate_index],
            MpegVersion::Mpeg2 => SAMPLE_RATES_MPEG2[rate_index],
            MpegVersion::Mpeg25 => SAMPLE_RATES_MPEG25[rate_index],
        };

        let padding = (bytes[2] >> 1) & 0x01 == 1;
        let channels = if (bytes[3] >> 6) == 0x03 { 1 } else { 2 };

        Some(Self {
            version,
            bitrate_kbps,
            sample_rate,
            padding,
            channels,
        })
    }

    /// Total frame length in bytes, header included
    pub fn frame_length(&self) -> usize {
        let coefficient = match self.version {
            MpegVersion::Mpeg1 => 144,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 72,
        };
        let body = coefficient * self.bitrate_kbps as usize * 1000 / self.sample_rate as usize;
        body + self.padding as usize
    }

    /// Decoded sample frames per MPEG frame
    pub fn samples_per_frame(&self) -> usize {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 576,
        }
    }
}

/// Decode primitive for MPEG audio Layer III streams
pub struct Mp3FrameDecoder {
    decoder: MpaDecoder,
    next_ts: u64,
}

impl Mp3FrameDecoder {
    pub fn new() -> Result<Self> {
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_MP3)
            .with_sample_rate(44100)
            .with_channels(Channels::FRONT_LEFT | Channels::FRONT_RIGHT);

        let decoder = MpaDecoder::try_new(&params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create MP3 decoder: {}", e)))?;

        Ok(Self { decoder, next_ts: 0 })
    }
}

impl FrameDecoder for Mp3FrameDecoder {
    fn decode(&mut self, bytes: &[u8], end_of_stream: bool) -> DecodeOutcome {
        let header = match FrameHeader::parse(bytes) {
            Some(header) => header,
            None if bytes.len() < HEADER_LEN && !end_of_stream => return DecodeOutcome::NeedMoreData,
            None => return DecodeOutcome::NoFrame,
        };

        let length = header.frame_length();
        if bytes.len() < length {
            return if end_of_stream {
                DecodeOutcome::NoFrame
            } else {
                DecodeOutcome::NeedMoreData
            };
        }

        let duration = header.samples_per_frame() as u64;
        let packet = Packet::new_from_slice(0, self.next_ts, duration, &bytes[..length]);

        let samples = match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                buffer.samples().to_vec()
            }
            Err(e) => {
                trace!("Frame rejected by decoder: {}", e);
                return DecodeOutcome::NoFrame;
            }
        };

        self.next_ts += duration;
        if self.next_ts == duration {
            debug!(
                "First MP3 frame: {} Hz, {} ch, {} kbps, {} bytes",
                header.sample_rate, header.channels, header.bitrate_kbps, length
            );
        }

        DecodeOutcome::Frame(DecodedFrame {
            samples,
            sample_rate: header.sample_rate,
            channels: header.channels,
            bitrate_kbps: header.bitrate_kbps,
            consumed_bytes: length,
        })
    }
}
