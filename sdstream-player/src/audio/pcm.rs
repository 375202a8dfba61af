//! PCM payload decoder for WAV data chunks
//!
//! 16-bit little-endian samples need no decode step; this adapter only cuts
//! the data chunk into frame-sized pieces so PCM streams share the same fill
//! path as compressed ones.

use super::decoder::{DecodeOutcome, FrameDecoder};
use super::types::{DecodedFrame, FormatInfo};

/// Sample frames delivered per decode call
pub const PCM_FRAME_SAMPLES: usize = 1152;

const BYTES_PER_SAMPLE: usize = 2;

pub struct PcmFrameDecoder {
    format: FormatInfo,
    block_align: usize,
    remaining: u64,
}

impl PcmFrameDecoder {
    /// `data_length` is the declared size of the data chunk; bytes past it
    /// (trailing chunks) are never played.
    pub fn new(sample_rate: u32, channels: u16, data_length: u64) -> Self {
        let block_align = BYTES_PER_SAMPLE * channels.max(1) as usize;
        let byte_rate = sample_rate as u64 * block_align as u64;
        Self {
            format: FormatInfo {
                sample_rate,
                channels,
                bitrate_kbps: (byte_rate * 8 / 1000) as u32,
            },
            block_align,
            remaining: data_length,
        }
    }

    /// Data chunk bytes not yet delivered
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl FrameDecoder for PcmFrameDecoder {
    fn decode(&mut self, bytes: &[u8], end_of_stream: bool) -> DecodeOutcome {
        if self.remaining < self.block_align as u64 {
            return DecodeOutcome::EndOfStream;
        }
        if bytes.len() < self.block_align {
            return if end_of_stream {
                DecodeOutcome::NoFrame
            } else {
                DecodeOutcome::NeedMoreData
            };
        }

        let limit = (PCM_FRAME_SAMPLES * self.block_align)
            .min(bytes.len())
            .min(self.remaining.min(usize::MAX as u64) as usize);
        let length = limit - limit % self.block_align;

        let samples = bytes[..length]
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        self.remaining -= length as u64;

        DecodeOutcome::Frame(DecodedFrame {
            samples,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            bitrate_kbps: self.format.bitrate_kbps,
            consumed_bytes: length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_mono_frame() {
        let bytes = le_bytes(&[1, -2, 300, i16::MIN]);
        let mut decoder = PcmFrameDecoder::new(44100, 1, bytes.len() as u64);

        match decoder.decode(&bytes, false) {
            DecodeOutcome::Frame(frame) => {
                assert_eq!(frame.samples, vec![1, -2, 300, i16::MIN]);
                assert_eq!(frame.consumed_bytes, 8);
                assert_eq!(frame.bitrate_kbps, 705);
            }
            other => panic!("expected a frame, got {:?}", other),
        }
        assert_eq!(decoder.decode(&[], false), DecodeOutcome::EndOfStream);
    }

    #[test]
    fn test_frames_are_bounded() {
        let bytes = vec![0u8; PCM_FRAME_SAMPLES * 4 + 100];
        let mut decoder = PcmFrameDecoder::new(44100, 2, bytes.len() as u64);

        match decoder.decode(&bytes, false) {
            DecodeOutcome::Frame(frame) => {
                assert_eq!(frame.frame_count(), PCM_FRAME_SAMPLES);
                assert_eq!(frame.consumed_bytes, PCM_FRAME_SAMPLES * 4);
            }
            other => panic!("expected a frame, got {:?}", other),
        }
        assert_eq!(decoder.remaining(), 100);
    }

    #[test]
    fn test_stops_at_data_length() {
        // data chunk declares 6 bytes; a trailing chunk follows
        let mut bytes = le_bytes(&[7, 8, 9]);
        bytes.extend_from_slice(b"LIST\x04\0\0\0abcd");
        let mut decoder = PcmFrameDecoder::new(8000, 1, 6);

        match decoder.decode(&bytes, true) {
            DecodeOutcome::Frame(frame) => assert_eq!(frame.samples, vec![7, 8, 9]),
            other => panic!("expected a frame, got {:?}", other),
        }
        assert_eq!(decoder.decode(&bytes[6..], true), DecodeOutcome::EndOfStream);
    }

    #[test]
    fn test_partial_sample_frame() {
        let mut decoder = PcmFrameDecoder::new(44100, 2, 100);
        assert_eq!(decoder.decode(&[1, 2, 3], false), DecodeOutcome::NeedMoreData);
        assert_eq!(decoder.decode(&[1, 2, 3], true), DecodeOutcome::NoFrame);
    }

    #[test]
    fn test_odd_trailing_byte_ends_stream() {
        let mut decoder = PcmFrameDecoder::new(44100, 1, 5);
        match decoder.decode(&[1, 0, 2, 0, 3], true) {
            DecodeOutcome::Frame(frame) => assert_eq!(frame.samples, vec![1, 2]),
            other => panic!("expected a frame, got {:?}", other),
        }
        assert_eq!(decoder.decode(&[3], true), DecodeOutcome::EndOfStream);
    }
}
