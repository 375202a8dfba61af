//! Shared test fixtures
//!
//! WAV files are built in memory with hound so tests need no files on disk
//! unless they exercise the filesystem storage.

#![allow(dead_code)]

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::io::Cursor;

/// Standard test sample rate (44.1 kHz)
pub const TEST_SAMPLE_RATE: u32 = 44100;

/// MPEG1 Layer III, 128 kbps, 44100 Hz, joint stereo
pub const MP3_HEADER_128K: [u8; 4] = [0xFF, 0xFB, 0x90, 0x64];
pub const MP3_FRAME_LEN_128K: usize = 417;

/// Deterministic mono sine samples
pub fn sine_samples(count: usize, sample_rate: u32, frequency_hz: f32, amplitude: f32) -> Vec<i16> {
    (0..count)
        .map(|n| {
            let t = n as f32 / sample_rate as f32;
            ((2.0 * PI * frequency_hz * t).sin() * amplitude * i16::MAX as f32) as i16
        })
        .collect()
}

/// Encode interleaved 16-bit samples as a WAV file
pub fn wav_bytes(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Mono sine clip of `duration_ms` at the test sample rate
pub fn sine_wav(duration_ms: u64) -> (Vec<i16>, Vec<u8>) {
    let count = (TEST_SAMPLE_RATE as u64 * duration_ms / 1000) as usize;
    let samples = sine_samples(count, TEST_SAMPLE_RATE, 440.0, 0.5);
    let bytes = wav_bytes(&samples, 1, TEST_SAMPLE_RATE);
    (samples, bytes)
}

/// Bytes that never contain an MPEG frame sync
pub fn garbage(len: usize) -> Vec<u8> {
    (0..len).map(|i| if i % 2 == 0 { 0xFF } else { 0x00 }).collect()
}

/// Layer III frames with zeroed side info and main data (decode to silence)
pub fn silent_mp3_frames(count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count * MP3_FRAME_LEN_128K);
    for _ in 0..count {
        let mut frame = vec![0u8; MP3_FRAME_LEN_128K];
        frame[..4].copy_from_slice(&MP3_HEADER_128K);
        out.extend_from_slice(&frame);
    }
    out
}
