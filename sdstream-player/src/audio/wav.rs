//! RIFF/WAVE header parser
//!
//! Push-style state machine fed from the staging buffer:
//! `ReadMagic -> ReadFormatChunk -> LocateDataChunk -> Ready`.
//! Each `feed` call consumes as many bytes as it can and reports how many, so
//! the caller can compact the staging buffer and refill before the next call.
//! Unknown chunks are skipped by their declared length (plus the pad byte for
//! odd sizes) even when they span several feeds.

use crate::error::{Error, Result};
use tracing::debug;

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const FMT_BODY_LEN: usize = 16;

/// WAVE_FORMAT_EXTENSIBLE body: 16 base bytes, cbSize, valid bits, channel mask, subformat GUID
const FMT_EXTENSIBLE_LEN: usize = 40;

const FORMAT_PCM: u16 = 1;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavState {
    ReadMagic,
    ReadFormatChunk,
    LocateDataChunk,
    Ready,
}

/// Contents of the `fmt ` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    /// Data chunk bytes per millisecond of audio
    pub fn bytes_per_milli(&self) -> u32 {
        (self.byte_rate / 1000).max(1)
    }
}

/// Everything needed to start streaming the data chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format: WavFormat,
    pub data_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseProgress {
    NeedMoreData,
    Ready(WavHeader),
}

#[derive(Debug)]
pub struct WavParser {
    state: WavState,
    format: Option<WavFormat>,
    skip_remaining: u64,
    data_length: u32,
}

impl Default for WavParser {
    fn default() -> Self {
        Self::new()
    }
}

impl WavParser {
    pub fn new() -> Self {
        Self {
            state: WavState::ReadMagic,
            format: None,
            skip_remaining: 0,
            data_length: 0,
        }
    }

    pub fn state(&self) -> WavState {
        self.state
    }

    /// Consume header bytes from the front of `bytes`.
    ///
    /// Returns the number of bytes consumed and whether the header is
    /// complete. Validation failures are `Error::Format`.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(usize, ParseProgress)> {
        let mut consumed = 0;

        loop {
            if self.skip_remaining > 0 {
                let skip = self.skip_remaining.min((bytes.len() - consumed) as u64);
                consumed += skip as usize;
                self.skip_remaining -= skip;
                if self.skip_remaining > 0 {
                    return Ok((consumed, ParseProgress::NeedMoreData));
                }
            }

            let rest = &bytes[consumed..];
            match self.state {
                WavState::ReadMagic => {
                    if rest.len() < RIFF_HEADER_LEN {
                        return Ok((consumed, ParseProgress::NeedMoreData));
                    }
                    if &rest[0..4] != b"RIFF" {
                        return Err(Error::Format("Missing RIFF magic".to_string()));
                    }
                    if &rest[8..12] != b"WAVE" {
                        return Err(Error::Format("RIFF container is not WAVE".to_string()));
                    }
                    consumed += RIFF_HEADER_LEN;
                    self.state = WavState::ReadFormatChunk;
                }

                WavState::ReadFormatChunk => {
                    let Some((id, length)) = chunk_header(rest) else {
                        return Ok((consumed, ParseProgress::NeedMoreData));
                    };
                    match &id {
                        b"fmt " => {
                            if rest.len() < CHUNK_HEADER_LEN + 2 {
                                return Ok((consumed, ParseProgress::NeedMoreData));
                            }
                            let body_len = match read_u16(&rest[8..10]) {
                                FORMAT_EXTENSIBLE => FMT_EXTENSIBLE_LEN,
                                _ => FMT_BODY_LEN,
                            };
                            if (length as usize) < body_len {
                                return Err(Error::Format(format!(
                                    "fmt chunk too short ({} bytes)",
                                    length
                                )));
                            }
                            if rest.len() < CHUNK_HEADER_LEN + body_len {
                                return Ok((consumed, ParseProgress::NeedMoreData));
                            }
                            let body = &rest[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + body_len];
                            let format = parse_fmt_body(body)?;
                            debug!(
                                "WAV format: {} Hz, {} ch, {} bit, {} B/s",
                                format.sample_rate,
                                format.channels,
                                format.bits_per_sample,
                                format.byte_rate
                            );
                            self.format = Some(format);
                            consumed += CHUNK_HEADER_LEN + body_len;
                            self.skip_remaining = padded(length) - body_len as u64;
                            self.state = WavState::LocateDataChunk;
                        }
                        b"data" => {
                            return Err(Error::Format("data chunk before fmt chunk".to_string()));
                        }
                        _ => {
                            debug!("Skipping {} chunk ({} bytes)", String::from_utf8_lossy(&id), length);
                            consumed += CHUNK_HEADER_LEN;
                            self.skip_remaining = padded(length);
                        }
                    }
                }

                WavState::LocateDataChunk => {
                    let Some((id, length)) = chunk_header(rest) else {
                        return Ok((consumed, ParseProgress::NeedMoreData));
                    };
                    consumed += CHUNK_HEADER_LEN;
                    if &id == b"data" {
                        self.data_length = length;
                        self.state = WavState::Ready;
                    } else {
                        debug!("Skipping {} chunk ({} bytes)", String::from_utf8_lossy(&id), length);
                        self.skip_remaining = padded(length);
                    }
                }

                WavState::Ready => {
                    let format = self
                        .format
                        .ok_or_else(|| Error::Format("No fmt chunk".to_string()))?;
                    return Ok((
                        consumed,
                        ParseProgress::Ready(WavHeader {
                            format,
                            data_length: self.data_length,
                        }),
                    ));
                }
            }
        }
    }

    /// Error to report when the stream ends before the header completed
    pub fn truncated_error(&self) -> Error {
        match self.state {
            WavState::LocateDataChunk => Error::Format("No data chunk before end of stream".to_string()),
            _ => Error::Format("Truncated WAV header".to_string()),
        }
    }
}

fn chunk_header(bytes: &[u8]) -> Option<([u8; 4], u32)> {
    if bytes.len() < CHUNK_HEADER_LEN {
        return None;
    }
    let id = [bytes[0], bytes[1], bytes[2], bytes[3]];
    Some((id, read_u32(&bytes[4..8])))
}

/// RIFF chunks are word aligned
fn padded(length: u32) -> u64 {
    length as u64 + (length & 1) as u64
}

fn parse_fmt_body(body: &[u8]) -> Result<WavFormat> {
    let format_tag = match read_u16(&body[0..2]) {
        // the first two GUID bytes carry the real format tag
        FORMAT_EXTENSIBLE => read_u16(&body[24..26]),
        tag => tag,
    };
    let format = WavFormat {
        format_tag,
        channels: read_u16(&body[2..4]),
        sample_rate: read_u32(&body[4..8]),
        byte_rate: read_u32(&body[8..12]),
        block_align: read_u16(&body[12..14]),
        bits_per_sample: read_u16(&body[14..16]),
    };

    if format.format_tag != FORMAT_PCM {
        return Err(Error::Format(format!(
            "Unsupported encoding (format tag {}), only PCM is supported",
            format.format_tag
        )));
    }
    if !(1..=2).contains(&format.channels) {
        return Err(Error::Format(format!("Unsupported channel count {}", format.channels)));
    }
    if format.bits_per_sample != 16 {
        return Err(Error::Format(format!(
            "Unsupported bit depth {}, only 16-bit is supported",
            format.bits_per_sample
        )));
    }
    if format.sample_rate == 0 {
        return Err(Error::Format("Sample rate is zero".to_string()));
    }
    if format.block_align != format.channels * 2 {
        return Err(Error::Format(format!(
            "Block align {} does not match {} channel(s) of 16-bit samples",
            format.block_align, format.channels
        )));
    }
    if format.byte_rate as u64 != format.sample_rate as u64 * format.block_align as u64 {
        return Err(Error::Format(format!(
            "Byte rate {} does not match {} Hz x {} bytes",
            format.byte_rate, format.sample_rate, format.block_align
        )));
    }
    Ok(format)
}

fn read_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn fmt_body(tag: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let align = channels * bits / 8;
        let mut out = Vec::new();
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * align as u32).to_le_bytes());
        out.extend_from_slice(&align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out
    }

    fn wav(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_minimal_header() {
        let bytes = wav(&[chunk(b"fmt ", &fmt_body(1, 1, 44100, 16)), chunk(b"data", &[1, 0, 2, 0])]);
        let mut parser = WavParser::new();

        let (consumed, progress) = parser.feed(&bytes).unwrap();
        assert_eq!(consumed, 44);
        match progress {
            ParseProgress::Ready(header) => {
                assert_eq!(header.data_length, 4);
                assert_eq!(header.format.sample_rate, 44100);
                assert_eq!(header.format.channels, 1);
                assert_eq!(header.format.bytes_per_milli(), 88);
            }
            other => panic!("expected Ready, got {:?}", other),
        }
        assert_eq!(parser.state(), WavState::Ready);
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = wav(&[
            chunk(b"JUNK", &[9; 5]),
            chunk(b"fmt ", &fmt_body(1, 2, 22050, 16)),
            chunk(b"LIST", &[7; 30]),
            chunk(b"data", &[0; 8]),
        ]);
        let mut parser = WavParser::new();
        let mut pending = Vec::new();
        let mut header = None;

        for &b in &bytes {
            pending.push(b);
            let (consumed, progress) = parser.feed(&pending).unwrap();
            pending.drain(..consumed);
            if let ParseProgress::Ready(h) = progress {
                header = Some(h);
                break;
            }
        }

        let header = header.expect("header should complete");
        assert_eq!(header.format.channels, 2);
        assert_eq!(header.data_length, 8);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_extended_fmt_chunk_is_skipped() {
        let mut body = fmt_body(1, 1, 8000, 16);
        body.extend_from_slice(&[0, 0]);
        let bytes = wav(&[chunk(b"fmt ", &body), chunk(b"data", &[0; 2])]);

        let (_, progress) = WavParser::new().feed(&bytes).unwrap();
        assert!(matches!(progress, ParseProgress::Ready(h) if h.format.sample_rate == 8000));
    }

    #[test]
    fn test_extensible_pcm_accepted() {
        let mut body = fmt_body(FORMAT_EXTENSIBLE, 2, 48000, 16);
        body.extend_from_slice(&22u16.to_le_bytes());
        body.extend_from_slice(&16u16.to_le_bytes());
        body.extend_from_slice(&3u32.to_le_bytes());
        body.extend_from_slice(&FORMAT_PCM.to_le_bytes());
        body.extend_from_slice(&[0u8; 14]);
        let bytes = wav(&[chunk(b"fmt ", &body), chunk(b"data", &[0; 4])]);

        let (consumed, progress) = WavParser::new().feed(&bytes).unwrap();
        assert_eq!(consumed, bytes.len() - 4);
        match progress {
            ParseProgress::Ready(header) => {
                assert_eq!(header.format.format_tag, FORMAT_PCM);
                assert_eq!(header.format.sample_rate, 48000);
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_extensible_float_rejected() {
        let mut body = fmt_body(FORMAT_EXTENSIBLE, 1, 48000, 16);
        body.extend_from_slice(&[22, 0, 16, 0, 4, 0, 0, 0, 3, 0]);
        body.extend_from_slice(&[0u8; 14]);
        let bytes = wav(&[chunk(b"fmt ", &body), chunk(b"data", &[])]);
        assert!(matches!(WavParser::new().feed(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = wav(&[]);
        bytes[0] = b'X';
        assert!(matches!(WavParser::new().feed(&bytes), Err(Error::Format(_))));

        let mut bytes = wav(&[]);
        bytes[8..12].copy_from_slice(b"AVI ");
        assert!(matches!(WavParser::new().feed(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_rejects_unsupported_formats() {
        let cases = [
            fmt_body(3, 1, 44100, 32),
            fmt_body(2, 1, 44100, 16),
            fmt_body(1, 6, 44100, 16),
            fmt_body(1, 1, 44100, 8),
        ];
        for body in cases {
            let bytes = wav(&[chunk(b"fmt ", &body), chunk(b"data", &[])]);
            assert!(matches!(WavParser::new().feed(&bytes), Err(Error::Format(_))));
        }
    }

    #[test]
    fn test_rejects_inconsistent_rates() {
        let mut huge_rate = fmt_body(1, 1, 44100, 16);
        huge_rate[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut bad_align = fmt_body(1, 2, 44100, 16);
        bad_align[12..14].copy_from_slice(&2u16.to_le_bytes());

        for body in [huge_rate, bad_align] {
            let bytes = wav(&[chunk(b"fmt ", &body), chunk(b"data", &[0; 4])]);
            match WavParser::new().feed(&bytes) {
                Err(Error::Format(reason)) => {
                    assert!(reason.contains("does not match"), "reason: {}", reason)
                }
                other => panic!("expected format error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_missing_data_chunk() {
        let bytes = wav(&[chunk(b"fmt ", &fmt_body(1, 1, 44100, 16)), chunk(b"LIST", &[0; 4])]);
        let mut parser = WavParser::new();

        let (consumed, progress) = parser.feed(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(progress, ParseProgress::NeedMoreData);
        assert_eq!(parser.state(), WavState::LocateDataChunk);
        assert!(parser.truncated_error().to_string().contains("No data chunk"));
    }

    #[test]
    fn test_data_before_fmt() {
        let bytes = wav(&[chunk(b"data", &[0; 4])]);
        assert!(matches!(WavParser::new().feed(&bytes), Err(Error::Format(_))));
    }
}
