//! PCM audio format and the streaming WAV header.
//!
//! The receiver emits raw signed 16-bit little-endian PCM. Streaming
//! clients get a canonical 44-byte RIFF/WAVE header followed by the raw
//! samples. Because the stream is unbounded, both size fields carry
//! `0xFFFF_FFFF`, which players treat as "unknown length".

use serde::{Deserialize, Serialize};

/// Length of the canonical PCM WAV header.
pub const WAV_HEADER_LEN: usize = 44;

/// Size marker used for the RIFF and data chunk lengths of a live stream.
const UNKNOWN_LENGTH: u32 = 0xFFFF_FFFF;

/// Bytes per sample for S16_LE.
const BYTES_PER_SAMPLE: u16 = 2;

/// Highest sample rate accepted from configuration.
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Highest channel count accepted from configuration.
pub const MAX_CHANNELS: u16 = 8;

/// Sample layout of the PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Samples per second per channel
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,
}

impl AudioFormat {
    /// Receiver default: 8 kHz mono.
    pub const DEFAULT: AudioFormat = AudioFormat {
        sample_rate: 8000,
        channels: 1,
    };

    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Whether both fields lie within the configurable range.
    pub const fn is_supported(&self) -> bool {
        self.sample_rate > 0
            && self.sample_rate <= MAX_SAMPLE_RATE
            && self.channels > 0
            && self.channels <= MAX_CHANNELS
    }

    /// Bytes occupied by one sample frame (all channels).
    ///
    /// Saturates for layouts outside [`is_supported`](Self::is_supported).
    pub const fn block_align(&self) -> u16 {
        self.channels.saturating_mul(BYTES_PER_SAMPLE)
    }

    /// Bytes per second of audio.
    pub const fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(self.block_align() as u32)
    }

    /// Size of 100 ms of audio, the largest datagram read at once.
    ///
    /// 1600 bytes at the default format.
    pub const fn frame_bytes(&self) -> usize {
        (self.byte_rate() / 10) as usize
    }

    /// Builds the WAV header for an unbounded stream in this format.
    pub fn wav_header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(WAV_HEADER_LEN);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&UNKNOWN_LENGTH.to_le_bytes());
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
        header.extend_from_slice(&1u16.to_le_bytes()); // PCM
        header.extend_from_slice(&self.channels.to_le_bytes());
        header.extend_from_slice(&self.sample_rate.to_le_bytes());
        header.extend_from_slice(&self.byte_rate().to_le_bytes());
        header.extend_from_slice(&self.block_align().to_le_bytes());
        header.extend_from_slice(&(BYTES_PER_SAMPLE * 8).to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&UNKNOWN_LENGTH.to_le_bytes());
        header
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Drops a trailing odd byte so the payload holds whole 16-bit samples.
pub fn align_to_samples(data: &[u8]) -> &[u8] {
    let even = data.len() - data.len() % 2;
    data.get(..even).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(buf: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn test_default_frame_is_1600_bytes() {
        assert_eq!(AudioFormat::DEFAULT.frame_bytes(), 1600);
    }

    #[test]
    fn test_supported_range() {
        assert!(AudioFormat::DEFAULT.is_supported());
        assert!(AudioFormat::new(MAX_SAMPLE_RATE, MAX_CHANNELS).is_supported());
        assert!(!AudioFormat::new(8000, 40_000).is_supported());
        assert!(!AudioFormat::new(4_000_000_000, 1).is_supported());
        assert!(!AudioFormat::new(0, 1).is_supported());
    }

    #[test]
    fn test_oversized_format_saturates() {
        let format = AudioFormat::new(u32::MAX, u16::MAX);
        assert_eq!(format.block_align(), u16::MAX);
        assert_eq!(format.byte_rate(), u32::MAX);
        assert_eq!(format.frame_bytes(), (u32::MAX / 10) as usize);
        assert_eq!(format.wav_header().len(), WAV_HEADER_LEN);
    }

    #[test]
    fn test_wav_header_default_format() {
        let header = AudioFormat::DEFAULT.wav_header();
        assert_eq!(header.len(), WAV_HEADER_LEN);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32_at(&header, 4), 0xFFFF_FFFF);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(u32_at(&header, 16), 16);
        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u16_at(&header, 22), 1);
        assert_eq!(u32_at(&header, 24), 8000);
        assert_eq!(u32_at(&header, 28), 16000);
        assert_eq!(u16_at(&header, 32), 2);
        assert_eq!(u16_at(&header, 34), 16);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32_at(&header, 40), 0xFFFF_FFFF);
    }

    #[test]
    fn test_wav_header_stereo() {
        let header = AudioFormat::new(48_000, 2).wav_header();
        assert_eq!(u16_at(&header, 22), 2);
        assert_eq!(u32_at(&header, 24), 48_000);
        assert_eq!(u32_at(&header, 28), 192_000);
        assert_eq!(u16_at(&header, 32), 4);
    }

    #[test]
    fn test_align_to_samples() {
        assert_eq!(align_to_samples(&[1, 2, 3]), &[1, 2]);
        assert_eq!(align_to_samples(&[1, 2, 3, 4]), &[1, 2, 3, 4]);
        assert!(align_to_samples(&[9]).is_empty());
        assert!(align_to_samples(&[]).is_empty());
    }
}
