//! Audio primitives shared by the VAD gate, providers, and the transport.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Upstream (client → server) PCM sample rate at the VAD/STT boundary.
pub const UPSTREAM_SAMPLE_RATE_HZ: u32 = 16_000;

/// Default downstream (server → client) PCM sample rate.
pub const DOWNSTREAM_SAMPLE_RATE_HZ: u32 = 24_000;

/// PCM is 16-bit signed little-endian, mono.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Container/codec of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Pcm,
    Mp3,
    Ogg,
    Wav,
}

/// One chunk of synthesized or captured audio.
///
/// Encoded formats (mp3/ogg) are passed through to the transport untouched;
/// only PCM carries a meaningful sample rate for duration math.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Bytes,
    pub format: AudioFormat,
    pub sample_rate_hz: u32,
}

impl AudioChunk {
    pub fn pcm(data: Bytes, sample_rate_hz: u32) -> Self {
        Self {
            data,
            format: AudioFormat::Pcm,
            sample_rate_hz,
        }
    }
}

/// Duration of a mono 16-bit PCM buffer in milliseconds.
pub fn pcm_duration_ms(byte_len: usize, sample_rate_hz: u32) -> u64 {
    if sample_rate_hz == 0 {
        return 0;
    }
    let samples = (byte_len / BYTES_PER_SAMPLE) as u64;
    samples * 1000 / sample_rate_hz as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_second_of_upstream_pcm() {
        let bytes = UPSTREAM_SAMPLE_RATE_HZ as usize * BYTES_PER_SAMPLE;
        assert_eq!(pcm_duration_ms(bytes, UPSTREAM_SAMPLE_RATE_HZ), 1000);
    }

    #[test]
    fn zero_rate_does_not_divide_by_zero() {
        assert_eq!(pcm_duration_ms(32_000, 0), 0);
    }

    #[test]
    fn format_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&AudioFormat::Pcm).unwrap(), "\"pcm\"");
        assert_eq!(serde_json::to_string(&AudioFormat::Mp3).unwrap(), "\"mp3\"");
    }
}
