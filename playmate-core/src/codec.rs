//! PCM frame encoder and inbound chunk decoder.
//!
//! The outbound layout is a bit-exact contract: little-endian signed 16-bit
//! mono PCM at [`CAPTURE_SAMPLE_RATE`]. Float samples are scaled by 32768,
//! rounded to nearest and saturated into `i16` range, so out-of-range input
//! clamps instead of wrapping.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::buffering::{AudioFrame, PlaybackBuffer, CAPTURE_SAMPLE_RATE};
use crate::error::{PlaymateError, Result};

/// Encode one block of f32 samples into a wire-ready 16 kHz frame.
pub fn encode(samples: &[f32]) -> AudioFrame {
    encode_at(samples, CAPTURE_SAMPLE_RATE)
}

/// Encode at an explicit sample rate. The samples must already be at `sample_rate`.
pub fn encode_at(samples: &[f32], sample_rate: u32) -> AudioFrame {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        data.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    AudioFrame::from_le_bytes(data, sample_rate)
}

/// Saturating round-to-nearest conversion. NaN encodes as silence.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    // `as` saturates and maps NaN to 0.
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Decode a little-endian 16-bit mono PCM chunk from the agent.
///
/// # Errors
/// `PlaymateError::Decode` when the byte count is odd.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> Result<PlaybackBuffer> {
    if bytes.len() % 2 != 0 {
        return Err(PlaymateError::Decode(format!(
            "pcm16 chunk has odd length {}",
            bytes.len()
        )));
    }
    if sample_rate == 0 {
        return Err(PlaymateError::Decode("sample rate must be non-zero".into()));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    Ok(PlaybackBuffer::new(samples, sample_rate))
}

/// Base64 for transports that carry audio inside JSON text.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| PlaymateError::Decode(format!("invalid base64 audio: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn full_scale_and_out_of_range_saturate() {
        let frame = encode(&[1.0, -1.0, 2.0, -2.0, 0.0]);
        assert_eq!(
            frame.samples().collect::<Vec<_>>(),
            vec![32767, -32768, 32767, -32768, 0]
        );
    }

    #[test]
    fn rounds_to_nearest() {
        let frame = encode(&[0.4 / 32768.0, 0.6 / 32768.0, -0.6 / 32768.0]);
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![0, 1, -1]);
    }

    #[test]
    fn byte_layout_is_little_endian() {
        let frame = encode(&[256.0 / 32768.0, -1.0]);
        assert_eq!(frame.as_bytes(), &[0x00, 0x01, 0x00, 0x80]);
        assert_eq!(frame.sample_rate(), 16_000);
    }

    #[test]
    fn encoding_is_pure() {
        let block: Vec<f32> = (0..4096).map(|i| ((i as f32) * 0.01).sin()).collect();
        assert_eq!(encode(&block), encode(&block));
    }

    #[test]
    fn nan_encodes_as_silence() {
        assert_eq!(sample_to_i16(f32::NAN), 0);
    }

    #[test]
    fn decode_scales_back_to_unit_range() {
        let buffer = decode_pcm16(&[0x00, 0x80, 0xff, 0x7f, 0x00, 0x00], 24_000).unwrap();
        assert_eq!(buffer.samples.len(), 3);
        assert_relative_eq!(buffer.samples[0], -1.0);
        assert_relative_eq!(buffer.samples[1], 32767.0 / 32768.0);
        assert_relative_eq!(buffer.samples[2], 0.0);
        assert_eq!(buffer.sample_rate, 24_000);
    }

    #[test]
    fn decode_rejects_odd_length() {
        let err = decode_pcm16(&[0x00, 0x01, 0x02], 24_000).unwrap_err();
        assert!(matches!(err, PlaymateError::Decode(_)));
    }

    #[test]
    fn base64_rejects_garbage() {
        assert_eq!(decode_base64(&encode_base64(&[1, 2, 3])).unwrap(), vec![1, 2, 3]);
        assert!(decode_base64("***").is_err());
    }
}
