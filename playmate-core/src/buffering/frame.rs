//! Typed audio units: outbound [`AudioFrame`]s and inbound [`PlaybackBuffer`]s.

/// Wire sample rate for outbound capture frames (Hz). The agent does no resampling.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Default sample rate of synthesized agent speech (Hz).
pub const AGENT_SAMPLE_RATE: u32 = 24_000;

/// One encoded block of outbound microphone audio.
///
/// Little-endian signed 16-bit mono PCM. Built once by the encoder and never
/// mutated afterwards; sending it moves it into the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
    sample_rate: u32,
}

impl AudioFrame {
    pub(crate) fn from_le_bytes(data: Vec<u8>, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }

    /// Raw little-endian PCM bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Iterate the encoded samples back as `i16`.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    pub fn duration_secs(&self) -> f64 {
        self.sample_count() as f64 / self.sample_rate as f64
    }

    /// MIME type transports attach to the payload, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decoded agent speech waiting for (or undergoing) playback.
///
/// Owned by the playback scheduler from `schedule` until it has played out or
/// been cancelled by an interruption.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frame_reports_samples_and_duration() {
        let frame = AudioFrame::from_le_bytes(vec![0x01, 0x00, 0xff, 0x7f], CAPTURE_SAMPLE_RATE);
        assert_eq!(frame.sample_count(), 2);
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![1, i16::MAX]);
        assert_eq!(frame.mime_type(), "audio/pcm;rate=16000");
        assert_relative_eq!(frame.duration_secs(), 2.0 / 16_000.0);
    }

    #[test]
    fn buffer_duration_follows_sample_rate() {
        let buffer = PlaybackBuffer::new(vec![0.0; 12_000], AGENT_SAMPLE_RATE);
        assert_relative_eq!(buffer.duration_secs(), 0.5);
        assert_relative_eq!(PlaybackBuffer::new(vec![0.0; 10], 0).duration_secs(), 0.0);
    }
}
