//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Two directions need it:
//! - capture: device native rate (often 44.1/48 kHz) → 16 kHz wire rate,
//!   streamed block by block through [`RateConverter::process`];
//! - playback: 24 kHz agent speech → output device rate, converted one
//!   buffer at a time with [`resample_buffer`] so each buffer keeps its exact
//!   duration on the output clock.
//!
//! When both rates match, no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::buffering::PlaybackBuffer;
use crate::error::{DeviceError, Result};

/// Input chunk size for one-shot buffer conversion.
const ONE_SHOT_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// Input samples rubato expects per process call.
    chunk_size: usize,
    /// `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `DeviceError::Unsupported` if rubato rejects the ratio.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }
        if source_rate == 0 || target_rate == 0 {
            return Err(DeviceError::Unsupported(format!(
                "cannot resample {source_rate} Hz to {target_rate} Hz"
            ))
            .into());
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| DeviceError::Unsupported(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(source_rate, target_rate, chunk_size, "resampler created");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Input accumulates until a full `chunk_size` block is available; any
    /// remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Push out whatever is still buffered, zero-padding the last chunk and
    /// draining the resampler's internal delay.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return std::mem::take(&mut self.input_buf);
        };

        let mut result = Vec::new();
        if !self.input_buf.is_empty() {
            let input_slice: &[f32] = &self.input_buf[..];
            let wave_in: &[&[f32]] = &[input_slice];
            match resampler.process_partial_into_buffer(
                Some(wave_in),
                &mut self.output_buf,
                None,
            ) {
                Ok((_, produced)) => result.extend_from_slice(&self.output_buf[0][..produced]),
                Err(e) => error!("resampler flush error: {e}"),
            }
            self.input_buf.clear();
        }
        match resampler.process_partial_into_buffer(None::<&[&[f32]]>, &mut self.output_buf, None)
        {
            Ok((_, produced)) => result.extend_from_slice(&self.output_buf[0][..produced]),
            Err(e) => error!("resampler drain error: {e}"),
        }
        result
    }

    /// Output samples of latency the resampler adds at the start of a stream.
    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    /// `true` when source rate == target rate.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert one whole buffer to `target_rate`, keeping its duration exact:
/// the output has `round(len * target / source)` samples.
pub fn resample_buffer(buffer: PlaybackBuffer, target_rate: u32) -> Result<PlaybackBuffer> {
    if buffer.sample_rate == target_rate {
        return Ok(buffer);
    }
    let expected = (buffer.samples.len() as f64 * target_rate as f64
        / buffer.sample_rate as f64)
        .round() as usize;

    let mut converter = RateConverter::new(buffer.sample_rate, target_rate, ONE_SHOT_CHUNK)?;
    let delay = converter.output_delay();
    let mut out = converter.process(&buffer.samples);
    out.extend(converter.flush());

    let mut out: Vec<f32> = out.into_iter().skip(delay).collect();
    out.resize(expected, 0.0);
    Ok(PlaybackBuffer::new(out, target_rate))
}
