//! Audio devices: microphone capture and speaker output.
//!
//! # Design constraints
//!
//! cpal callbacks run on OS audio threads at elevated priority. They **must not**
//! block on a mutex, perform I/O or wait on the network. The input callback
//! only downmixes to mono and pushes into an SPSC ring; the output callback
//! only mixes voices it already owns. Everything else happens on ordinary
//! threads.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Input streams are therefore opened *and dropped* on the capture
//! loop thread ([`MicrophoneSource::open`] is called there), and the output
//! stream lives on a dedicated thread owned by [`output::CpalOutput`].

pub mod device;
pub mod output;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{buffering::AudioProducer, error::Result, playback::PlaybackOutput};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
#[cfg(feature = "audio-cpal")]
use crate::error::DeviceError;

/// Voice-processing features requested from the platform when it offers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceProcessing {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for VoiceProcessing {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl VoiceProcessing {
    pub fn any(&self) -> bool {
        self.echo_cancellation || self.noise_suppression || self.auto_gain_control
    }
}

/// An opened input device. Dropping it releases the device.
///
/// Not required to be `Send`: it is created and dropped on the capture thread.
pub trait InputStream {
    /// Native sample rate of the samples pushed into the ring (Hz).
    fn sample_rate(&self) -> u32;
}

/// Something that can acquire exclusive use of a microphone.
pub trait MicrophoneSource: Send + 'static {
    /// Acquire the device and start pushing mono f32 samples into `producer`
    /// while `running` is set.
    ///
    /// Called on the capture thread, which also drops the returned stream.
    ///
    /// # Errors
    /// A `DeviceError` when permission is denied or no device exists.
    fn open(
        self: Box<Self>,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>>;
}

/// Something that can acquire the speaker for a session.
pub trait SpeakerSource: Send + Sync + 'static {
    /// # Errors
    /// `DeviceError::NoOutputDevice` / `DeviceError::Stream` on failure.
    fn open(&self) -> Result<Arc<dyn PlaybackOutput>>;
}

/// Handle to an active cpal capture stream.
///
/// **Not `Send`**: bound to its creation thread on Windows/macOS.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Set to `false` to make the callback a no-op.
    running: Arc<AtomicBool>,
    /// Native capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open an input device by preferred name, otherwise the default device,
    /// otherwise the first available one.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let device = device::resolve_input_device(preferred_device_name)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device.default_input_config().map_err(map_config_error)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "input config selected");

        let config = StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                build_mono_input::<f32>(&device, &config, producer, Arc::clone(&running))
            }
            cpal::SampleFormat::I16 => {
                build_mono_input::<i16>(&device, &config, producer, Arc::clone(&running))
            }
            cpal::SampleFormat::U8 => {
                build_mono_input::<u8>(&device, &config, producer, Arc::clone(&running))
            }
            fmt => {
                return Err(
                    DeviceError::Unsupported(format!("input sample format {fmt:?}")).into(),
                )
            }
        }?;

        stream
            .play()
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(crate::error::DeviceError::Unsupported(
            "compiled without audio-cpal feature".into(),
        )
        .into())
    }
}

impl InputStream for AudioCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The system microphone, opened through cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    pub preferred_device: Option<String>,
    pub processing: VoiceProcessing,
}

impl MicrophoneSource for CpalMicrophone {
    fn open(
        self: Box<Self>,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>> {
        if self.processing.any() {
            // cpal exposes raw device streams only.
            tracing::debug!(
                processing = ?self.processing,
                "platform voice processing is not available through cpal; capturing raw input"
            );
        }
        let capture =
            AudioCapture::open_with_preference(producer, running, self.preferred_device.as_deref())?;
        Ok(Box::new(capture))
    }
}

#[cfg(feature = "audio-cpal")]
fn map_config_error(e: cpal::DefaultStreamConfigError) -> crate::error::PlaymateError {
    match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => DeviceError::PermissionDenied.into(),
        other => DeviceError::Stream(other.to_string()).into(),
    }
}

/// Build an input stream for sample type `T` that downmixes every callback to
/// mono f32 and pushes it into the ring.
#[cfg(feature = "audio-cpal")]
fn build_mono_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    let mut mix_buf: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / ch;
                mix_buf.resize(frames, 0.0);
                for (f, slot) in mix_buf.iter_mut().enumerate() {
                    let base = f * ch;
                    let mut sum = 0f32;
                    for c in 0..ch {
                        sum += data[base + c].to_sample::<f32>();
                    }
                    *slot = sum / ch as f32;
                }
                let written = producer.push_slice(&mix_buf);
                if written < mix_buf.len() {
                    warn!(
                        "capture ring full: dropped {} frames",
                        mix_buf.len() - written
                    );
                }
            },
            |err| error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => DeviceError::PermissionDenied.into(),
            other => DeviceError::Stream(other.to_string()).into(),
        })
}
