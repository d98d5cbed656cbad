//! Speaker output via a cpal output stream.
//!
//! The output callback owns the list of scheduled voices and advances a frame
//! counter that *is* the output audio clock. Control threads never touch the
//! voice list: they push [`VoiceCommand`]s into a lock-free ring that the
//! callback drains at the start of every block. Finished or stopped voices
//! travel back through a second ring so their sample memory is freed on a
//! control thread, not the audio thread.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use ringbuf::{traits::Split, HeapCons, HeapProd, HeapRb};
use tracing::warn;

use crate::{
    audio::{resample::resample_buffer, SpeakerSource},
    buffering::{Consumer, PlaybackBuffer, Producer},
    error::{DeviceError, Result},
    playback::{PlaybackOutput, VoiceId},
};

const COMMAND_CAPACITY: usize = 1024;
/// Pre-allocated voice slots. The lists grow past this only on extreme bursts.
const VOICE_CAPACITY: usize = 1024;

pub(crate) enum VoiceCommand {
    Start {
        id: VoiceId,
        start_frame: u64,
        samples: Box<[f32]>,
    },
    Stop(VoiceId),
    StopAll,
}

struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Box<[f32]>,
    pos: usize,
}

/// Callback-side state: owned exclusively by the output stream closure.
///
/// Voices wait in `pending`, ordered by start frame, until the clock reaches
/// them; only `active` voices are mixed.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
pub(crate) struct Mixer {
    pending: VecDeque<Voice>,
    active: Vec<Voice>,
    commands: HeapCons<VoiceCommand>,
    retired: HeapProd<Box<[f32]>>,
    frame: Arc<AtomicU64>,
}

#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
impl Mixer {
    fn retire(&mut self, samples: Box<[f32]>) {
        // A full retire ring only means the memory is freed here instead.
        let _ = self.retired.try_push(samples);
    }

    fn enqueue(&mut self, voice: Voice) {
        // Streamed speech arrives in start order, so this is almost always a push_back.
        let idx = self
            .pending
            .partition_point(|v| v.start_frame <= voice.start_frame);
        self.pending.insert(idx, voice);
    }

    fn apply_commands(&mut self) {
        while let Some(cmd) = self.commands.try_pop() {
            match cmd {
                VoiceCommand::Start {
                    id,
                    start_frame,
                    samples,
                } => self.enqueue(Voice {
                    id,
                    start_frame,
                    samples,
                    pos: 0,
                }),
                VoiceCommand::Stop(id) => {
                    if let Some(idx) = self.active.iter().position(|v| v.id == id) {
                        let voice = self.active.swap_remove(idx);
                        self.retire(voice.samples);
                    } else if let Some(idx) = self.pending.iter().position(|v| v.id == id) {
                        if let Some(voice) = self.pending.remove(idx) {
                            self.retire(voice.samples);
                        }
                    }
                }
                VoiceCommand::StopAll => {
                    while let Some(voice) = self.active.pop() {
                        self.retire(voice.samples);
                    }
                    while let Some(voice) = self.pending.pop_front() {
                        self.retire(voice.samples);
                    }
                }
            }
        }
    }

    /// Move every voice due at `now` to the active list. A voice whose start
    /// frame has already passed skips the samples it missed, so it stays on
    /// its scheduled timeline.
    fn activate_due(&mut self, now: u64) {
        while self.pending.front().is_some_and(|v| v.start_frame <= now) {
            let Some(mut voice) = self.pending.pop_front() else {
                break;
            };
            let late = (now - voice.start_frame).min(voice.samples.len() as u64) as usize;
            voice.pos = late;
            if voice.pos < voice.samples.len() {
                self.active.push(voice);
            } else {
                self.retire(voice.samples);
            }
        }
    }

    /// Mix one block of mono frames into `out` (one value per frame).
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        self.apply_commands();
        let base = self.frame.load(Ordering::Relaxed);

        for (offset, slot) in out.iter_mut().enumerate() {
            let now = base + offset as u64;
            self.activate_due(now);
            let mut sum = 0f32;
            for voice in self.active.iter_mut() {
                if voice.pos < voice.samples.len() {
                    sum += voice.samples[voice.pos];
                    voice.pos += 1;
                }
            }
            *slot = sum.clamp(-1.0, 1.0);
        }

        let mut idx = 0;
        while idx < self.active.len() {
            if self.active[idx].pos >= self.active[idx].samples.len() {
                let voice = self.active.swap_remove(idx);
                self.retire(voice.samples);
            } else {
                idx += 1;
            }
        }

        self.frame
            .store(base + out.len() as u64, Ordering::Release);
    }
}

/// Control-side handles shared by every clone of a [`CpalOutput`].
struct Control {
    commands: Mutex<HeapProd<VoiceCommand>>,
    retired: Mutex<HeapCons<Box<[f32]>>>,
    frame: Arc<AtomicU64>,
    next_id: AtomicU64,
    sample_rate: u32,
}

impl Control {
    fn push(&self, cmd: VoiceCommand) -> bool {
        self.retired.lock().clear();
        self.commands.lock().try_push(cmd).is_ok()
    }
}

#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
pub(crate) fn mixer_pair(sample_rate: u32) -> (Mixer, Arc<AtomicU64>, ControlParts) {
    let (cmd_prod, cmd_cons) = HeapRb::<VoiceCommand>::new(COMMAND_CAPACITY).split();
    let (ret_prod, ret_cons) = HeapRb::<Box<[f32]>>::new(COMMAND_CAPACITY).split();
    let frame = Arc::new(AtomicU64::new(0));
    let mixer = Mixer {
        pending: VecDeque::with_capacity(VOICE_CAPACITY),
        active: Vec::with_capacity(VOICE_CAPACITY),
        commands: cmd_cons,
        retired: ret_prod,
        frame: Arc::clone(&frame),
    };
    (
        mixer,
        Arc::clone(&frame),
        ControlParts {
            commands: cmd_prod,
            retired: ret_cons,
            sample_rate,
        },
    )
}

pub(crate) struct ControlParts {
    commands: HeapProd<VoiceCommand>,
    retired: HeapCons<Box<[f32]>>,
    sample_rate: u32,
}

/// A speaker opened through cpal. Cheap to share behind `Arc`.
pub struct CpalOutput {
    control: Control,
    shutdown_tx: Mutex<Option<crossbeam_channel::Sender<()>>>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl CpalOutput {
    fn from_parts(
        parts: ControlParts,
        frame: Arc<AtomicU64>,
        shutdown_tx: Option<crossbeam_channel::Sender<()>>,
        thread: Option<std::thread::JoinHandle<()>>,
    ) -> Self {
        Self {
            control: Control {
                commands: Mutex::new(parts.commands),
                retired: Mutex::new(parts.retired),
                frame,
                next_id: AtomicU64::new(1),
                sample_rate: parts.sample_rate,
            },
            shutdown_tx: Mutex::new(shutdown_tx),
            thread: Mutex::new(thread),
        }
    }

    /// Open the preferred (or default) output device on a dedicated thread.
    ///
    /// Blocks until the stream is playing or has failed to open.
    #[cfg(feature = "audio-cpal")]
    pub fn open(preferred_device: Option<&str>) -> Result<Self> {
        use cpal::traits::{DeviceTrait, StreamTrait};
        use tracing::info;

        let preferred = preferred_device.map(ToOwned::to_owned);
        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<(ControlParts, Arc<AtomicU64>)>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("playmate-output".into())
            .spawn(move || {
                let opened = (|| -> Result<(cpal::Stream, ControlParts, Arc<AtomicU64>)> {
                    let device = super::device::resolve_output_device(preferred.as_deref())?;
                    info!(
                        device = device.name().unwrap_or_default().as_str(),
                        "opening output device"
                    );
                    let supported = device
                        .default_output_config()
                        .map_err(|e| DeviceError::Stream(e.to_string()))?;
                    let sample_rate = supported.sample_rate().0;
                    let config = cpal::StreamConfig {
                        channels: supported.channels(),
                        sample_rate: supported.sample_rate(),
                        buffer_size: cpal::BufferSize::Default,
                    };
                    let (mixer, frame, parts) = mixer_pair(sample_rate);
                    let stream = match supported.sample_format() {
                        cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, mixer),
                        cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, mixer),
                        cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, mixer),
                        fmt => {
                            return Err(DeviceError::Unsupported(format!(
                                "output sample format {fmt:?}"
                            ))
                            .into())
                        }
                    }?;
                    stream
                        .play()
                        .map_err(|e| DeviceError::Stream(e.to_string()))?;
                    info!(sample_rate, channels = config.channels, "output stream playing");
                    Ok((stream, parts, frame))
                })();

                match opened {
                    Ok((stream, parts, frame)) => {
                        let _ = open_tx.send(Ok((parts, frame)));
                        // Park until close(); the stream drops on this thread.
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| DeviceError::Stream(format!("spawn output thread: {e}")))?;

        match open_rx.recv() {
            Ok(Ok((parts, frame))) => Ok(Self::from_parts(
                parts,
                frame,
                Some(shutdown_tx),
                Some(thread),
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::Stream("output thread died during open".into()).into())
            }
        }
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(_preferred_device: Option<&str>) -> Result<Self> {
        Err(DeviceError::Unsupported("compiled without audio-cpal feature".into()).into())
    }

    pub fn sample_rate(&self) -> u32 {
        self.control.sample_rate
    }
}

#[cfg(feature = "audio-cpal")]
fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    use cpal::{traits::DeviceTrait, Sample};

    let ch = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info| {
                let frames = data.len() / ch;
                mono.resize(frames, 0.0);
                mixer.render(&mut mono);
                for (frame, value) in data.chunks_mut(ch).zip(mono.iter()) {
                    let sample = T::from_sample(*value);
                    for slot in frame.iter_mut() {
                        *slot = sample;
                    }
                }
            },
            |err| tracing::error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| DeviceError::Stream(e.to_string()).into())
}

impl PlaybackOutput for CpalOutput {
    fn clock_time(&self) -> f64 {
        self.control.frame.load(Ordering::Acquire) as f64 / self.control.sample_rate as f64
    }

    fn start(&self, buffer: PlaybackBuffer, at: f64) -> Result<VoiceId> {
        let buffer = resample_buffer(buffer, self.control.sample_rate)?;
        let id = VoiceId(self.control.next_id.fetch_add(1, Ordering::Relaxed));
        let start_frame = (at.max(0.0) * self.control.sample_rate as f64).round() as u64;
        let accepted = self.control.push(VoiceCommand::Start {
            id,
            start_frame,
            samples: buffer.samples.into_boxed_slice(),
        });
        if !accepted {
            return Err(DeviceError::Stream("output command ring full".into()).into());
        }
        Ok(id)
    }

    fn stop(&self, voice: VoiceId) {
        if !self.control.push(VoiceCommand::Stop(voice)) {
            warn!(voice = voice.0, "output command ring full; stop dropped");
        }
    }

    fn close(&self) {
        let _ = self.control.push(VoiceCommand::StopAll);
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// The system speaker, opened through cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalSpeaker {
    pub preferred_device: Option<String>,
}

impl SpeakerSource for CpalSpeaker {
    fn open(&self) -> Result<Arc<dyn PlaybackOutput>> {
        Ok(Arc::new(CpalOutput::open(self.preferred_device.as_deref())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer_with_control(rate: u32) -> (Mixer, CpalOutput) {
        let (mixer, frame, parts) = mixer_pair(rate);
        (mixer, CpalOutput::from_parts(parts, frame, None, None))
    }

    #[test]
    fn voice_starts_at_its_scheduled_frame() {
        let (mut mixer, output) = mixer_with_control(100);
        output
            .start(PlaybackBuffer::new(vec![0.5; 4], 100), 0.02)
            .unwrap();

        let mut block = vec![0.0; 8];
        mixer.render(&mut block);
        assert_eq!(block, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert!((output.clock_time() - 0.08).abs() < 1e-9);
    }

    #[test]
    fn stop_silences_voice_on_next_block() {
        let (mut mixer, output) = mixer_with_control(100);
        let id = output
            .start(PlaybackBuffer::new(vec![0.25; 100], 100), 0.0)
            .unwrap();

        let mut block = vec![0.0; 4];
        mixer.render(&mut block);
        assert_eq!(block, vec![0.25; 4]);

        output.stop(id);
        mixer.render(&mut block);
        assert_eq!(block, vec![0.0; 4]);
    }

    #[test]
    fn overlapping_voices_are_summed_and_clamped() {
        let (mut mixer, output) = mixer_with_control(100);
        output.start(PlaybackBuffer::new(vec![0.75; 2], 100), 0.0).unwrap();
        output.start(PlaybackBuffer::new(vec![0.75; 2], 100), 0.0).unwrap();

        let mut block = vec![0.0; 2];
        mixer.render(&mut block);
        assert_eq!(block, vec![1.0, 1.0]);
    }

    #[test]
    fn burst_of_tiny_buffers_plays_without_gaps() {
        use crate::playback::{OutputMute, PlaybackScheduler};
        use approx::assert_relative_eq;

        let (mut mixer, frame, parts) = mixer_pair(100);
        let output = Arc::new(CpalOutput::from_parts(parts, frame, None, None));
        let scheduler = PlaybackScheduler::new(output.clone(), OutputMute::default());
        for _ in 0..80 {
            let slot = scheduler
                .schedule(PlaybackBuffer::new(vec![0.5], 100))
                .expect("scheduler open");
            assert!(slot.audible);
        }
        assert_relative_eq!(scheduler.cursor(), 0.8, epsilon = 1e-9);

        let mut block = vec![0.0; 80];
        mixer.render(&mut block);
        assert!(block.iter().all(|&s| s == 0.5), "silent frame in {block:?}");
    }

    #[test]
    fn late_voice_keeps_its_timeline_and_does_not_overlap() {
        let (mut mixer, output) = mixer_with_control(100);
        let mut block = vec![0.0; 4];
        mixer.render(&mut block);

        // Both arrive after frame 4: the first has fully elapsed, the second starts on time.
        output.start(PlaybackBuffer::new(vec![0.25; 4], 100), 0.0).unwrap();
        output.start(PlaybackBuffer::new(vec![0.5; 4], 100), 0.04).unwrap();

        let mut block = vec![0.0; 12];
        mixer.render(&mut block);
        let mut expected = vec![0.5; 4];
        expected.extend([0.0; 8]);
        assert_eq!(block, expected);
    }

    #[test]
    fn partially_elapsed_voice_skips_missed_samples() {
        let (mut mixer, output) = mixer_with_control(100);
        let mut block = vec![0.0; 4];
        mixer.render(&mut block);

        output
            .start(PlaybackBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 100), 0.02)
            .unwrap();
        mixer.render(&mut block);
        assert_eq!(block, vec![0.3, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn full_command_ring_rejects_start() {
        let (_mixer, output) = mixer_with_control(100);
        for _ in 0..COMMAND_CAPACITY {
            output.start(PlaybackBuffer::new(vec![0.1], 100), 0.0).unwrap();
        }
        assert!(output.start(PlaybackBuffer::new(vec![0.1], 100), 0.0).is_err());
    }
}
