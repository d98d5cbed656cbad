//! Microphone capture loop.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → Vec<f32> at the device rate
//! 2. Resample to 16 kHz
//! 3. Cut into fixed blocks (4096 samples by default)
//! 4. Per block: drop if the session is not active or the mic gate is closed,
//!    otherwise apply gain, encode PCM16 and hand the frame to the sender
//! ```
//!
//! The loop runs on its own OS thread. That thread opens the microphone and
//! also drops it, because cpal input streams are not `Send`.

pub mod gate;

pub use gate::MicGate;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{resample::RateConverter, MicrophoneSource},
    buffering::{create_capture_ring, AudioConsumer, AudioFrame, Consumer, CAPTURE_SAMPLE_RATE},
    codec,
    diagnostics::SessionDiagnostics,
    error::{PlaymateError, Result},
};

/// Samples drained from the ring per iteration.
const DRAIN_CHUNK: usize = 960;
/// Sleep when the ring is empty.
const SLEEP_EMPTY: Duration = Duration::from_millis(5);

pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_INPUT_GAIN: f32 = 2.0;
pub const MIN_INPUT_GAIN: f32 = 0.5;
pub const MAX_INPUT_GAIN: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    /// Samples per outbound frame at 16 kHz.
    pub block_size: usize,
    /// Linear gain applied before encoding.
    pub gain: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            gain: DEFAULT_INPUT_GAIN,
        }
    }
}

impl CaptureSettings {
    pub fn normalized(self) -> Self {
        let gain = if self.gain.is_finite() {
            self.gain.clamp(MIN_INPUT_GAIN, MAX_INPUT_GAIN)
        } else {
            DEFAULT_INPUT_GAIN
        };
        Self {
            block_size: self.block_size.max(1),
            gain,
        }
    }
}

/// Everything the loop needs, passed as one struct so the thread closure stays tidy.
pub struct CaptureContext {
    pub settings: CaptureSettings,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    /// Set once the session is active. Blocks captured before that are discarded.
    pub armed: Arc<AtomicBool>,
    pub gate: MicGate,
    pub device_rate: u32,
    pub frames_tx: mpsc::UnboundedSender<AudioFrame>,
    pub diagnostics: Arc<SessionDiagnostics>,
}

/// Gate, amplify and encode one 16 kHz block.
///
/// Returns `None` without touching the samples when the gate is closed.
pub fn process_block(block: &mut [f32], gain: f32, gate: &MicGate) -> Option<AudioFrame> {
    if !gate.is_open() {
        return None;
    }
    apply_gain(block, gain);
    Some(codec::encode(block))
}

fn apply_gain(samples: &mut [f32], gain: f32) {
    if (gain - 1.0).abs() <= f32::EPSILON {
        return;
    }
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

/// Run the blocking capture loop until `ctx.running` becomes false or the
/// frame receiver goes away.
pub fn run(mut ctx: CaptureContext) {
    let settings = ctx.settings.normalized();
    info!(
        device_rate = ctx.device_rate,
        block_size = settings.block_size,
        gain = settings.gain,
        "capture loop started"
    );

    let mut resampler = match RateConverter::new(ctx.device_rate, CAPTURE_SAMPLE_RATE, DRAIN_CHUNK)
    {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create capture resampler: {e}");
            return;
        }
    };
    if !resampler.is_passthrough() {
        info!(
            "resampling enabled from={} to={}",
            ctx.device_rate, CAPTURE_SAMPLE_RATE
        );
    }

    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut pending: Vec<f32> = Vec::with_capacity(settings.block_size * 2);

    'outer: loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(SLEEP_EMPTY);
            continue;
        }
        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        let resampled = resampler.process(&raw[..n]);
        if resampled.is_empty() {
            continue;
        }
        pending.extend_from_slice(&resampled);

        while pending.len() >= settings.block_size {
            let mut block: Vec<f32> = pending.drain(..settings.block_size).collect();
            SessionDiagnostics::bump(&ctx.diagnostics.blocks_captured);

            if !ctx.armed.load(Ordering::Acquire) {
                continue;
            }
            let Some(frame) = process_block(&mut block, settings.gain, &ctx.gate) else {
                SessionDiagnostics::bump(&ctx.diagnostics.blocks_gated);
                continue;
            };
            if ctx.frames_tx.send(frame).is_err() {
                debug!("frame receiver dropped; stopping capture");
                break 'outer;
            }
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        blocks_captured = snap.blocks_captured,
        blocks_gated = snap.blocks_gated,
        "capture loop stopped"
    );
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    done: Option<oneshot::Receiver<()>>,
    device_rate: u32,
}

impl CaptureHandle {
    /// Open `source` on a new capture thread and start the loop.
    ///
    /// Resolves once the device is open, or with the device error.
    pub async fn spawn(
        source: Box<dyn MicrophoneSource>,
        settings: CaptureSettings,
        armed: Arc<AtomicBool>,
        gate: MicGate,
        frames_tx: mpsc::UnboundedSender<AudioFrame>,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) = oneshot::channel::<Result<u32>>();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let thread_running = Arc::clone(&running);
        std::thread::Builder::new()
            .name("playmate-capture".into())
            .spawn(move || {
                let (producer, consumer) = create_capture_ring();
                let stream = match source.open(producer, Arc::clone(&thread_running)) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        let _ = done_tx.send(());
                        return;
                    }
                };
                let device_rate = stream.sample_rate();
                let _ = open_tx.send(Ok(device_rate));

                run(CaptureContext {
                    settings,
                    consumer,
                    running: thread_running,
                    armed,
                    gate,
                    device_rate,
                    frames_tx,
                    diagnostics,
                });

                drop(stream);
                let _ = done_tx.send(());
            })?;

        match open_rx.await {
            Ok(Ok(device_rate)) => Ok(Self {
                running,
                done: Some(done_rx),
                device_rate,
            }),
            Ok(Err(e)) => {
                warn!("microphone open failed: {e}");
                Err(e)
            }
            Err(_) => Err(PlaymateError::Other(anyhow::anyhow!(
                "capture thread exited before opening the microphone"
            ))),
        }
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Signal the loop to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stop the loop and wait until the microphone has been released.
    pub async fn stop(&mut self) {
        self.signal_stop();
        if let Some(done) = self.done.take() {
            let _ = done.await;
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::InputStream;
    use crate::buffering::{AudioProducer, Producer};
    use crate::error::DeviceError;
    use std::thread;
    use std::time::Instant;

    fn context(
        consumer: AudioConsumer,
        running: Arc<AtomicBool>,
        armed: bool,
        gate: MicGate,
        frames_tx: mpsc::UnboundedSender<AudioFrame>,
    ) -> CaptureContext {
        CaptureContext {
            settings: CaptureSettings {
                block_size: 1_024,
                gain: 2.0,
            },
            consumer,
            running,
            armed: Arc::new(AtomicBool::new(armed)),
            gate,
            device_rate: CAPTURE_SAMPLE_RATE,
            frames_tx,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    fn recv_frame_with_timeout(
        rx: &mut mpsc::UnboundedReceiver<AudioFrame>,
        timeout: Duration,
    ) -> Option<AudioFrame> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match rx.try_recv() {
                Ok(frame) => return Some(frame),
                Err(mpsc::error::TryRecvError::Empty) => thread::sleep(Duration::from_millis(2)),
                Err(mpsc::error::TryRecvError::Disconnected) => return None,
            }
        }
        None
    }

    #[test]
    fn process_block_applies_gain_and_saturates() {
        let gate = MicGate::new(true);
        let mut block = vec![0.25, -0.25, 0.75];
        let frame = process_block(&mut block, 2.0, &gate).expect("gate open");
        let samples: Vec<i16> = frame.samples().collect();
        assert_eq!(samples, vec![16_384, -16_384, 32_767]);
        assert_eq!(frame.sample_rate(), CAPTURE_SAMPLE_RATE);
    }

    #[test]
    fn process_block_drops_when_gate_closed() {
        let gate = MicGate::new(false);
        let mut block = vec![0.25; 4];
        assert!(process_block(&mut block, 2.0, &gate).is_none());
        assert_eq!(block, vec![0.25; 4]);
    }

    #[test]
    fn settings_clamp_gain() {
        let s = CaptureSettings {
            block_size: 0,
            gain: 20.0,
        }
        .normalized();
        assert_eq!(s.gain, MAX_INPUT_GAIN);
        assert_eq!(s.block_size, 1);
        let s = CaptureSettings {
            block_size: 4096,
            gain: f32::NAN,
        }
        .normalized();
        assert_eq!(s.gain, DEFAULT_INPUT_GAIN);
    }

    #[test]
    fn run_emits_blocks_in_capture_order() {
        let (mut producer, consumer) = create_capture_ring();
        producer.push_slice(&vec![0.1; 1_024]);
        producer.push_slice(&vec![0.2; 1_024]);
        producer.push_slice(&vec![0.3; 512]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let ctx = context(consumer, Arc::clone(&running), true, MicGate::new(true), tx);
        let diagnostics = Arc::clone(&ctx.diagnostics);
        let handle = thread::spawn(move || run(ctx));

        let first = recv_frame_with_timeout(&mut rx, Duration::from_secs(1)).expect("first frame");
        let second = recv_frame_with_timeout(&mut rx, Duration::from_secs(1)).expect("second frame");
        running.store(false, Ordering::SeqCst);
        handle.join().expect("capture thread panicked");

        assert_eq!(first.sample_count(), 1_024);
        assert_eq!(first.samples().next(), Some(codec::sample_to_i16(0.2)));
        assert_eq!(second.samples().next(), Some(codec::sample_to_i16(0.4)));
        // The trailing half block stays pending.
        assert!(rx.try_recv().is_err());
        assert_eq!(diagnostics.snapshot().blocks_captured, 2);
    }

    #[test]
    fn closed_gate_sends_nothing_and_reopening_resumes() {
        let (mut producer, consumer) = create_capture_ring();
        let gate = MicGate::new(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let ctx = context(consumer, Arc::clone(&running), true, gate.clone(), tx);
        let diagnostics = Arc::clone(&ctx.diagnostics);
        let handle = thread::spawn(move || run(ctx));

        producer.push_slice(&vec![0.1; 2_048]);
        let deadline = Instant::now() + Duration::from_secs(1);
        while diagnostics.snapshot().blocks_gated < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(rx.try_recv().is_err());

        gate.set_open(true);
        producer.push_slice(&vec![0.1; 1_024]);
        let frame = recv_frame_with_timeout(&mut rx, Duration::from_secs(1));

        running.store(false, Ordering::SeqCst);
        handle.join().expect("capture thread panicked");

        assert!(frame.is_some());
        assert_eq!(diagnostics.snapshot().blocks_gated, 2);
    }

    #[test]
    fn unarmed_loop_discards_blocks() {
        let (mut producer, consumer) = create_capture_ring();
        producer.push_slice(&vec![0.1; 2_048]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let ctx = context(consumer, Arc::clone(&running), false, MicGate::new(true), tx);
        let diagnostics = Arc::clone(&ctx.diagnostics);
        let handle = thread::spawn(move || run(ctx));

        let deadline = Instant::now() + Duration::from_secs(1);
        while diagnostics.snapshot().blocks_captured < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        running.store(false, Ordering::SeqCst);
        handle.join().expect("capture thread panicked");

        assert!(rx.try_recv().is_err());
        assert_eq!(diagnostics.snapshot().blocks_gated, 0);
    }

    struct FixedRateStream(u32);

    impl InputStream for FixedRateStream {
        fn sample_rate(&self) -> u32 {
            self.0
        }
    }

    struct PrefilledMicrophone(Vec<f32>);

    impl MicrophoneSource for PrefilledMicrophone {
        fn open(
            self: Box<Self>,
            mut producer: AudioProducer,
            _running: Arc<AtomicBool>,
        ) -> Result<Box<dyn InputStream>> {
            producer.push_slice(&self.0);
            Ok(Box::new(FixedRateStream(CAPTURE_SAMPLE_RATE)))
        }
    }

    struct DeniedMicrophone;

    impl MicrophoneSource for DeniedMicrophone {
        fn open(
            self: Box<Self>,
            _producer: AudioProducer,
            _running: Arc<AtomicBool>,
        ) -> Result<Box<dyn InputStream>> {
            Err(DeviceError::PermissionDenied.into())
        }
    }

    #[tokio::test]
    async fn spawn_forwards_frames_and_stops_cleanly() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = CaptureHandle::spawn(
            Box::new(PrefilledMicrophone(vec![0.1; 4_096])),
            CaptureSettings::default(),
            Arc::new(AtomicBool::new(true)),
            MicGate::default(),
            tx,
            Arc::new(SessionDiagnostics::default()),
        )
        .await
        .expect("microphone opens");
        assert_eq!(handle.device_rate(), CAPTURE_SAMPLE_RATE);

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame in time")
            .expect("channel open");
        assert_eq!(frame.sample_count(), DEFAULT_BLOCK_SIZE);

        handle.stop().await;
    }

    #[tokio::test]
    async fn spawn_reports_device_errors() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = CaptureHandle::spawn(
            Box::new(DeniedMicrophone),
            CaptureSettings::default(),
            Arc::new(AtomicBool::new(true)),
            MicGate::default(),
            tx,
            Arc::new(SessionDiagnostics::default()),
        )
        .await
        .err()
        .expect("open fails");
        assert!(matches!(
            err,
            PlaymateError::Device(DeviceError::PermissionDenied)
        ));
    }
}
