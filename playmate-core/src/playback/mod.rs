//! Gapless playback scheduling of streamed agent speech.
//!
//! ## Cursor invariant
//!
//! The scheduler keeps one watermark, the *playback cursor*: the output-clock
//! time at which the next buffer may start. For every buffer,
//!
//! ```text
//! start  = max(now, cursor)
//! cursor = start + duration
//! ```
//!
//! so buffers delivered in streaming order play back to back with no gap and
//! no overlap, even when the network delivers them in bursts.
//!
//! ## Serialisation
//!
//! `schedule`, `interrupt` and `shutdown` all take the same mutex, so an
//! interruption can never interleave with a half-applied schedule. The
//! scheduler is the only writer of the cursor and the only holder of voice
//! handles; callers never see either.

pub mod virtual_output;

pub use virtual_output::VirtualOutput;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffering::PlaybackBuffer;
use crate::error::Result;

/// Opaque handle to one buffer started on an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

/// An output device with its own audio clock.
pub trait PlaybackOutput: Send + Sync + 'static {
    /// Current output clock time in seconds. Monotonically non-decreasing.
    fn clock_time(&self) -> f64;

    /// Begin playing `buffer` at output clock time `at`. If `at` is already in
    /// the past the buffer starts immediately.
    fn start(&self, buffer: PlaybackBuffer, at: f64) -> Result<VoiceId>;

    /// Halt a voice immediately. Unknown or finished voices are ignored.
    fn stop(&self, voice: VoiceId);

    /// Release the device. Further calls are no-ops.
    fn close(&self) {}
}

/// Shared, lock-free output mute flag. Written by the UI, read on every `schedule`.
#[derive(Debug, Clone, Default)]
pub struct OutputMute(Arc<AtomicBool>);

impl OutputMute {
    pub fn new(muted: bool) -> Self {
        Self(Arc::new(AtomicBool::new(muted)))
    }

    pub fn set(&self, muted: bool) {
        self.0.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Where a buffer landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSlot {
    pub start: f64,
    pub duration: f64,
    /// `false` when the output was muted and the slot elapsed silently.
    pub audible: bool,
}

impl ScheduledSlot {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug)]
struct ActiveVoice {
    id: VoiceId,
    end: f64,
}

#[derive(Debug, Default)]
struct SchedulerState {
    cursor: f64,
    voices: Vec<ActiveVoice>,
    interrupted: bool,
    closed: bool,
}

/// Schedules decoded agent speech onto one output device.
pub struct PlaybackScheduler {
    output: Arc<dyn PlaybackOutput>,
    mute: OutputMute,
    state: Mutex<SchedulerState>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn PlaybackOutput>, mute: OutputMute) -> Self {
        let cursor = output.clock_time();
        Self {
            output,
            mute,
            state: Mutex::new(SchedulerState {
                cursor,
                ..SchedulerState::default()
            }),
        }
    }

    /// Queue `buffer` right after everything already scheduled.
    ///
    /// While muted the buffer is not started, but the cursor still advances as
    /// if it had played, so timing stays consistent when sound comes back.
    /// Returns `None` after `shutdown` or for empty buffers.
    pub fn schedule(&self, buffer: PlaybackBuffer) -> Option<ScheduledSlot> {
        if buffer.is_empty() {
            return None;
        }
        let mut state = self.state.lock();
        if state.closed {
            debug!("scheduler closed; dropping buffer");
            return None;
        }

        let now = self.output.clock_time();
        state.voices.retain(|v| v.end > now);

        let start = now.max(state.cursor);
        let duration = buffer.duration_secs();
        let audible = if self.mute.is_muted() {
            debug!(start, duration, "output muted; slot elapses silently");
            false
        } else {
            match self.output.start(buffer, start) {
                Ok(id) => {
                    state.voices.push(ActiveVoice {
                        id,
                        end: start + duration,
                    });
                    true
                }
                Err(e) => {
                    warn!("failed to start playback buffer: {e}");
                    false
                }
            }
        };

        state.cursor = start + duration;
        state.interrupted = false;
        Some(ScheduledSlot {
            start,
            duration,
            audible,
        })
    }

    /// Barge-in: stop everything playing or queued and pull the cursor back to now.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        let now = self.output.clock_time();
        let stopped = state.voices.len();
        for voice in state.voices.drain(..) {
            self.output.stop(voice.id);
        }
        state.cursor = now;
        state.interrupted = true;
        debug!(stopped, now, "playback interrupted");
    }

    /// Stop all voices and refuse further buffers. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        for voice in state.voices.drain(..) {
            self.output.stop(voice.id);
        }
        state.closed = true;
        state.cursor = self.output.clock_time();
        self.output.close();
        info!("playback scheduler shut down");
    }

    /// True while scheduled speech extends past the current clock time and no
    /// interruption has happened since the last buffer. UI feedback only.
    pub fn is_speaking(&self) -> bool {
        let state = self.state.lock();
        !state.interrupted && !state.closed && self.output.clock_time() < state.cursor
    }

    /// Next permitted start time on the output clock.
    pub fn cursor(&self) -> f64 {
        self.state.lock().cursor
    }

    pub fn clock_time(&self) -> f64 {
        self.output.clock_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn buffer(secs: f64) -> PlaybackBuffer {
        PlaybackBuffer::new(vec![0.1; (secs * 1_000.0).round() as usize], 1_000)
    }

    fn scheduler() -> (Arc<VirtualOutput>, OutputMute, PlaybackScheduler) {
        let output = Arc::new(VirtualOutput::manual());
        let mute = OutputMute::default();
        let sched = PlaybackScheduler::new(output.clone(), mute.clone());
        (output, mute, sched)
    }

    #[test]
    fn burst_of_buffers_plays_back_to_back() {
        let (output, _mute, sched) = scheduler();
        let slots: Vec<_> = [0.25, 0.5, 0.125]
            .iter()
            .map(|&d| sched.schedule(buffer(d)).unwrap())
            .collect();

        assert_relative_eq!(slots[0].start, 0.0);
        for pair in slots.windows(2) {
            assert_relative_eq!(pair[1].start, pair[0].end());
        }
        assert_relative_eq!(sched.cursor(), 0.875);
        assert_eq!(output.started().len(), 3);
    }

    #[test]
    fn late_buffer_starts_at_clock_not_stale_cursor() {
        let (output, _mute, sched) = scheduler();
        sched.schedule(buffer(0.25)).unwrap();
        output.advance(1.0);
        let slot = sched.schedule(buffer(0.25)).unwrap();
        assert_relative_eq!(slot.start, 1.0);
    }

    #[test]
    fn interrupt_stops_all_voices_and_resets_cursor() {
        let (output, _mute, sched) = scheduler();
        sched.schedule(buffer(1.0)).unwrap();
        sched.schedule(buffer(1.0)).unwrap();
        output.advance(0.5);
        assert!(sched.is_speaking());

        sched.interrupt();

        assert_eq!(output.stopped().len(), 2);
        assert_relative_eq!(sched.cursor(), 0.5);
        assert!(!sched.is_speaking());
        assert!(!output.is_audible_at(0.6));

        let next = sched.schedule(buffer(0.25)).unwrap();
        assert_relative_eq!(next.start, 0.5);
        assert!(sched.is_speaking());
    }

    #[test]
    fn muted_schedule_advances_cursor_without_playing() {
        let (output, mute, sched) = scheduler();
        mute.set(true);
        let slot = sched.schedule(buffer(0.5)).unwrap();
        assert!(!slot.audible);
        assert!(output.started().is_empty());
        assert_relative_eq!(sched.cursor(), 0.5);

        mute.set(false);
        let slot = sched.schedule(buffer(0.5)).unwrap();
        assert!(slot.audible);
        assert_relative_eq!(slot.start, 0.5);
    }

    #[test]
    fn speaking_ends_when_clock_passes_cursor() {
        let (output, _mute, sched) = scheduler();
        assert!(!sched.is_speaking());
        sched.schedule(buffer(0.25)).unwrap();
        assert!(sched.is_speaking());
        output.advance(0.25);
        assert!(!sched.is_speaking());
    }

    #[test]
    fn shutdown_rejects_further_buffers() {
        let (output, _mute, sched) = scheduler();
        sched.schedule(buffer(1.0)).unwrap();
        sched.shutdown();
        sched.shutdown();
        assert_eq!(output.stopped().len(), 1);
        assert!(output.is_closed());
        assert!(sched.schedule(buffer(0.5)).is_none());
    }

    #[test]
    fn empty_buffer_is_ignored() {
        let (_output, _mute, sched) = scheduler();
        assert!(sched.schedule(PlaybackBuffer::new(vec![], 24_000)).is_none());
        assert_relative_eq!(sched.cursor(), 0.0);
    }
}
