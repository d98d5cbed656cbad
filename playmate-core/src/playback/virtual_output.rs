//! Device-free [`PlaybackOutput`] used for headless sessions and tests.
//!
//! The clock either follows wall time since creation or only moves when
//! [`VirtualOutput::advance`] is called. Every started and stopped voice is
//! recorded so playback timelines can be inspected afterwards.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use super::{PlaybackOutput, VoiceId};
use crate::buffering::PlaybackBuffer;
use crate::error::Result;

#[derive(Debug)]
enum Clock {
    Wall(Instant),
    Manual(Mutex<f64>),
}

/// One buffer as the virtual device saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualVoice {
    pub id: VoiceId,
    pub start: f64,
    pub end: f64,
    pub sample_count: usize,
    pub stopped_at: Option<f64>,
}

#[derive(Debug)]
pub struct VirtualOutput {
    clock: Clock,
    voices: Mutex<Vec<VirtualVoice>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl VirtualOutput {
    /// Clock follows wall time.
    pub fn realtime() -> Self {
        Self::with_clock(Clock::Wall(Instant::now()))
    }

    /// Clock only moves through [`advance`](Self::advance).
    pub fn manual() -> Self {
        Self::with_clock(Clock::Manual(Mutex::new(0.0)))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            voices: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Move a manual clock forward. No effect on a wall clock.
    pub fn advance(&self, secs: f64) {
        if let Clock::Manual(now) = &self.clock {
            *now.lock() += secs.max(0.0);
        }
    }

    pub fn started(&self) -> Vec<VirtualVoice> {
        self.voices.lock().clone()
    }

    pub fn stopped(&self) -> Vec<VirtualVoice> {
        self.voices
            .lock()
            .iter()
            .filter(|v| v.stopped_at.is_some())
            .cloned()
            .collect()
    }

    /// Whether any voice is sounding at clock time `t`.
    pub fn is_audible_at(&self, t: f64) -> bool {
        self.voices.lock().iter().any(|v| {
            v.start <= t && t < v.end && v.stopped_at.map_or(true, |stopped| t < stopped)
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl PlaybackOutput for VirtualOutput {
    fn clock_time(&self) -> f64 {
        match &self.clock {
            Clock::Wall(origin) => origin.elapsed().as_secs_f64(),
            Clock::Manual(now) => *now.lock(),
        }
    }

    fn start(&self, buffer: PlaybackBuffer, at: f64) -> Result<VoiceId> {
        let id = VoiceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let start = at.max(self.clock_time());
        self.voices.lock().push(VirtualVoice {
            id,
            start,
            end: start + buffer.duration_secs(),
            sample_count: buffer.samples.len(),
            stopped_at: None,
        });
        Ok(id)
    }

    fn stop(&self, voice: VoiceId) {
        let now = self.clock_time();
        if let Some(v) = self
            .voices
            .lock()
            .iter_mut()
            .find(|v| v.id == voice && v.stopped_at.is_none())
        {
            v.stopped_at = Some(now);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl crate::audio::SpeakerSource for std::sync::Arc<VirtualOutput> {
    fn open(&self) -> Result<std::sync::Arc<dyn PlaybackOutput>> {
        Ok(self.clone())
    }
}
