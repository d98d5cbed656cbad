//! Session counters, updated lock-free from the capture thread and the
//! dispatch task and read by the host for status displays.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub samples_in: AtomicUsize,
    pub blocks_captured: AtomicUsize,
    pub blocks_gated: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub chunks_scheduled: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub interruptions: AtomicUsize,
    pub actions_applied: AtomicUsize,
    pub actions_failed: AtomicUsize,
    pub acks_sent: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            blocks_gated: self.blocks_gated.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            actions_applied: self.actions_applied.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn counters(&self) -> [&AtomicUsize; 10] {
        [
            &self.samples_in,
            &self.blocks_captured,
            &self.blocks_gated,
            &self.frames_sent,
            &self.chunks_scheduled,
            &self.chunks_dropped,
            &self.interruptions,
            &self.actions_applied,
            &self.actions_failed,
            &self.acks_sent,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub blocks_captured: usize,
    pub blocks_gated: usize,
    pub frames_sent: usize,
    pub chunks_scheduled: usize,
    pub chunks_dropped: usize,
    pub interruptions: usize,
    pub actions_applied: usize,
    pub actions_failed: usize,
    pub acks_sent: usize,
}
