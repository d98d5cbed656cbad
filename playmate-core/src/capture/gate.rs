//! Mic gate: the UI toggle that decides whether captured audio leaves the device.
//!
//! Single writer (the UI), many readers (the capture loop reads it once per
//! block). Reads are relaxed: a toggle may take one block to be honoured,
//! which never affects correctness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MicGate {
    open: Arc<AtomicBool>,
}

impl MicGate {
    pub fn new(open: bool) -> Self {
        Self {
            open: Arc::new(AtomicBool::new(open)),
        }
    }

    /// Allow or block outbound microphone audio. Never touches the session.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Relaxed);
        tracing::debug!(open, "mic gate toggled");
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

impl Default for MicGate {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let gate = MicGate::default();
        let reader = gate.clone();
        assert!(reader.is_open());
        gate.set_open(false);
        assert!(!reader.is_open());
    }
}
