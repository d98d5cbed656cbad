//! # playmate-core
//!
//! Live audio session manager for a child-facing voice playmate.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → capture thread
//!                                                    │ resample 16 kHz, 4096 blocks,
//!                                                    │ MicGate, gain, PCM16 encode
//!                                                    ▼
//!                                     frame pump → AgentChannel::send_audio
//!
//! AgentChannel inbound → dispatch task ─┬─ interrupted → PlaybackScheduler::interrupt
//!                                       ├─ audio chunk → decode → PlaybackScheduler::schedule
//!                                       └─ action      → ActionDispatcher::apply + ack
//! ```
//!
//! Audio callbacks never lock or allocate on the hot path. All heap work
//! happens on the capture thread and the session's tasks.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod actions;
pub mod audio;
pub mod buffering;
pub mod capture;
pub mod channel;
pub mod codec;
pub mod diagnostics;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;

// Convenience re-exports for downstream crates
pub use actions::{ActionCall, ActionDispatcher, AppAction, Screen, Shape};
pub use buffering::{AudioFrame, PlaybackBuffer};
pub use capture::MicGate;
pub use channel::{
    ActionTrigger, AgentChannel, AgentConnector, ChannelEvent, ChannelLink, InboundMessage,
    OutboundEvent, SessionSetup,
};
pub use error::{FriendlyMessage, PlaymateError};
pub use ipc::events::{SessionStatus, SessionStatusEvent};
pub use playback::{PlaybackOutput, PlaybackScheduler, VirtualOutput};
pub use session::{LiveSession, SessionConfig, SessionState};
