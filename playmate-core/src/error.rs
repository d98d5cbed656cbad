use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device-level failures. Always fatal to the session that hit them.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("no input device found")]
    NoInputDevice,

    #[error("no output device found")]
    NoOutputDevice,

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("unsupported device configuration: {0}")]
    Unsupported(String),
}

/// All errors produced by playmate-core.
#[derive(Debug, Error)]
pub enum PlaymateError {
    #[error("audio device error: {0}")]
    Device(#[from] DeviceError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("agent channel is closed")]
    ChannelClosed,

    #[error("could not decode inbound audio: {0}")]
    Decode(String),

    #[error("could not encode outbound audio: {0}")]
    Encoding(String),

    #[error("invalid arguments for action `{name}`: {reason}")]
    InvalidAction { name: String, reason: String },

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlaymateError>;

/// The only texts a child ever sees when something goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FriendlyMessage {
    MicrophonePermission,
    SpeakerUnavailable,
    ConnectionLost,
    SomethingWentWrong,
}

impl FriendlyMessage {
    pub fn as_str(self) -> &'static str {
        match self {
            FriendlyMessage::MicrophonePermission => "microphone permission required",
            FriendlyMessage::SpeakerUnavailable => "speaker not available",
            FriendlyMessage::ConnectionLost => "lost connection to your playmate",
            FriendlyMessage::SomethingWentWrong => "something went wrong",
        }
    }
}

impl std::fmt::Display for FriendlyMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PlaymateError {
    /// Map any error onto the fixed set of child-facing messages.
    pub fn friendly(&self) -> FriendlyMessage {
        match self {
            PlaymateError::Device(DeviceError::NoOutputDevice) => {
                FriendlyMessage::SpeakerUnavailable
            }
            PlaymateError::Device(_) => FriendlyMessage::MicrophonePermission,
            PlaymateError::Transport(_) | PlaymateError::ChannelClosed => {
                FriendlyMessage::ConnectionLost
            }
            _ => FriendlyMessage::SomethingWentWrong,
        }
    }

    /// Whether the failure only affects one frame/chunk/action and the session
    /// should carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlaymateError::Decode(_)
                | PlaymateError::Encoding(_)
                | PlaymateError::InvalidAction { .. }
                | PlaymateError::UnknownAction(_)
        )
    }
}
