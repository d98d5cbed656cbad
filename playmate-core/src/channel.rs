//! The agent channel: an opaque bidirectional event stream to the remote
//! conversational agent.
//!
//! The session only needs three outbound operations and one inbound stream.
//! How events are framed on the wire (WebSocket, sidecar process, test
//! double) is the connector's business.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::actions::{tool_declarations, ActionCall, ToolDeclaration};
use crate::buffering::AudioFrame;
use crate::error::Result;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Kore";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    #[default]
    Audio,
    Text,
}

/// Everything the agent needs to know when the channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub response_modality: ResponseModality,
    pub tools: Vec<ToolDeclaration>,
}

impl Default for SessionSetup {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: String::new(),
            response_modality: ResponseModality::Audio,
            tools: tool_declarations(),
        }
    }
}

/// Events the session sends to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// One encoded capture block.
    Audio(AudioFrame),
    /// Synthetic turn that triggers the agent's greeting.
    SessionStart,
    /// Confirms that an action trigger was handled.
    ActionAck { name: String, id: String },
}

/// One remote action request, identified so it can be acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTrigger {
    pub id: String,
    #[serde(flatten)]
    pub call: ActionCall,
}

/// One inbound message. Any combination of fields may be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    pub interrupted: bool,
    /// Little-endian PCM16 mono at the agent output rate.
    pub audio_chunk: Option<Vec<u8>>,
    pub action_triggers: Vec<ActionTrigger>,
}

impl InboundMessage {
    pub fn interruption() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }

    pub fn audio(bytes: Vec<u8>) -> Self {
        Self {
            audio_chunk: Some(bytes),
            ..Self::default()
        }
    }

    pub fn action(trigger: ActionTrigger) -> Self {
        Self {
            action_triggers: vec![trigger],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.interrupted && self.audio_chunk.is_none() && self.action_triggers.is_empty()
    }
}

/// What the inbound stream yields.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(InboundMessage),
    /// The remote side ended the conversation.
    Closed { reason: Option<String> },
    /// Unrecoverable transport failure.
    Fault(String),
}

/// Outbound half of an open channel.
///
/// `send` must not block: it is called from the frame pump and from the
/// dispatch task, and a slow transport must queue rather than stall them.
pub trait AgentChannel: Send + Sync + 'static {
    fn send(&self, event: OutboundEvent) -> Result<()>;

    fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        self.send(OutboundEvent::Audio(frame))
    }

    fn send_session_start(&self) -> Result<()> {
        self.send(OutboundEvent::SessionStart)
    }

    fn send_action_ack(&self, name: &str, id: &str) -> Result<()> {
        self.send(OutboundEvent::ActionAck {
            name: name.to_string(),
            id: id.to_string(),
        })
    }

    /// Release the transport. Called once on teardown.
    fn close(&self) {}
}

/// An open channel: the outbound handle plus the ordered inbound stream.
pub struct ChannelLink {
    pub outbound: Arc<dyn AgentChannel>,
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

/// Performs the handshake with the remote agent.
#[async_trait]
pub trait AgentConnector: Send + Sync + 'static {
    async fn connect(&self, setup: &SessionSetup) -> Result<ChannelLink>;
}
