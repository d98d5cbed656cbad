//! Inbound message routing.
//!
//! Per message: interruption short-circuits everything else, then audio, then
//! action triggers. Messages are handled one at a time in delivery order by the
//! session's dispatch task.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    actions::ActionDispatcher,
    channel::{ActionTrigger, AgentChannel, InboundMessage},
    codec,
    diagnostics::SessionDiagnostics,
    error::Result,
    playback::PlaybackScheduler,
};

/// What one inbound message turned into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub interrupted: bool,
    pub scheduled: bool,
    pub actions_applied: usize,
    pub acks_sent: usize,
}

pub struct InboundRouter {
    pub scheduler: Arc<PlaybackScheduler>,
    pub channel: Arc<dyn AgentChannel>,
    pub dispatcher: Arc<dyn ActionDispatcher>,
    pub diagnostics: Arc<SessionDiagnostics>,
    /// Sample rate of inbound speech chunks.
    pub agent_sample_rate: u32,
}

impl InboundRouter {
    /// Route one message. Fails only when an acknowledgement cannot be sent
    /// because the transport is gone; the remaining triggers are skipped.
    pub fn handle(&self, message: InboundMessage) -> Result<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();

        if message.interrupted {
            // Any audio in the same message belongs to the interrupted turn.
            self.scheduler.interrupt();
            SessionDiagnostics::bump(&self.diagnostics.interruptions);
            info!(
                discarded_audio = message.audio_chunk.is_some(),
                "agent interrupted"
            );
            outcome.interrupted = true;
            return Ok(outcome);
        }

        if let Some(bytes) = message.audio_chunk {
            outcome.scheduled = self.play(&bytes);
        }

        for trigger in message.action_triggers {
            let (applied, acked) = self.apply(trigger)?;
            outcome.actions_applied += usize::from(applied);
            outcome.acks_sent += usize::from(acked);
        }

        Ok(outcome)
    }

    fn play(&self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }
        let buffer = match codec::decode_pcm16(bytes, self.agent_sample_rate) {
            Ok(buffer) => buffer,
            Err(e) => {
                SessionDiagnostics::bump(&self.diagnostics.chunks_dropped);
                warn!(len = bytes.len(), "dropping inbound audio chunk: {e}");
                return false;
            }
        };
        match self.scheduler.schedule(buffer) {
            Some(slot) => {
                SessionDiagnostics::bump(&self.diagnostics.chunks_scheduled);
                debug!(
                    start = slot.start,
                    duration = slot.duration,
                    audible = slot.audible,
                    "scheduled agent speech"
                );
                true
            }
            None => false,
        }
    }

    /// Apply one trigger and acknowledge it. The ack is sent even when the
    /// dispatcher rejects the action so the agent never waits on it.
    fn apply(&self, trigger: ActionTrigger) -> Result<(bool, bool)> {
        let ActionTrigger { id, call } = trigger;
        let applied = match self.dispatcher.apply(&call) {
            Ok(()) => {
                SessionDiagnostics::bump(&self.diagnostics.actions_applied);
                info!(name = call.name.as_str(), id = id.as_str(), "action applied");
                true
            }
            Err(e) => {
                SessionDiagnostics::bump(&self.diagnostics.actions_failed);
                warn!(name = call.name.as_str(), id = id.as_str(), "action rejected: {e}");
                false
            }
        };

        let acked = match self.channel.send_action_ack(&call.name, &id) {
            Ok(()) => {
                SessionDiagnostics::bump(&self.diagnostics.acks_sent);
                true
            }
            Err(e) if e.is_recoverable() => {
                warn!(name = call.name.as_str(), id = id.as_str(), "failed to send ack: {e}");
                false
            }
            Err(e) => return Err(e),
        };
        Ok((applied, acked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionCall;
    use crate::buffering::AGENT_SAMPLE_RATE;
    use crate::channel::OutboundEvent;
    use crate::error::{PlaymateError, Result};
    use crate::playback::{OutputMute, VirtualOutput};
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<OutboundEvent>>);

    impl AgentChannel for Recorder {
        fn send(&self, event: OutboundEvent) -> Result<()> {
            self.0.lock().push(event);
            Ok(())
        }
    }

    #[derive(Default)]
    struct OnlyShapes(Mutex<Vec<ActionCall>>);

    impl ActionDispatcher for OnlyShapes {
        fn apply(&self, action: &ActionCall) -> Result<()> {
            if action.name != "drawShape" {
                return Err(PlaymateError::UnknownAction(action.name.clone()));
            }
            self.0.lock().push(action.clone());
            Ok(())
        }
    }

    fn router() -> (InboundRouter, Arc<VirtualOutput>, Arc<Recorder>, Arc<OnlyShapes>) {
        let output = Arc::new(VirtualOutput::manual());
        let channel = Arc::new(Recorder::default());
        let dispatcher = Arc::new(OnlyShapes::default());
        let router = InboundRouter {
            scheduler: Arc::new(PlaybackScheduler::new(output.clone(), OutputMute::default())),
            channel: channel.clone(),
            dispatcher: dispatcher.clone(),
            diagnostics: Arc::new(SessionDiagnostics::default()),
            agent_sample_rate: AGENT_SAMPLE_RATE,
        };
        (router, output, channel, dispatcher)
    }

    fn pcm(samples: usize) -> Vec<u8> {
        vec![0x10; samples * 2]
    }

    fn trigger(id: &str, name: &str, args: serde_json::Value) -> ActionTrigger {
        ActionTrigger {
            id: id.into(),
            call: ActionCall::new(name, args),
        }
    }

    #[test]
    fn interruption_discards_coexisting_audio_and_actions() {
        let (router, output, channel, dispatcher) = router();
        let outcome = router.handle(InboundMessage {
            interrupted: true,
            audio_chunk: Some(pcm(2_400)),
            action_triggers: vec![trigger("a", "drawShape", json!({"shape": "sun"}))],
        })
        .expect("channel open");
        assert!(outcome.interrupted);
        assert!(output.started().is_empty());
        assert!(dispatcher.0.lock().is_empty());
        assert!(channel.0.lock().is_empty());
        assert_eq!(router.diagnostics.snapshot().interruptions, 1);
    }

    #[test]
    fn audio_then_actions_in_one_message() {
        let (router, output, channel, _dispatcher) = router();
        let outcome = router.handle(InboundMessage {
            interrupted: false,
            audio_chunk: Some(pcm(2_400)),
            action_triggers: vec![trigger("a", "drawShape", json!({"shape": "sun"}))],
        })
        .expect("channel open");
        assert!(outcome.scheduled);
        assert_eq!(outcome.actions_applied, 1);
        assert_eq!(output.started().len(), 1);
        assert_eq!(channel.0.lock().len(), 1);
    }

    #[test]
    fn rejected_action_is_still_acknowledged() {
        let (router, _output, channel, _dispatcher) = router();
        let outcome = router
            .handle(InboundMessage::action(trigger("x9", "launchRocket", json!({}))))
            .expect("channel open");
        assert_eq!(outcome.actions_applied, 0);
        assert_eq!(outcome.acks_sent, 1);
        assert_eq!(
            *channel.0.lock(),
            vec![OutboundEvent::ActionAck {
                name: "launchRocket".into(),
                id: "x9".into()
            }]
        );
        assert_eq!(router.diagnostics.snapshot().actions_failed, 1);
    }

    #[test]
    fn undecodable_chunk_is_dropped() {
        let (router, output, _channel, _dispatcher) = router();
        let outcome = router
            .handle(InboundMessage::audio(vec![1, 2, 3]))
            .expect("channel open");
        assert!(!outcome.scheduled);
        assert!(output.started().is_empty());
        assert_eq!(router.diagnostics.snapshot().chunks_dropped, 1);
    }

    struct Hungup;

    impl AgentChannel for Hungup {
        fn send(&self, _event: OutboundEvent) -> Result<()> {
            Err(PlaymateError::ChannelClosed)
        }
    }

    #[test]
    fn ack_on_closed_channel_is_reported() {
        let (mut router, _output, _channel, dispatcher) = router();
        router.channel = Arc::new(Hungup);
        let result = router.handle(InboundMessage {
            interrupted: false,
            audio_chunk: None,
            action_triggers: vec![
                trigger("a", "drawShape", json!({"shape": "sun"})),
                trigger("b", "drawShape", json!({"shape": "tree"})),
            ],
        });
        assert!(matches!(result, Err(PlaymateError::ChannelClosed)));
        assert_eq!(dispatcher.0.lock().len(), 1);
        assert_eq!(router.diagnostics.snapshot().acks_sent, 0);
    }
}
