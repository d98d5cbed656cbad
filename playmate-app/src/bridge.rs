//! Agent connector backed by a sidecar process.
//!
//! The sidecar owns the network connection to the conversational agent and
//! speaks newline-delimited JSON on stdio. Each line is one tagged object:
//!
//! ```text
//! → {"type":"setup", ...SessionSetup}
//! ← {"type":"ready"}
//! → {"type":"audio","data":"<base64 pcm16>","mimeType":"audio/pcm;rate=16000"}
//! → {"type":"sessionStart"}
//! → {"type":"actionAck","name":"drawShape","id":"call-1"}
//! ← {"type":"message","interrupted":true,"audio":"<base64>","actions":[...]}
//! ← {"type":"closed","reason":"..."}
//! ← {"type":"fault","reason":"..."}
//! ```
//!
//! Anything the sidecar writes to stderr goes straight to ours.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use playmate_core::{
    channel::{
        ActionTrigger, AgentChannel, AgentConnector, ChannelEvent, ChannelLink, InboundMessage,
        OutboundEvent, SessionSetup,
    },
    codec,
    error::{PlaymateError, Result},
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const EXIT_GRACE: Duration = Duration::from_secs(2);
const INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum WireOut<'a> {
    Setup(&'a SessionSetup),
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    SessionStart,
    ActionAck { name: String, id: String },
}

impl WireOut<'_> {
    fn from_event(event: OutboundEvent) -> Self {
        match event {
            OutboundEvent::Audio(frame) => WireOut::Audio {
                data: codec::encode_base64(frame.as_bytes()),
                mime_type: frame.mime_type(),
            },
            OutboundEvent::SessionStart => WireOut::SessionStart,
            OutboundEvent::ActionAck { name, id } => WireOut::ActionAck { name, id },
        }
    }

    fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| PlaymateError::Transport(format!("could not encode bridge message: {e}")))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum WireIn {
    Ready,
    Message {
        #[serde(default)]
        interrupted: bool,
        #[serde(default)]
        audio: Option<String>,
        #[serde(default)]
        actions: Vec<ActionTrigger>,
    },
    Closed {
        #[serde(default)]
        reason: Option<String>,
    },
    Fault {
        reason: String,
    },
}

impl WireIn {
    /// `None` for `ready`, which only has meaning during the handshake.
    fn into_event(self) -> Option<ChannelEvent> {
        match self {
            WireIn::Ready => None,
            WireIn::Message {
                interrupted,
                audio,
                actions,
            } => {
                // A broken chunk loses only its audio; interruption and actions still count.
                let audio_chunk = audio.and_then(|text| match codec::decode_base64(&text) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!("dropping inbound audio chunk: {e}");
                        None
                    }
                });
                Some(ChannelEvent::Message(InboundMessage {
                    interrupted,
                    audio_chunk,
                    action_triggers: actions,
                }))
            }
            WireIn::Closed { reason } => Some(ChannelEvent::Closed { reason }),
            WireIn::Fault { reason } => Some(ChannelEvent::Fault(reason)),
        }
    }
}

fn parse_line(line: &str) -> Option<WireIn> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("ignoring malformed bridge line: {e}");
            None
        }
    }
}

/// Launches the sidecar once per session.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    program: String,
    args: Vec<String>,
}

impl BridgeConnector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Program followed by its arguments. `None` when empty.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PlaymateError::Transport(format!("failed to launch bridge '{}': {e}", self.program))
            })
    }
}

#[async_trait]
impl AgentConnector for BridgeConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<ChannelLink> {
        let mut child = self.spawn()?;
        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(PlaymateError::Transport("bridge stdio was not captured".into()));
        };
        info!(program = %self.program, "bridge started");

        let setup_line = WireOut::Setup(setup).to_line()?;
        write_line(&mut stdin, &setup_line).await?;

        let mut lines = BufReader::new(stdout).lines();
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, await_ready(&mut lines)).await {
            Ok(Ok(())) => debug!("bridge handshake complete"),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(PlaymateError::Transport("bridge handshake timed out".into())),
        }

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(pump_stdin(stdin, line_rx));
        tokio::spawn(pump_stdout(lines, child, event_tx, stop_rx));

        Ok(ChannelLink {
            outbound: Arc::new(BridgeChannel {
                lines: Mutex::new(Some(line_tx)),
                stop: Mutex::new(Some(stop_tx)),
            }),
            inbound: event_rx,
        })
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

async fn await_ready(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<()> {
    loop {
        let Some(line) = lines.next_line().await? else {
            return Err(PlaymateError::Transport("bridge exited during handshake".into()));
        };
        match parse_line(&line) {
            Some(WireIn::Ready) => return Ok(()),
            Some(WireIn::Fault { reason }) => return Err(PlaymateError::Transport(reason)),
            Some(WireIn::Closed { reason }) => {
                return Err(PlaymateError::Transport(
                    reason.unwrap_or_else(|| "bridge refused the session".into()),
                ))
            }
            Some(WireIn::Message { .. }) => warn!("bridge sent a message before ready; ignoring"),
            None => {}
        }
    }
}

async fn pump_stdin(mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = write_line(&mut stdin, &line).await {
            warn!("bridge stdin closed: {e}");
            return;
        }
    }
    debug!("outbound closed; releasing bridge stdin");
}

async fn pump_stdout(
    mut lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    events: mpsc::Sender<ChannelEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let Some(event) = parse_line(&line).and_then(WireIn::into_event) else {
                        continue;
                    };
                    let terminal = !matches!(event, ChannelEvent::Message(_));
                    if events.send(event).await.is_err() || terminal {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = events.send(ChannelEvent::Closed { reason: None }).await;
                    break;
                }
                Err(e) => {
                    let _ = events.send(ChannelEvent::Fault(e.to_string())).await;
                    break;
                }
            }
        }
    }
    reap(child).await;
}

async fn reap(mut child: Child) {
    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "bridge exited"),
        Ok(Err(e)) => warn!("failed to wait for bridge: {e}"),
        Err(_) => {
            warn!("bridge did not exit after close; killing");
            if let Err(e) = child.kill().await {
                warn!("failed to kill bridge: {e}");
            }
        }
    }
}

/// Outbound half handed to the session.
struct BridgeChannel {
    lines: Mutex<Option<mpsc::UnboundedSender<String>>>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl AgentChannel for BridgeChannel {
    fn send(&self, event: OutboundEvent) -> Result<()> {
        let line = WireOut::from_event(event).to_line()?;
        let guard = self.lines.lock();
        let tx = guard.as_ref().ok_or(PlaymateError::ChannelClosed)?;
        tx.send(line).map_err(|_| PlaymateError::ChannelClosed)
    }

    fn close(&self) {
        // Dropping the sender lets the writer flush and close stdin.
        self.lines.lock().take();
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playmate_core::ActionCall;
    use serde_json::json;

    #[test]
    fn outbound_lines_are_tagged_camel_case() {
        let frame = codec::encode(&[0.0, 0.5]);
        let line = WireOut::from_event(OutboundEvent::Audio(frame))
            .to_line()
            .expect("encode");
        let value: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(value["type"], "audio");
        assert_eq!(value["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(value["data"], codec::encode_base64(&[0, 0, 0x00, 0x40]));

        let ack = WireOut::from_event(OutboundEvent::ActionAck {
            name: "navigate".into(),
            id: "c1".into(),
        })
        .to_line()
        .expect("encode");
        assert_eq!(ack, r#"{"type":"actionAck","name":"navigate","id":"c1"}"#);
        assert_eq!(
            WireOut::SessionStart.to_line().expect("encode"),
            r#"{"type":"sessionStart"}"#
        );
    }

    #[test]
    fn setup_line_carries_tools() {
        let setup = SessionSetup::default();
        let line = WireOut::Setup(&setup).to_line().expect("encode");
        let value: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(value["type"], "setup");
        assert_eq!(value["voice"], "Kore");
        assert_eq!(value["tools"].as_array().map(Vec::len), Some(5));
    }

    #[test]
    fn inbound_message_maps_all_fields() {
        let audio = codec::encode_base64(&[1, 0, 2, 0]);
        let line = json!({
            "type": "message",
            "interrupted": true,
            "audio": audio,
            "actions": [{"id": "a1", "name": "drawShape", "args": {"shape": "sun"}}]
        })
        .to_string();
        let event = parse_line(&line)
            .and_then(WireIn::into_event)
            .expect("event");
        let ChannelEvent::Message(msg) = event else {
            panic!("expected message, got {event:?}");
        };
        assert!(msg.interrupted);
        assert_eq!(msg.audio_chunk.as_deref(), Some(&[1u8, 0, 2, 0][..]));
        assert_eq!(msg.action_triggers.len(), 1);
        assert_eq!(
            msg.action_triggers[0].call,
            ActionCall::new("drawShape", json!({"shape": "sun"}))
        );
    }

    #[test]
    fn bad_audio_keeps_the_rest_of_the_message() {
        let line = r#"{"type":"message","audio":"%%%","actions":[{"id":"x","name":"navigate","arguments":{"screen":"MENU"}}]}"#;
        let Some(ChannelEvent::Message(msg)) = parse_line(line).and_then(WireIn::into_event) else {
            panic!("expected message");
        };
        assert!(msg.audio_chunk.is_none());
        assert_eq!(msg.action_triggers[0].id, "x");
    }

    #[test]
    fn malformed_and_blank_lines_are_skipped() {
        assert!(parse_line("").is_none());
        assert!(parse_line("hello").is_none());
        assert!(parse_line(r#"{"type":"dance"}"#).is_none());
        assert!(matches!(
            parse_line(r#"{"type":"closed"}"#).and_then(WireIn::into_event),
            Some(ChannelEvent::Closed { reason: None })
        ));
    }

    #[test]
    fn empty_command_has_no_connector() {
        assert!(BridgeConnector::from_command(&[]).is_none());
        let c = BridgeConnector::from_command(&["node".into(), "bridge.js".into()]).expect("cmd");
        assert_eq!(c.program, "node");
        assert_eq!(c.args, vec!["bridge.js".to_string()]);
    }

    #[tokio::test]
    async fn missing_program_fails_to_connect() {
        let c = BridgeConnector::new("/nonexistent/playmate-bridge", vec![]);
        let err = c
            .connect(&SessionSetup::default())
            .await
            .err()
            .expect("must fail");
        assert!(matches!(err, PlaymateError::Transport(_)));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> BridgeConnector {
        BridgeConnector::new("sh", vec!["-c".into(), script.into()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sidecar_round_trip() {
        let script = r#"
            read -r setup
            case "$setup" in *'"type":"setup"'*) ;; *) exit 3 ;; esac
            echo '{"type":"ready"}'
            echo 'not json'
            echo '{"type":"message","interrupted":true}'
            read -r start
            case "$start" in *sessionStart*) echo '{"type":"closed","reason":"bye"}' ;; *) echo '{"type":"fault","reason":"unexpected"}' ;; esac
        "#;
        let mut link = sh(script)
            .connect(&SessionSetup::default())
            .await
            .expect("connect");

        let first = link.inbound.recv().await.expect("event");
        assert_eq!(first, ChannelEvent::Message(InboundMessage::interruption()));

        link.outbound.send_session_start().expect("send");
        let second = link.inbound.recv().await.expect("event");
        assert_eq!(
            second,
            ChannelEvent::Closed {
                reason: Some("bye".into())
            }
        );

        link.outbound.close();
        assert!(matches!(
            link.outbound.send_session_start(),
            Err(PlaymateError::ChannelClosed)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn refused_handshake_reports_reason() {
        let script = r#"
            read -r setup
            echo '{"type":"fault","reason":"invalid api key"}'
        "#;
        let err = sh(script)
            .connect(&SessionSetup::default())
            .await
            .err()
            .expect("must fail");
        assert!(err.to_string().contains("invalid api key"), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sidecar_exit_closes_inbound() {
        let script = r#"
            read -r setup
            echo '{"type":"ready"}'
        "#;
        let mut link = sh(script)
            .connect(&SessionSetup::default())
            .await
            .expect("connect");
        assert_eq!(
            link.inbound.recv().await,
            Some(ChannelEvent::Closed { reason: None })
        );
    }
}
