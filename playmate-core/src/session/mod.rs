//! `LiveSession`: lifecycle controller for one real-time voice conversation.
//!
//! ## Lifecycle
//!
//! ```text
//! LiveSession::new()                  state = Connecting
//!     └─► start(mic, speaker, agent)
//!             speaker opened, capture thread opened, agent handshake
//!             ├─ ok   → Active: frame pump, inbound dispatch, greeting timer
//!             └─ err  → Error(friendly reason)
//!         Active ─► channel closed → Closed
//!                ─► channel fault  → Error
//!                ─► stop()         → Closed
//! ```
//!
//! `start` never fails because of devices or the network: those outcomes are
//! reported through [`LiveSession::state`] and the status broadcast. Terminal
//! states release the microphone, stop playback and close the channel; no
//! frame is sent after that.
//!
//! ## Tasks
//!
//! | task | owns | ordering |
//! |------|------|----------|
//! | capture thread | microphone stream | FIFO into an unbounded channel |
//! | frame pump | frame receiver | forwards to `send_audio` in capture order |
//! | dispatch | inbound receiver | one message at a time, delivery order |
//! | greeting | nothing | fires once after the settle delay |

pub mod dispatch;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::{
    actions::ActionDispatcher,
    audio::{output::CpalSpeaker, CpalMicrophone, MicrophoneSource, SpeakerSource, VoiceProcessing},
    buffering::{AudioFrame, AGENT_SAMPLE_RATE},
    capture::{CaptureHandle, CaptureSettings, MicGate},
    channel::{AgentChannel, AgentConnector, ChannelEvent, SessionSetup},
    diagnostics::{DiagnosticsSnapshot, SessionDiagnostics},
    error::{FriendlyMessage, PlaymateError, Result},
    ipc::events::{SessionStatus, SessionStatusEvent},
    playback::{OutputMute, PlaybackScheduler},
};

use dispatch::InboundRouter;

/// Status broadcast capacity.
const BROADCAST_CAP: usize = 64;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for one `LiveSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capture: CaptureSettings,
    /// Delay between reaching `Active` and sending the session-start event.
    pub settle_delay: Duration,
    /// Sample rate of inbound agent speech.
    pub agent_sample_rate: u32,
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub voice_processing: VoiceProcessing,
    pub mic_enabled: bool,
    pub output_muted: bool,
    pub setup: SessionSetup,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            agent_sample_rate: AGENT_SAMPLE_RATE,
            preferred_input_device: None,
            preferred_output_device: None,
            voice_processing: VoiceProcessing::default(),
            mic_enabled: true,
            output_muted: false,
            setup: SessionSetup::default(),
        }
    }
}

impl SessionConfig {
    /// The system microphone as configured here.
    pub fn microphone(&self) -> CpalMicrophone {
        CpalMicrophone {
            preferred_device: self.preferred_input_device.clone(),
            processing: self.voice_processing,
        }
    }

    /// The system speaker as configured here.
    pub fn speaker(&self) -> CpalSpeaker {
        CpalSpeaker {
            preferred_device: self.preferred_output_device.clone(),
        }
    }
}

/// Lifecycle state. Changes only through transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
    /// Carries the child-facing reason.
    Error(String),
}

impl SessionState {
    pub fn error(message: FriendlyMessage) -> Self {
        SessionState::Error(message.as_str().to_string())
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Connecting => SessionStatus::Connecting,
            SessionState::Active => SessionStatus::Active,
            SessionState::Closed => SessionStatus::Closed,
            SessionState::Error(_) => SessionStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    fn event(&self) -> SessionStatusEvent {
        SessionStatusEvent {
            status: self.status(),
            detail: match self {
                SessionState::Error(reason) => Some(reason.clone()),
                _ => None,
            },
        }
    }
}

/// State shared between the handle and its tasks.
struct Shared {
    state: Mutex<SessionState>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    shutdown_tx: watch::Sender<bool>,
    /// Capture blocks are only forwarded while set.
    armed: Arc<AtomicBool>,
    capture: Mutex<Option<CaptureHandle>>,
    scheduler: Mutex<Option<Arc<PlaybackScheduler>>>,
    channel: Mutex<Option<Arc<dyn AgentChannel>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl Shared {
    fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Apply a transition. Terminal states are final and `Active` is only
    /// reachable from `Connecting`.
    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        let allowed = match (&*state, &next) {
            (current, _) if current.is_terminal() => false,
            (SessionState::Connecting, SessionState::Active) => true,
            (_, SessionState::Closed | SessionState::Error(_)) => true,
            _ => false,
        };
        if !allowed {
            debug!(from = ?*state, to = ?next, "ignoring session transition");
            return false;
        }
        info!(from = ?*state, to = ?next, "session state changed");
        let event = next.event();
        *state = next;
        drop(state);
        let _ = self.status_tx.send(event);
        true
    }

    /// Enter a terminal state and release everything. Idempotent.
    fn finish(&self, terminal: SessionState) {
        if !self.transition(terminal) {
            return;
        }
        self.armed.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);
        if let Some(capture) = self.capture.lock().as_ref() {
            capture.signal_stop();
        }
        if let Some(scheduler) = self.scheduler.lock().as_ref() {
            scheduler.shutdown();
        }
        if let Some(channel) = self.channel.lock().take() {
            channel.close();
        }
        let snap = self.diagnostics.snapshot();
        info!(
            frames_sent = snap.frames_sent,
            blocks_gated = snap.blocks_gated,
            chunks_scheduled = snap.chunks_scheduled,
            chunks_dropped = snap.chunks_dropped,
            interruptions = snap.interruptions,
            actions_applied = snap.actions_applied,
            acks_sent = snap.acks_sent,
            "session finished"
        );
    }

    fn fail(&self, err: &PlaymateError) {
        error!("session failed: {err}");
        self.finish(SessionState::error(err.friendly()));
    }

    /// Outbound sends only fail when the transport is gone.
    fn on_send_error(&self, err: PlaymateError) {
        match err {
            PlaymateError::ChannelClosed => {
                info!("agent channel closed while sending");
                self.finish(SessionState::Closed);
            }
            err if err.is_recoverable() => warn!("outbound event dropped: {err}"),
            err => self.fail(&err),
        }
    }

    fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

/// One real-time voice conversation with the remote agent.
///
/// `LiveSession` is `Send + Sync`; all fields use interior mutability.
pub struct LiveSession {
    config: SessionConfig,
    dispatcher: Arc<dyn ActionDispatcher>,
    mic_gate: MicGate,
    mute: OutputMute,
    started: AtomicBool,
    shared: Arc<Shared>,
    span: Span,
}

impl LiveSession {
    /// Create a session in `Connecting`. Nothing is opened until `start`.
    pub fn new(config: SessionConfig, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (shutdown_tx, _) = watch::channel(false);
        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let mic_gate = MicGate::new(config.mic_enabled);
        let mute = OutputMute::new(config.output_muted);

        Self {
            config,
            dispatcher,
            mic_gate,
            mute,
            started: AtomicBool::new(false),
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Connecting),
                status_tx,
                shutdown_tx,
                armed: Arc::new(AtomicBool::new(false)),
                capture: Mutex::new(None),
                scheduler: Mutex::new(None),
                channel: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                diagnostics: Arc::new(SessionDiagnostics::default()),
            }),
            span: info_span!("session", session_id),
        }
    }

    /// Acquire devices, connect to the agent and start streaming.
    ///
    /// Returns the state reached: `Active` on success, otherwise a terminal
    /// state with a friendly reason.
    ///
    /// # Errors
    /// Only `PlaymateError::AlreadyRunning` when called twice.
    pub async fn start(
        &self,
        microphone: Box<dyn MicrophoneSource>,
        speaker: &dyn SpeakerSource,
        connector: &dyn AgentConnector,
    ) -> Result<SessionState> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PlaymateError::AlreadyRunning);
        }
        let span = self.span.clone();
        self.run_startup(microphone, speaker, connector)
            .instrument(span)
            .await;
        Ok(self.state())
    }

    async fn run_startup(
        &self,
        microphone: Box<dyn MicrophoneSource>,
        speaker: &dyn SpeakerSource,
        connector: &dyn AgentConnector,
    ) {
        let shared = &self.shared;
        shared.diagnostics.reset();
        let _ = shared.status_tx.send(SessionState::Connecting.event());
        info!("session starting");

        // ── Speaker ──────────────────────────────────────────────────────────
        let output = match speaker.open() {
            Ok(output) => output,
            Err(e) => return shared.fail(&e),
        };
        let scheduler = Arc::new(PlaybackScheduler::new(output, self.mute.clone()));
        *shared.scheduler.lock() = Some(Arc::clone(&scheduler));

        // ── Microphone (opened on the capture thread) ────────────────────────
        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<AudioFrame>();
        let capture = match CaptureHandle::spawn(
            microphone,
            self.config.capture,
            Arc::clone(&shared.armed),
            self.mic_gate.clone(),
            frames_tx,
            Arc::clone(&shared.diagnostics),
        )
        .await
        {
            Ok(capture) => capture,
            Err(e) => return shared.fail(&e),
        };
        info!(device_rate = capture.device_rate(), "microphone open");
        *shared.capture.lock() = Some(capture);
        if shared.state().is_terminal() {
            // Stopped while the device was opening.
            shared.finish(SessionState::Closed);
            return;
        }

        // ── Agent handshake ──────────────────────────────────────────────────
        let link = match connector.connect(&self.config.setup).await {
            Ok(link) => link,
            Err(e) => {
                error!("agent connect failed: {e}");
                return shared.finish(SessionState::error(FriendlyMessage::ConnectionLost));
            }
        };
        let channel = link.outbound;
        *shared.channel.lock() = Some(Arc::clone(&channel));

        if !shared.transition(SessionState::Active) {
            // A stop raced the handshake; release what we just opened.
            channel.close();
            shared.finish(SessionState::Closed);
            return;
        }
        shared.armed.store(true, Ordering::Release);

        let router = InboundRouter {
            scheduler,
            channel: Arc::clone(&channel),
            dispatcher: Arc::clone(&self.dispatcher),
            diagnostics: Arc::clone(&shared.diagnostics),
            agent_sample_rate: self.config.agent_sample_rate,
        };

        let span = Span::current();
        let tasks = vec![
            tokio::spawn(
                pump_frames(Arc::clone(shared), Arc::clone(&channel), frames_rx)
                    .instrument(span.clone()),
            ),
            tokio::spawn(
                dispatch_inbound(Arc::clone(shared), router, link.inbound)
                    .instrument(span.clone()),
            ),
            tokio::spawn(
                send_greeting(Arc::clone(shared), channel, self.config.settle_delay)
                    .instrument(span),
            ),
        ];
        shared.tasks.lock().extend(tasks);
        info!("session active");
    }

    /// End the session and wait until the microphone is released and every
    /// session task has exited. Safe to call in any state, any number of times.
    pub async fn stop(&self) {
        self.shared.finish(SessionState::Closed);
        let capture = self.shared.capture.lock().take();
        if let Some(mut capture) = capture {
            capture.stop().await;
        }
        let tasks: Vec<_> = self.shared.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("session task ended abnormally: {e}");
            }
        }
        info!(parent: &self.span, "session stopped");
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    /// UI mic toggle. Never touches the session itself.
    pub fn set_mic_enabled(&self, enabled: bool) {
        self.mic_gate.set_open(enabled);
    }

    pub fn is_mic_enabled(&self) -> bool {
        self.mic_gate.is_open()
    }

    pub fn mic_gate(&self) -> MicGate {
        self.mic_gate.clone()
    }

    /// UI output mute. While muted, agent speech elapses silently.
    pub fn set_output_muted(&self, muted: bool) {
        self.mute.set(muted);
        debug!(parent: &self.span, muted, "output mute toggled");
    }

    pub fn is_output_muted(&self) -> bool {
        self.mute.is_muted()
    }

    /// Whether agent speech is currently scheduled past the output clock.
    /// For UI feedback only.
    pub fn is_speaking(&self) -> bool {
        self.shared
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(|s| s.is_speaking())
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.shared.finish(SessionState::Closed);
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means the session is gone.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Forward capture frames to the agent in capture order.
async fn pump_frames(
    shared: Arc<Shared>,
    channel: Arc<dyn AgentChannel>,
    mut frames_rx: mpsc::UnboundedReceiver<AudioFrame>,
) {
    let mut shutdown = shared.shutdown_signal();
    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            frame = frames_rx.recv() => {
                let Some(frame) = frame else { break };
                match channel.send_audio(frame) {
                    Ok(()) => SessionDiagnostics::bump(&shared.diagnostics.frames_sent),
                    Err(e) => {
                        shared.on_send_error(e);
                        break;
                    }
                }
            }
        }
    }
    debug!("frame pump stopped");
}

/// Process inbound events strictly in delivery order.
async fn dispatch_inbound(
    shared: Arc<Shared>,
    router: InboundRouter,
    mut inbound: mpsc::Receiver<ChannelEvent>,
) {
    let mut shutdown = shared.shutdown_signal();
    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            event = inbound.recv() => match event {
                Some(ChannelEvent::Message(message)) => match router.handle(message) {
                    Ok(outcome) => debug!(?outcome, "inbound message handled"),
                    Err(e) => {
                        shared.on_send_error(e);
                        break;
                    }
                },
                Some(ChannelEvent::Closed { reason }) => {
                    info!(reason = reason.as_deref().unwrap_or("none"), "agent closed the channel");
                    shared.finish(SessionState::Closed);
                    break;
                }
                Some(ChannelEvent::Fault(reason)) => {
                    shared.fail(&PlaymateError::Transport(reason));
                    break;
                }
                None => {
                    info!("agent channel ended");
                    shared.finish(SessionState::Closed);
                    break;
                }
            }
        }
    }
    debug!("inbound dispatch stopped");
}

/// Send the single session-start event once local plumbing has settled.
async fn send_greeting(shared: Arc<Shared>, channel: Arc<dyn AgentChannel>, delay: Duration) {
    let mut shutdown = shared.shutdown_signal();
    tokio::select! {
        biased;
        _ = wait_for_shutdown(&mut shutdown) => {}
        _ = tokio::time::sleep(delay) => {
            if shared.state() != SessionState::Active {
                return;
            }
            match channel.send_session_start() {
                Ok(()) => info!("session start sent"),
                Err(e) => shared.on_send_error(e),
            }
        }
    }
}
