//! Voice session lifecycle.
//!
//! The controller owns the session state machine:
//!
//! ```text
//!          start                  pause
//!   Idle ────────► Capturing ◄──────────► Suspended
//!    ▲                 │        resume        │
//!    └─────────────────┴──────────────────────┘
//!                 stop / remote close / error
//! ```
//!
//! `start` brings up the microphone, the speaker and the realtime
//! connection in order and reverts cleanly if any step fails. Two tasks run
//! while a session is open: an outbound pump encoding capture frames into
//! media chunks, and a worker draining server events into transcripts,
//! scheduled audio and tool responses. The worker owns both audio devices,
//! so a remote close or transport error releases them even if the driver
//! never reacts. Pause detaches the capture tap only; the device and the
//! connection stay warm.
//!
//! Every exit path (local stop, remote close, transport error) funnels
//! through the same guarded teardown, so calling [`SessionController::stop`]
//! twice, or after the server already hung up, is a no-op.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::core::audio::{
    CAPTURE_MIME_TYPE, CaptureTap, MicCapture, PlaybackScheduler, SpeakerOutput, decode_chunk,
    encode_frame,
};
use crate::core::intents::{IntentDispatcher, declarations};
use crate::core::live::messages::{ClientMessage, ServerContent, ServerMessage, Setup, ToolCall};
use crate::core::live::{LiveConnection, LiveEvent};
use crate::core::prompts::live_system_instruction;
use crate::core::transcript::{Conversation, ConversationTurn, Speaker, TranscriptAggregator};
use crate::errors::AgentResult;

/// Depth of the session event channel consumed by the frontend.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of the voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session open; no devices held.
    Idle,
    /// Session open, microphone frames flowing.
    Capturing,
    /// Session open, capture tap detached.
    Suspended,
}

/// Events surfaced to the frontend while a session runs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The lifecycle state changed.
    StateChanged(SessionState),
    /// In-progress transcription for one speaker; `text` is the full
    /// accumulated buffer, suitable for live display.
    LiveTranscript { speaker: Speaker, text: String },
    /// A finalized turn was appended to the conversation.
    TurnCommitted(ConversationTurn),
    /// The connection ended on the server side or failed. The audio devices
    /// are already released at this point; the driver should still call
    /// [`SessionController::stop`] to settle the controller state.
    ConnectionLost { reason: Option<String> },
    /// A non-fatal error worth showing to the user.
    Error(String),
}

/// Resources held only while a session is open. The devices themselves
/// live in the worker task, which stops them on every exit path; the
/// controller keeps only the tap handle and the connection.
struct ActiveSession {
    tap: CaptureTap,
    connection: LiveConnection,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// Owns the voice session lifecycle and the resources behind it.
pub struct SessionController {
    config: AgentConfig,
    dispatcher: IntentDispatcher,
    conversation: Arc<Mutex<Conversation>>,
    events_tx: mpsc::Sender<SessionEvent>,
    state: SessionState,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// Build an idle controller. Returns the controller and the event
    /// stream the frontend should drain.
    pub fn new(
        config: AgentConfig,
        dispatcher: IntentDispatcher,
        conversation: Arc<Mutex<Conversation>>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (
            Self {
                config,
                dispatcher,
                conversation,
                events_tx,
                state: SessionState::Idle,
                active: None,
            },
            events_rx,
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open a session: microphone, speaker, realtime connection, in that
    /// order. No-op if a session is already open.
    ///
    /// # Errors
    ///
    /// Device or connection failures are returned after every resource
    /// acquired so far has been released; the controller is back in
    /// [`SessionState::Idle`].
    pub async fn start(&mut self) -> AgentResult<()> {
        if self.state != SessionState::Idle {
            tracing::debug!("start ignored, session already open");
            return Ok(());
        }

        let (mut capture, frames_rx) = MicCapture::start()?;

        let speaker = match SpeakerOutput::start() {
            Ok(speaker) => speaker,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };

        let setup = Setup::new(
            &self.config.live_model,
            &self.config.voice,
            live_system_instruction(self.config.language),
            declarations(),
        );
        let (connection, live_rx) = match LiveConnection::open(&self.config.api_key, setup).await {
            Ok(opened) => opened,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };

        speaker.play_cue();

        let tap = capture.tap();
        let cancel = CancellationToken::new();
        let pump = spawn_capture_pump(frames_rx, connection.sender(), cancel.clone());
        let worker = spawn_session_worker(
            live_rx,
            capture,
            speaker,
            self.dispatcher.clone(),
            self.conversation.clone(),
            connection.sender(),
            self.events_tx.clone(),
            cancel.clone(),
        );

        self.active = Some(ActiveSession {
            tap,
            connection,
            cancel,
            pump,
            worker,
        });
        self.set_state(SessionState::Capturing).await;
        tracing::info!("voice session started");
        Ok(())
    }

    /// Detach the capture tap. No-op unless currently capturing.
    pub async fn pause(&mut self) {
        if self.state != SessionState::Capturing {
            return;
        }
        if let Some(active) = &self.active {
            active.tap.detach();
        }
        self.set_state(SessionState::Suspended).await;
    }

    /// Re-attach the capture tap. No-op unless currently suspended.
    pub async fn resume(&mut self) {
        if self.state != SessionState::Suspended {
            return;
        }
        if let Some(active) = &self.active {
            active.tap.attach();
        }
        self.set_state(SessionState::Capturing).await;
    }

    /// Tear the session down: close the connection, stop both tasks,
    /// release the devices. Safe to call in any state, any number of times.
    pub async fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.cancel.cancel();
        active.connection.close().await;
        if let Err(e) = active.pump.await
            && !e.is_cancelled()
        {
            tracing::warn!("capture pump join failed: {e}");
        }
        if let Err(e) = active.worker.await
            && !e.is_cancelled()
        {
            tracing::warn!("session worker join failed: {e}");
        }

        self.set_state(SessionState::Idle).await;
        tracing::info!("voice session stopped");
    }

    /// Clear the conversation history. Refused while a session is open so
    /// an in-flight turn cannot land in an emptied transcript; returns
    /// whether the reset happened.
    pub fn reset_conversation(&mut self) -> bool {
        if self.state != SessionState::Idle {
            tracing::debug!("reset refused, session open");
            return false;
        }
        self.conversation.lock().reset();
        true
    }

    async fn set_state(&mut self, state: SessionState) {
        self.state = state;
        let _ = self.events_tx.send(SessionEvent::StateChanged(state)).await;
    }
}

/// Forward capture frames onto the wire as base64 media chunks.
fn spawn_capture_pump(
    mut frames_rx: mpsc::Receiver<Vec<f32>>,
    outbound: mpsc::Sender<ClientMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let msg = ClientMessage::media_chunk(CAPTURE_MIME_TYPE, encode_frame(&frame));
                    if outbound.send(msg).await.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("capture pump ended");
    })
}

/// Drain server events: transcripts into the aggregator, audio onto the
/// speaker, tool calls through the dispatcher. Owns both audio devices so
/// every exit path, a remote close and a transport error included, releases
/// them without any help from the driver.
#[allow(clippy::too_many_arguments)]
fn spawn_session_worker(
    mut live_rx: mpsc::Receiver<LiveEvent>,
    capture: MicCapture,
    speaker: SpeakerOutput,
    dispatcher: IntentDispatcher,
    conversation: Arc<Mutex<Conversation>>,
    outbound: mpsc::Sender<ClientMessage>,
    events_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut capture = capture;
        let mut speaker = speaker;
        let mut aggregator = TranscriptAggregator::new();
        let mut scheduler = PlaybackScheduler::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = live_rx.recv() => {
                    match event {
                        Some(LiveEvent::Message(msg)) => {
                            handle_server_message(
                                msg,
                                &mut aggregator,
                                &mut scheduler,
                                &speaker,
                                &dispatcher,
                                &conversation,
                                &outbound,
                                &events_tx,
                            )
                            .await;
                        }
                        Some(LiveEvent::Closed) => {
                            let _ = events_tx
                                .send(SessionEvent::ConnectionLost { reason: None })
                                .await;
                            break;
                        }
                        Some(LiveEvent::Error(e)) => {
                            let _ = events_tx.send(SessionEvent::Error(e.clone())).await;
                            let _ = events_tx
                                .send(SessionEvent::ConnectionLost { reason: Some(e) })
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        capture.tap().detach();
        capture.stop();
        speaker.stop();
        tracing::debug!("session worker ended");
    })
}

#[allow(clippy::too_many_arguments)]
async fn handle_server_message(
    msg: ServerMessage,
    aggregator: &mut TranscriptAggregator,
    scheduler: &mut PlaybackScheduler,
    speaker: &SpeakerOutput,
    dispatcher: &IntentDispatcher,
    conversation: &Arc<Mutex<Conversation>>,
    outbound: &mpsc::Sender<ClientMessage>,
    events_tx: &mpsc::Sender<SessionEvent>,
) {
    if let Some(content) = msg.server_content {
        for event in transcript_events(aggregator, &content) {
            let _ = events_tx.send(event).await;
        }

        if content.interrupted == Some(true) {
            tracing::debug!("generation interrupted, flushing playback queue");
            speaker.clear_pending();
            scheduler.reset();
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(inline) = part.inline_data else { continue };
                match decode_chunk(&inline.data) {
                    Ok(samples) => {
                        let chunk = scheduler.schedule(speaker.now_secs(), &samples);
                        speaker.submit(chunk);
                    }
                    Err(e) => tracing::warn!("skipping undecodable audio chunk: {e}"),
                }
            }
        }

        if content.turn_complete == Some(true) {
            let turns = aggregator.flush();
            conversation.lock().extend(turns.iter().cloned());
            for turn in turns {
                let _ = events_tx.send(SessionEvent::TurnCommitted(turn)).await;
            }
        }
    }

    if let Some(tool_call) = msg.tool_call {
        for response in tool_responses(dispatcher, &tool_call) {
            if outbound.send(response).await.is_err() {
                tracing::warn!("connection gone, dropping tool response");
                break;
            }
        }
    }

    if msg.go_away.is_some() {
        tracing::warn!("server signalled imminent close");
    }
}

/// Fold transcription deltas into the aggregator, producing one live event
/// per updated speaker buffer.
fn transcript_events(
    aggregator: &mut TranscriptAggregator,
    content: &ServerContent,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    if let Some(delta) = &content.input_transcription {
        let text = aggregator.append(Speaker::User, &delta.text).to_string();
        events.push(SessionEvent::LiveTranscript {
            speaker: Speaker::User,
            text,
        });
    }
    if let Some(delta) = &content.output_transcription {
        let text = aggregator
            .append(Speaker::Assistant, &delta.text)
            .to_string();
        events.push(SessionEvent::LiveTranscript {
            speaker: Speaker::Assistant,
            text,
        });
    }
    events
}

/// Execute every call in arrival order, one response message per call.
fn tool_responses(dispatcher: &IntentDispatcher, tool_call: &ToolCall) -> Vec<ClientMessage> {
    tool_call
        .function_calls
        .iter()
        .map(|call| {
            let result = dispatcher.dispatch(call);
            tracing::info!(call = %call.name, "function call handled");
            ClientMessage::tool_result(call.id.clone(), &call.name, result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::appointments::AppointmentStore;
    use crate::core::live::messages::TranscriptionDelta;
    use serde_json::json;

    fn dispatcher() -> (IntentDispatcher, Arc<Mutex<AppointmentStore>>) {
        let (store, _rx) = AppointmentStore::new();
        let store = Arc::new(Mutex::new(store));
        (IntentDispatcher::new(store.clone()), store)
    }

    #[test]
    fn test_transcript_events_accumulate_per_speaker() {
        let mut aggregator = TranscriptAggregator::new();

        let first = ServerContent {
            input_transcription: Some(TranscriptionDelta {
                text: "book an ".to_string(),
            }),
            ..Default::default()
        };
        let events = transcript_events(&mut aggregator, &first);
        assert_eq!(events.len(), 1);
        let SessionEvent::LiveTranscript { speaker, text } = &events[0] else {
            panic!("expected live transcript");
        };
        assert_eq!(*speaker, Speaker::User);
        assert_eq!(text, "book an ");

        let second = ServerContent {
            input_transcription: Some(TranscriptionDelta {
                text: "appointment".to_string(),
            }),
            output_transcription: Some(TranscriptionDelta {
                text: "Sure, ".to_string(),
            }),
            ..Default::default()
        };
        let events = transcript_events(&mut aggregator, &second);
        assert_eq!(events.len(), 2);
        let SessionEvent::LiveTranscript { text, .. } = &events[0] else {
            panic!("expected live transcript");
        };
        assert_eq!(text, "book an appointment");
    }

    #[test]
    fn test_tool_responses_preserve_order_and_ids() {
        let (dispatcher, store) = dispatcher();
        let tool_call: ToolCall = serde_json::from_value(json!({
            "functionCalls": [
                { "id": "c1", "name": "bookAppointment", "args": {
                    "name": "Jane Doe", "email": "jane@example.com",
                    "date": "2024-09-01", "time": "3 PM",
                    "doctor": "Dr. Smith", "clinic": "Downtown Clinic"
                } },
                { "id": "c2", "name": "editAppointment", "args": {
                    "patientName": "Jane Doe", "newTime": "4 PM"
                } }
            ]
        }))
        .unwrap();

        let responses = tool_responses(&dispatcher, &tool_call);
        assert_eq!(responses.len(), 2);
        assert_eq!(store.lock().len(), 1);
        assert_eq!(store.lock().all()[0].time, "4 PM");

        let first = serde_json::to_value(&responses[0]).unwrap();
        assert_eq!(first["toolResponse"]["functionResponses"][0]["id"], "c1");
        let second = serde_json::to_value(&responses[1]).unwrap();
        assert_eq!(second["toolResponse"]["functionResponses"][0]["id"], "c2");
        assert!(
            second["toolResponse"]["functionResponses"][0]["response"]["result"]
                .as_str()
                .unwrap()
                .contains("updated successfully")
        );
    }

    #[test]
    fn test_unrecognized_function_still_gets_a_response() {
        let (dispatcher, _store) = dispatcher();
        let tool_call: ToolCall = serde_json::from_value(json!({
            "functionCalls": [{ "name": "cancelAppointment", "args": {} }]
        }))
        .unwrap();

        let responses = tool_responses(&dispatcher, &tool_call);
        assert_eq!(responses.len(), 1);
        let value = serde_json::to_value(&responses[0]).unwrap();
        assert_eq!(
            value["toolResponse"]["functionResponses"][0]["response"]["result"],
            "Function not recognized."
        );
    }

    fn worker_under_test(
        dispatcher: IntentDispatcher,
    ) -> (
        CaptureTap,
        mpsc::Sender<LiveEvent>,
        mpsc::Receiver<SessionEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let conversation = Arc::new(Mutex::new(Conversation::new()));
        let (live_tx, live_rx) = mpsc::channel(8);
        let (outbound_tx, _outbound_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(8);

        let capture = MicCapture::inert();
        let tap = capture.tap();

        let worker = spawn_session_worker(
            live_rx,
            capture,
            SpeakerOutput::inert(),
            dispatcher,
            conversation,
            outbound_tx,
            events_tx,
            CancellationToken::new(),
        );
        (tap, live_tx, events_rx, worker)
    }

    #[tokio::test]
    async fn test_remote_close_releases_capture_without_driver_stop() {
        let (dispatcher, _store) = dispatcher();
        let (tap, live_tx, mut events_rx, worker) = worker_under_test(dispatcher);
        assert!(tap.is_attached());

        live_tx.send(LiveEvent::Closed).await.unwrap();
        worker.await.unwrap();

        // The worker tore the capture side down on its own; no stop() call
        // from the driver was involved.
        assert!(!tap.is_attached());
        let event = events_rx.recv().await.unwrap();
        assert!(matches!(
            event,
            SessionEvent::ConnectionLost { reason: None }
        ));
    }

    #[tokio::test]
    async fn test_transport_error_releases_capture_and_reports_reason() {
        let (dispatcher, _store) = dispatcher();
        let (tap, live_tx, mut events_rx, worker) = worker_under_test(dispatcher);

        live_tx
            .send(LiveEvent::Error("io error".to_string()))
            .await
            .unwrap();
        worker.await.unwrap();

        assert!(!tap.is_attached());
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            SessionEvent::Error(_)
        ));
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            SessionEvent::ConnectionLost { reason: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_controller_guards_without_open_session() {
        let (dispatcher, _store) = dispatcher();
        let config = AgentConfig {
            api_key: "k".to_string(),
            live_model: "m".to_string(),
            text_model: "t".to_string(),
            voice: "Zephyr".to_string(),
            language: crate::config::Language::English,
            webhook_url: None,
        };
        let conversation = Arc::new(Mutex::new(Conversation::new()));
        let (mut controller, mut events_rx) =
            SessionController::new(config, dispatcher, conversation.clone());

        assert_eq!(controller.state(), SessionState::Idle);

        // Pause, resume and stop are all no-ops while idle.
        controller.pause().await;
        controller.resume().await;
        controller.stop().await;
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(events_rx.try_recv().is_err());

        // Reset is allowed while idle.
        conversation
            .lock()
            .push(ConversationTurn::now(Speaker::User, "hi"));
        assert!(controller.reset_conversation());
        assert!(conversation.lock().turns().is_empty());
    }
}
