//! Realtime WebSocket connection to the generative backend.
//!
//! `LiveConnection::open` performs the full handshake: connect, send the
//! setup message, wait for the backend's `setupComplete`. After that a
//! spawned task pumps the socket: outbound [`ClientMessage`]s from an mpsc
//! channel onto the wire, inbound frames decoded into [`LiveEvent`]s for
//! the session controller. Close and error both surface as events so the
//! controller can run one teardown path for every exit.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::core::live::messages::{ClientMessage, ServerMessage, Setup};
use crate::errors::{AgentError, AgentResult};

/// BidiGenerateContent WebSocket endpoint.
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Channel capacity for outbound messages. Deep enough to absorb a burst of
/// capture frames without backpressuring the encoder.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Inbound events delivered to the session controller.
#[derive(Debug)]
pub enum LiveEvent {
    /// A decoded server message.
    Message(ServerMessage),
    /// The server closed the connection.
    Closed,
    /// The connection failed mid-session.
    Error(String),
}

/// An open realtime connection.
///
/// The handle is the exclusive owner of the socket task; dropping it or
/// calling [`LiveConnection::close`] tears the socket down.
pub struct LiveConnection {
    outbound: mpsc::Sender<ClientMessage>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveConnection {
    /// Connect, send the setup message and wait for the backend to accept
    /// it. Returns the connection handle and the inbound event stream.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Connection`] if the socket cannot be opened or
    /// the backend closes/rejects during setup.
    pub async fn open(
        api_key: &str,
        setup: Setup,
    ) -> AgentResult<(Self, mpsc::Receiver<LiveEvent>)> {
        let url = format!("{LIVE_ENDPOINT}?key={api_key}");
        let (ws, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| AgentError::Connection(e.to_string()))?;
        tracing::info!("realtime socket connected");

        let (mut sink, mut stream) = ws.split();

        let setup_json = serde_json::to_string(&ClientMessage::Setup(setup))
            .map_err(|e| AgentError::Protocol(e.to_string()))?;
        sink.send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| AgentError::Connection(format!("failed to send setup: {e}")))?;

        // The backend acknowledges the setup before any media may flow.
        loop {
            let frame = stream
                .next()
                .await
                .ok_or_else(|| AgentError::Connection("closed during setup".to_string()))?
                .map_err(|e| AgentError::Connection(e.to_string()))?;
            match decode_frame(&frame) {
                Some(msg) if msg.setup_complete.is_some() => break,
                Some(msg) if msg.is_empty() => continue,
                Some(_) => {
                    return Err(AgentError::Connection(
                        "unexpected message before setupComplete".to_string(),
                    ));
                }
                None => {
                    if matches!(frame, Message::Close(_)) {
                        return Err(AgentError::Connection(
                            "server closed during setup".to_string(),
                        ));
                    }
                }
            }
        }
        tracing::info!("realtime session accepted");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<LiveEvent>(OUTBOUND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }

                    outgoing = outbound_rx.recv() => {
                        let Some(msg) = outgoing else { break };
                        let json = match serde_json::to_string(&msg) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!("failed to serialize client message: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            tracing::error!("websocket send failed: {e}");
                            let _ = events_tx.send(LiveEvent::Error(e.to_string())).await;
                            break;
                        }
                    }

                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(Message::Ping(data))) => {
                                let _ = sink.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("websocket closed by server");
                                let _ = events_tx.send(LiveEvent::Closed).await;
                                break;
                            }
                            Some(Ok(frame)) => {
                                match decode_frame(&frame) {
                                    Some(msg) => {
                                        if events_tx.send(LiveEvent::Message(msg)).await.is_err() {
                                            break;
                                        }
                                    }
                                    None => tracing::trace!("ignoring non-JSON frame"),
                                }
                            }
                            Some(Err(e)) => {
                                tracing::error!("websocket error: {e}");
                                let _ = events_tx.send(LiveEvent::Error(e.to_string())).await;
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!("realtime connection task ended");
        });

        Ok((
            Self {
                outbound: outbound_tx,
                cancel,
                task: Some(task),
            },
            events_rx,
        ))
    }

    /// Sender half for outbound messages; pump tasks hold a clone so they
    /// can enqueue frames without borrowing the connection.
    pub fn sender(&self) -> mpsc::Sender<ClientMessage> {
        self.outbound.clone()
    }

    /// Close the connection. Idempotent: closing an already-closed
    /// connection is a no-op.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            tracing::warn!("connection task join failed: {e}");
        }
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        // Last-resort release if the controller never ran close().
        self.cancel.cancel();
    }
}

/// Decode one WebSocket frame into a server message. The backend sends JSON
/// in both text and binary frames. Malformed payloads are logged and
/// skipped, matching the tolerant-read policy of the session loop.
fn decode_frame(frame: &Message) -> Option<ServerMessage> {
    let text: std::borrow::Cow<'_, str> = match frame {
        Message::Text(text) => text.as_str().into(),
        Message::Binary(bytes) => String::from_utf8_lossy(bytes),
        _ => return None,
    };
    match serde_json::from_str::<ServerMessage>(&text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!("failed to parse server message: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_frame_text_and_binary() {
        let json = r#"{"serverContent":{"turnComplete":true}}"#;
        let from_text = decode_frame(&Message::Text(json.to_string().into())).unwrap();
        assert_eq!(
            from_text.server_content.unwrap().turn_complete,
            Some(true)
        );

        let from_binary = decode_frame(&Message::Binary(json.as_bytes().to_vec().into())).unwrap();
        assert!(from_binary.server_content.is_some());
    }

    #[test]
    fn test_decode_frame_skips_malformed_and_control() {
        assert!(decode_frame(&Message::Text("{not json".to_string().into())).is_none());
        assert!(decode_frame(&Message::Pong(vec![].into())).is_none());
    }

    #[test]
    fn test_endpoint_url_shape() {
        let url = format!("{LIVE_ENDPOINT}?key=abc");
        assert!(url.starts_with("wss://generativelanguage.googleapis.com/ws/"));
        assert!(url.ends_with("BidiGenerateContent?key=abc"));
    }
}
