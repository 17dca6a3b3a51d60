//! WebSocket client for the Lyria realtime music service.
//!
//! Wire protocol (JSON in text or binary frames):
//!
//! ```text
//! client → {"setup":{"model":"models/lyria-realtime-exp"}}
//! server ← {"setupComplete":{}}
//! client → {"clientContent":{"weightedPrompts":[{"text":"Shoegaze","weight":1.0}]}}
//! client → {"playbackControl":"PLAY"}
//! server ← {"serverContent":{"audioChunks":[{"data":"<base64 pcm16>","mimeType":"audio/l16;rate=48000;channels=2"}]}}
//! server ← {"filteredPrompt":{"text":"...","filteredReason":"..."}}
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{BackendError, MusicBackend, MusicSession, ServerEvent, SessionObserver};
use crate::primitives::{AudioChunk, FilteredPrompt, WeightedPrompt};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackControl {
    Play,
    Pause,
    Stop,
    ResetContext,
}

impl PlaybackControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackControl::Play => "PLAY",
            PlaybackControl::Pause => "PAUSE",
            PlaybackControl::Stop => "STOP",
            PlaybackControl::ResetContext => "RESET_CONTEXT",
        }
    }
}

/// Qualify a bare model id with the `models/` resource prefix.
pub fn model_resource(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

pub fn setup_message(model: &str) -> serde_json::Value {
    json!({ "setup": { "model": model_resource(model) } })
}

pub fn prompts_message(prompts: &[WeightedPrompt]) -> serde_json::Value {
    json!({ "clientContent": { "weightedPrompts": prompts } })
}

pub fn playback_control_message(control: PlaybackControl) -> serde_json::Value {
    json!({ "playbackControl": control.as_str() })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    filtered_prompt: Option<FilteredPromptWire>,
    warning: Option<String>,
    error: Option<ErrorWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    audio_chunks: Vec<AudioChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilteredPromptWire {
    #[serde(default)]
    text: String,
    #[serde(default)]
    filtered_reason: String,
}

#[derive(Debug, Deserialize)]
struct ErrorWire {
    #[serde(default)]
    message: String,
}

/// Translate one server frame into session events.
pub fn parse_server_message(text: &str) -> Result<Vec<ServerEvent>, BackendError> {
    let message: ServerMessage =
        serde_json::from_str(text).map_err(|e| BackendError::Protocol(e.to_string()))?;

    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }
    if let Some(filtered) = message.filtered_prompt {
        events.push(ServerEvent::FilteredPrompt(FilteredPrompt {
            text: filtered.text,
            reason: filtered.filtered_reason,
        }));
    }
    if let Some(content) = message.server_content {
        if !content.audio_chunks.is_empty() {
            events.push(ServerEvent::AudioChunks(content.audio_chunks));
        }
    }
    if let Some(warning) = message.warning {
        events.push(ServerEvent::Warning(warning));
    }
    if let Some(error) = message.error {
        events.push(ServerEvent::Error(error.message));
    }
    Ok(events)
}

/// Realtime music backend reached over a WebSocket.
pub struct LyriaBackend {
    endpoint: String,
    api_key: String,
}

impl LyriaBackend {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl MusicBackend for LyriaBackend {
    async fn connect(
        &self,
        model: &str,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<dyn MusicSession>, BackendError> {
        info!(endpoint = %self.endpoint, model = %model_resource(model), "connecting to music backend");

        let (mut ws, _response) = tokio_tungstenite::connect_async(self.url().as_str())
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;

        ws.send(WsMessage::text(setup_message(model).to_string()))
            .await
            .map_err(|e| BackendError::Connect(format!("sending setup: {e}")))?;

        tokio::time::timeout(SETUP_TIMEOUT, wait_for_setup(&mut ws))
            .await
            .map_err(|_| BackendError::Connect("timed out waiting for setupComplete".to_string()))??;

        info!("music backend setup complete");
        observer.on_event(ServerEvent::SetupComplete);

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(outbound_loop(rx, sink, Arc::clone(&observer)));
        tokio::spawn(inbound_loop(stream, observer));

        Ok(Arc::new(LyriaSession { outbound: tx }))
    }
}

async fn wait_for_setup(ws: &mut WsStream) -> Result<(), BackendError> {
    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text.to_string(),
            Ok(WsMessage::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_string(),
                Err(_) => continue,
            },
            Ok(WsMessage::Close(frame)) => {
                return Err(BackendError::Connect(format!(
                    "closed before setupComplete: {frame:?}"
                )))
            }
            Ok(_) => continue,
            Err(e) => return Err(BackendError::Connect(e.to_string())),
        };

        if parse_server_message(&text)?
            .iter()
            .any(|e| matches!(e, ServerEvent::SetupComplete))
        {
            return Ok(());
        }
    }
    Err(BackendError::Connect("stream ended before setupComplete".to_string()))
}

enum Outbound {
    Prompts(String, oneshot::Sender<Result<(), BackendError>>),
    Control(PlaybackControl),
}

struct LyriaSession {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl LyriaSession {
    fn control(&self, control: PlaybackControl) -> Result<(), BackendError> {
        self.outbound
            .send(Outbound::Control(control))
            .map_err(|_| BackendError::Closed)
    }
}

#[async_trait]
impl MusicSession for LyriaSession {
    async fn set_weighted_prompts(&self, prompts: &[WeightedPrompt]) -> Result<(), BackendError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let body = prompts_message(prompts).to_string();
        self.outbound
            .send(Outbound::Prompts(body, ack_tx))
            .map_err(|_| BackendError::Closed)?;
        ack_rx.await.map_err(|_| BackendError::Closed)?
    }

    fn play(&self) -> Result<(), BackendError> {
        self.control(PlaybackControl::Play)
    }

    fn pause(&self) -> Result<(), BackendError> {
        self.control(PlaybackControl::Pause)
    }

    fn stop(&self) -> Result<(), BackendError> {
        self.control(PlaybackControl::Stop)
    }

    fn reset_context(&self) -> Result<(), BackendError> {
        self.control(PlaybackControl::ResetContext)
    }
}

/// Writes queued messages until every session handle is dropped, then closes.
async fn outbound_loop(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut sink: SplitSink<WsStream, WsMessage>,
    observer: Arc<dyn SessionObserver>,
) {
    while let Some(message) = rx.recv().await {
        let result = match message {
            Outbound::Prompts(body, ack) => {
                let result = sink
                    .send(WsMessage::text(body))
                    .await
                    .map_err(|e| BackendError::Send(e.to_string()));
                let _ = ack.send(result.clone());
                result
            }
            Outbound::Control(control) => {
                debug!(control = control.as_str(), "playback control");
                sink.send(WsMessage::text(playback_control_message(control).to_string()))
                    .await
                    .map_err(|e| BackendError::Send(e.to_string()))
            }
        };

        if let Err(e) = result {
            warn!(error = %e, "music backend write failed");
            observer.on_event(ServerEvent::Error(e.to_string()));
            return;
        }
    }

    debug!("session handle dropped, closing socket");
    let _ = sink.send(WsMessage::Close(None)).await;
}

async fn inbound_loop(mut stream: SplitStream<WsStream>, observer: Arc<dyn SessionObserver>) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text.to_string(),
            Ok(WsMessage::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    warn!(len = data.len(), "non-UTF8 binary frame from music backend, skipping");
                    continue;
                }
            },
            Ok(WsMessage::Close(frame)) => {
                info!(close_frame = ?frame, "music backend closed the session");
                observer.on_event(ServerEvent::Closed(frame.map(|f| f.reason.to_string())));
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "music backend socket error");
                observer.on_event(ServerEvent::Error(e.to_string()));
                return;
            }
        };

        match parse_server_message(&text) {
            Ok(events) => {
                for event in events {
                    observer.on_event(event);
                }
            }
            Err(e) => warn!(error = %e, "unparseable frame from music backend"),
        }
    }

    observer.on_event(ServerEvent::Closed(None));
}
