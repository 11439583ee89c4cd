use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    Connection, MusicSession, SessionConnector, SessionEvent, WeightedPrompt,
    messages::{ClientMessage, PlaybackControl, ServerMessage},
};
use crate::{common::errors::SessionError, configs::SessionConfig};

const WRITE_TASK_SHUTDOWN_MS: u64 = 500;

/// Opens websocket sessions against the music-generation endpoint.
pub struct LiveMusicConnector {
    config: SessionConfig,
}

impl LiveMusicConnector {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionConnector for LiveMusicConnector {
    async fn connect(&self) -> Result<Connection, SessionError> {
        let key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| SessionError::MissingApiKey(self.config.api_key_env.clone()))?;
        let url = format!("{}?key={}", self.config.endpoint, urlencoding::encode(&key));
        debug!("Connecting to music service: {}", self.config.endpoint);

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let setup = ClientMessage::Setup {
            model: self.config.model.clone(),
        };
        write
            .send(Message::Text(serde_json::to_string(&setup)?.into()))
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let timeout_ms = self.config.setup_timeout_ms;
        tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            loop {
                let msg = match read.next().await {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(SessionError::Connect(e.to_string())),
                    None => return Err(SessionError::Connect("stream ended during setup".into())),
                };
                match msg {
                    Message::Close(frame) => {
                        let reason = frame
                            .map(|cf| cf.reason.to_string())
                            .unwrap_or_else(|| "no reason".into());
                        return Err(SessionError::Connect(format!("closed during setup: {}", reason)));
                    }
                    other => {
                        if let Some(parsed) = parse_frame(&other) {
                            if parsed.is_setup_complete() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        })
        .await
        .map_err(|_| SessionError::SetupTimeout(timeout_ms))??;

        if let Some(generation) = &self.config.generation {
            let msg = ClientMessage::MusicGenerationConfig(generation.clone());
            write
                .send(Message::Text(serde_json::to_string(&msg)?.into()))
                .await
                .map_err(|e| SessionError::Connect(e.to_string()))?;
        }

        info!("Music session ready (model {})", self.config.model);

        let cancel = CancellationToken::new();
        let flushed = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = flume::unbounded();

        let write_task = tokio::spawn(pump_writes(write, rx, cancel.clone(), flushed.clone()));

        let read_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = read_cancel.cancelled() => break,
                    msg = read.next() => {
                        let msg = match msg {
                            Some(Ok(msg)) => msg,
                            Some(Err(e)) => {
                                let _ = event_tx.send(SessionEvent::Error(e.to_string()));
                                break;
                            }
                            None => {
                                let _ = event_tx.send(SessionEvent::Closed {
                                    code: 1006,
                                    reason: "stream ended".into(),
                                });
                                break;
                            }
                        };

                        if let Message::Close(frame) = msg {
                            let (code, reason) = frame
                                .map(|cf| (cf.code.into(), cf.reason.to_string()))
                                .unwrap_or((1000u16, "No reason".into()));
                            info!("Music session closed: code={}, reason='{}'", code, reason);
                            let _ = event_tx.send(SessionEvent::Closed { code, reason });
                            break;
                        }

                        if let Some(parsed) = parse_frame(&msg) {
                            for event in parsed.into_events() {
                                if event_tx.send(event).is_err() {
                                    read_cancel.cancel();
                                    return;
                                }
                            }
                        }
                    }
                }
            }
            read_cancel.cancel();
            let _ = tokio::time::timeout(
                Duration::from_millis(WRITE_TASK_SHUTDOWN_MS),
                write_task,
            )
            .await;
        });

        Ok(Connection {
            session: Arc::new(LiveMusicSession {
                tx,
                cancel,
                flushed,
            }),
            events: event_rx,
        })
    }
}

/// Forward queued frames to the socket. Frames queued before `cancel` fires
/// are still written before the close frame.
async fn pump_writes<S>(
    mut write: S,
    mut rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
    flushed: CancellationToken,
) where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write.send(msg).await {
                    warn!("Music session write error: {}", e);
                    break;
                }
            }
            _ = cancel.cancelled() => {
                while let Ok(msg) = rx.try_recv() {
                    if let Err(e) = write.send(msg).await {
                        warn!("Music session write error: {}", e);
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = write.close().await;
    flushed.cancel();
}

fn parse_frame(msg: &Message) -> Option<ServerMessage> {
    let bytes: &[u8] = match msg {
        Message::Text(text) => text.as_str().as_bytes(),
        Message::Binary(bin) => bin.as_ref(),
        _ => return None,
    };
    match serde_json::from_slice::<ServerMessage>(bytes) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            trace!("Ignoring unparseable music service frame: {}", e);
            None
        }
    }
}

/// Handle to an open websocket session. Dropping it tears the socket down.
pub struct LiveMusicSession {
    tx: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    /// Fired by the write task once the socket is closed.
    flushed: CancellationToken,
}

impl LiveMusicSession {
    fn send(&self, msg: &ClientMessage) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let json = serde_json::to_string(msg)?;
        self.tx
            .send(Message::Text(json.into()))
            .map_err(|_| SessionError::Closed)
    }
}

#[async_trait]
impl MusicSession for LiveMusicSession {
    async fn play(&self) -> Result<(), SessionError> {
        self.send(&ClientMessage::PlaybackControl(PlaybackControl::Play))
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.send(&ClientMessage::PlaybackControl(PlaybackControl::Pause))
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.send(&ClientMessage::PlaybackControl(PlaybackControl::Stop))
    }

    async fn set_weighted_prompts(&self, prompts: Vec<WeightedPrompt>) -> Result<(), SessionError> {
        if prompts.is_empty() {
            return Err(SessionError::Rejected(
                "at least one weighted prompt is required".into(),
            ));
        }
        self.send(&ClientMessage::ClientContent {
            weighted_prompts: prompts,
        })
    }

    async fn close(&self) {
        self.cancel.cancel();
        let flush = Duration::from_millis(WRITE_TASK_SHUTDOWN_MS);
        if tokio::time::timeout(flush, self.flushed.cancelled()).await.is_err() {
            warn!("Music session did not flush within {:?}", flush);
        }
    }
}

impl Drop for LiveMusicSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
