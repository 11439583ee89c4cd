use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::{
    common::types::ClientId,
    protocol::{IncomingMessage, OutgoingMessage, handle_op},
    server::AppState,
};

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, msg: &OutgoingMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            error!("Failed to encode outgoing message: {}", e);
            Ok(())
        }
    }
}

pub async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let client_id = ClientId::generate();
    let mut events = state.engine.subscribe();
    info!("Control client connected: {}", client_id);

    let ready = OutgoingMessage::Ready {
        client_id: client_id.clone(),
        state: state.engine.state(),
    };
    if let Err(e) = send_json(&mut socket, &ready).await {
        warn!("Client {} went away before ready: {}", client_id, e);
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, {} events skipped", client_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = send_json(&mut socket, &OutgoingMessage::Event { event }).await {
                    error!("Socket send error: client={} err={}", client_id, e);
                    break;
                }
            }
            msg = socket.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket error: client={} err={}", client_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<IncomingMessage>(text.as_str()) {
                            Ok(op) => {
                                debug!("Client {} op: {:?}", client_id, op);
                                handle_op(op, &state.engine)
                                    .await
                                    .err()
                                    .map(|e| e.to_string())
                            }
                            Err(e) => Some(format!("invalid op: {}", e)),
                        };
                        if let Some(reason) = reply {
                            warn!("Rejected op from {}: {}", client_id, reason);
                            if send_json(&mut socket, &OutgoingMessage::Rejected { reason }).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    info!("Control client disconnected: {}", client_id);
}
