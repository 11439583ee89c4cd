use serde::Serialize;

use crate::{
    common::{errors::FaultKind, types::ClientId},
    playback::PlaybackState,
};

/// Notifications emitted by the playback engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    PlaybackStateChanged {
        state: PlaybackState,
    },
    FilteredPrompt {
        text: String,
        #[serde(rename = "filteredReason")]
        reason: String,
    },
    Error {
        message: String,
        kind: FaultKind,
    },
    ErrorCleared {
        message: String,
    },
}

/// Messages sent from server to a control client over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum OutgoingMessage {
    Ready {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        state: PlaybackState,
    },
    Event {
        #[serde(flatten)]
        event: EngineEvent,
    },
    /// Reply to a malformed or failed op.
    Rejected {
        reason: String,
    },
}
