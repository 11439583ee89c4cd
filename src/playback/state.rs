use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::protocol::EngineEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Loading,
    Playing,
    Paused,
}

impl PlaybackState {
    /// Whether incoming audio is accepted onto the timeline.
    pub fn accepts_audio(self) -> bool {
        matches!(self, Self::Loading | Self::Playing)
    }
}

/// The single owner of the playback state.
///
/// Every method is total: a call that is invalid for the current state is a
/// no-op and returns `false`. Effective transitions are published on both
/// the event stream and the watch channel.
pub struct PlaybackStateMachine {
    state: PlaybackState,
    watch_tx: watch::Sender<PlaybackState>,
    events: broadcast::Sender<EngineEvent>,
}

impl PlaybackStateMachine {
    pub fn new(events: broadcast::Sender<EngineEvent>) -> Self {
        let (watch_tx, _) = watch::channel(PlaybackState::Stopped);
        Self {
            state: PlaybackState::Stopped,
            watch_tx,
            events,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn watch(&self) -> watch::Receiver<PlaybackState> {
        self.watch_tx.subscribe()
    }

    /// `stopped|paused → loading`; `loading → stopped` (toggle).
    pub fn play(&mut self) -> bool {
        match self.state {
            PlaybackState::Stopped | PlaybackState::Paused => self.transition(PlaybackState::Loading),
            PlaybackState::Loading => self.transition(PlaybackState::Stopped),
            PlaybackState::Playing => false,
        }
    }

    /// `playing|loading → paused`.
    pub fn pause(&mut self) -> bool {
        match self.state {
            PlaybackState::Playing | PlaybackState::Loading => self.transition(PlaybackState::Paused),
            _ => false,
        }
    }

    pub fn stop(&mut self) -> bool {
        self.transition(PlaybackState::Stopped)
    }

    /// Buffer horizon reached: `loading → playing`.
    pub fn promote(&mut self) -> bool {
        match self.state {
            PlaybackState::Loading => self.transition(PlaybackState::Playing),
            _ => false,
        }
    }

    /// Underrun: `playing → loading`.
    pub fn rebuffer(&mut self) -> bool {
        match self.state {
            PlaybackState::Playing => self.transition(PlaybackState::Loading),
            _ => false,
        }
    }

    fn transition(&mut self, next: PlaybackState) -> bool {
        if self.state == next {
            return false;
        }
        debug!("Playback state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.watch_tx.send_replace(next);
        let _ = self
            .events
            .send(EngineEvent::PlaybackStateChanged { state: next });
        true
    }
}
