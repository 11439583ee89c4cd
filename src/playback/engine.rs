//! The playback engine actor.
//!
//! One task owns the state machine, the chunk scheduler, the prompt
//! publisher, every deferred timer and the session slot. User intents arrive
//! as [`Command`]s through an [`EngineHandle`]; session notifications,
//! connection results and timer fires are serialized through the same loop,
//! so no two handlers ever interleave.

use std::sync::Arc;

use serde::Serialize;
use tokio::{
    sync::{broadcast, oneshot, watch},
    time::Instant,
};
use tracing::{debug, info, trace, warn};

use super::{
    publisher::{PromptPublisher, Throttle},
    scheduler::{ChunkScheduler, Placement},
    state::{PlaybackState, PlaybackStateMachine},
    timer::TimerSlot,
};
use crate::{
    audio::{
        AudioClock, RenderGraph,
        constants::{SILENT_GAIN, UNITY_GAIN},
    },
    common::{
        errors::{CONNECTION_ERROR_MESSAGE, EngineError, FaultKind, NO_ACTIVE_PROMPTS_MESSAGE, SessionError},
        types::{Shared, shared},
    },
    configs::PlaybackConfig,
    decoder::Decoder,
    protocol::{EngineEvent, Prompt},
    session::{AudioChunk, Connection, MusicSession, SessionConnector, SessionEvent},
};

const EVENT_CAPACITY: usize = 64;

pub enum Command {
    Play { prompts: Vec<Prompt> },
    Pause,
    Stop,
    PlayPause { prompts: Vec<Prompt> },
    SetWeightedPrompts { prompts: Vec<Prompt> },
    SetMasterVolume(f32),
    SetFadeEnabled(bool),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    /// Stop without a fade, close the session, and end the engine task.
    Shutdown(oneshot::Sender<()>),
}

/// Messages the engine posts to itself from spawned work.
enum Internal {
    Connected {
        attempt: u64,
        result: Result<Connection, SessionError>,
    },
    Promote(u64),
    FadeCleanup(u64),
    PublishTrailing(u64),
}

enum SessionSlot {
    Idle,
    Connecting { attempt: u64 },
    Ready(Arc<dyn MusicSession>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cleanup {
    Pause,
    Stop,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub state: PlaybackState,
    pub session: SessionStatus,
    pub next_start_time: f64,
    pub scheduled_sources: usize,
    pub underruns: u64,
    pub master_volume: f32,
    pub output_gain: f32,
    pub tone_db: f32,
    pub fade_enabled: bool,
    pub cleanup_pending: bool,
    pub prompts: Vec<Prompt>,
    pub filtered_prompts: Vec<String>,
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: flume::Sender<Command>,
    state: watch::Receiver<PlaybackState>,
    events: broadcast::Sender<EngineEvent>,
    graph: Shared<RenderGraph>,
}

impl EngineHandle {
    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send_async(command).await?;
        Ok(())
    }

    pub async fn play(&self, prompts: Vec<Prompt>) -> Result<(), EngineError> {
        self.send(Command::Play { prompts }).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.send(Command::Pause).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop).await
    }

    pub async fn play_pause(&self, prompts: Vec<Prompt>) -> Result<(), EngineError> {
        self.send(Command::PlayPause { prompts }).await
    }

    pub async fn set_weighted_prompts(&self, prompts: Vec<Prompt>) -> Result<(), EngineError> {
        self.send(Command::SetWeightedPrompts { prompts }).await
    }

    pub async fn set_master_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.send(Command::SetMasterVolume(volume)).await
    }

    pub async fn set_fade_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.send(Command::SetFadeEnabled(enabled)).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Resolves once the session has been stopped and closed. The engine
    /// rejects every later command.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// A metering tap on the final output signal.
    pub fn add_meter_tap(&self) -> flume::Receiver<Arc<[f32]>> {
        self.graph.lock().add_tap()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    pub fn graph(&self) -> Shared<RenderGraph> {
        self.graph.clone()
    }
}

pub struct PlaybackEngine {
    config: PlaybackConfig,
    connector: Arc<dyn SessionConnector>,
    decoder: Arc<dyn Decoder>,
    clock: Arc<dyn AudioClock>,
    graph: Shared<RenderGraph>,
    machine: PlaybackStateMachine,
    scheduler: ChunkScheduler,
    publisher: PromptPublisher,
    events: broadcast::Sender<EngineEvent>,
    prompts: Vec<Prompt>,
    fade_enabled: bool,
    slot: SessionSlot,
    session_events: Option<flume::Receiver<SessionEvent>>,
    play_requested: bool,
    next_attempt: u64,
    promotion: TimerSlot,
    fade_cleanup: TimerSlot,
    pending_cleanup: Option<Cleanup>,
    publish_timer: TimerSlot,
    commands: flume::Receiver<Command>,
    internal_tx: flume::Sender<Internal>,
    internal_rx: flume::Receiver<Internal>,
}

/// Build an engine and run it on its own task.
pub fn spawn(
    config: PlaybackConfig,
    connector: Arc<dyn SessionConnector>,
    decoder: Arc<dyn Decoder>,
    clock: Arc<dyn AudioClock>,
    prompts: Vec<Prompt>,
) -> EngineHandle {
    let (engine, handle) = PlaybackEngine::new(config, connector, decoder, clock, prompts);
    tokio::spawn(engine.run());
    handle
}

impl PlaybackEngine {
    pub fn new(
        config: PlaybackConfig,
        connector: Arc<dyn SessionConnector>,
        decoder: Arc<dyn Decoder>,
        clock: Arc<dyn AudioClock>,
        prompts: Vec<Prompt>,
    ) -> (Self, EngineHandle) {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (command_tx, command_rx) = flume::unbounded();
        let (internal_tx, internal_rx) = flume::unbounded();
        let machine = PlaybackStateMachine::new(events.clone());
        let graph = shared(RenderGraph::new(&config));

        let handle = EngineHandle {
            commands: command_tx,
            state: machine.watch(),
            events: events.clone(),
            graph: graph.clone(),
        };

        let engine = Self {
            scheduler: ChunkScheduler::new(config.buffer_time_secs),
            publisher: PromptPublisher::new(config.publish_interval(), config.tone.clone()),
            fade_enabled: config.fade_enabled,
            prompts: prompts.into_iter().map(Prompt::clamped).collect(),
            config,
            connector,
            decoder,
            clock,
            graph,
            machine,
            events,
            slot: SessionSlot::Idle,
            session_events: None,
            play_requested: false,
            next_attempt: 0,
            promotion: TimerSlot::new("promotion"),
            fade_cleanup: TimerSlot::new("fade-cleanup"),
            pending_cleanup: None,
            publish_timer: TimerSlot::new("publish"),
            commands: command_rx,
            internal_tx,
            internal_rx,
        };

        (engine, handle)
    }

    pub async fn run(mut self) {
        info!("Playback engine started");
        let commands = self.commands.clone();
        let internal = self.internal_rx.clone();

        loop {
            let session_events = self.session_events.clone();
            tokio::select! {
                biased;
                event = next_session_event(session_events) => match event {
                    Some(event) => self.handle_session_event(event).await,
                    None => self.on_session_lost("event stream ended").await,
                },
                Ok(msg) = internal.recv_async() => self.handle_internal(msg).await,
                command = commands.recv_async() => match command {
                    Ok(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    Err(_) => break,
                },
            }
        }

        self.promotion.cancel();
        self.fade_cleanup.cancel();
        self.publish_timer.cancel();
        info!("Playback engine stopped");
    }

    /// Returns `false` once the engine should exit.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Play { prompts } => {
                self.set_prompts(prompts);
                if self.machine.state() == PlaybackState::Playing {
                    self.request_publish().await;
                } else {
                    self.play().await;
                }
            }
            Command::Pause => self.pause().await,
            Command::Stop => self.stop().await,
            Command::PlayPause { prompts } => match self.machine.state() {
                PlaybackState::Playing => self.pause().await,
                PlaybackState::Loading => self.stop().await,
                PlaybackState::Stopped | PlaybackState::Paused => {
                    self.set_prompts(prompts);
                    self.play().await;
                }
            },
            Command::SetWeightedPrompts { prompts } => {
                self.set_prompts(prompts);
                self.request_publish().await;
            }
            Command::SetMasterVolume(volume) => self.set_master_volume(volume),
            Command::SetFadeEnabled(enabled) => {
                debug!("Fading {}", if enabled { "enabled" } else { "disabled" });
                self.fade_enabled = enabled;
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Connected { attempt, result } => self.on_connected(attempt, result).await,
            Internal::Promote(id) => {
                if self.promotion.fire(id) && self.machine.promote() {
                    info!(
                        "Buffered {:.1}s ahead, playback started",
                        self.config.buffer_time_secs
                    );
                }
            }
            Internal::FadeCleanup(id) => {
                if self.fade_cleanup.fire(id) {
                    if let Some(kind) = self.pending_cleanup.take() {
                        self.cleanup(kind).await;
                    }
                }
            }
            Internal::PublishTrailing(id) => {
                if self.publish_timer.fire(id) {
                    self.publish_now().await;
                }
            }
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SetupComplete => debug!("Music session setup complete"),
            SessionEvent::AudioChunks(chunks) => {
                for chunk in chunks {
                    self.on_chunk(chunk).await;
                }
            }
            SessionEvent::FilteredPrompt(filtered) => {
                info!("Prompt filtered: '{}' ({})", filtered.text, filtered.reason);
                self.publisher.filter(&filtered.text);
                self.emit(EngineEvent::FilteredPrompt {
                    text: filtered.text,
                    reason: filtered.reason,
                });
            }
            SessionEvent::Warning(warning) => warn!("Music service warning: {}", warning),
            SessionEvent::Error(error) => self.on_session_lost(&error).await,
            SessionEvent::Closed { code, reason } => {
                self.on_session_lost(&format!("closed with code {}: {}", code, reason))
                    .await
            }
        }
    }

    // ── User intents ─────────────────────────────────────────────────────

    async fn play(&mut self) {
        match self.machine.state() {
            PlaybackState::Playing => return,
            PlaybackState::Loading => {
                debug!("Play while loading, stopping");
                self.stop().await;
                return;
            }
            PlaybackState::Stopped | PlaybackState::Paused => {}
        }

        // A ready session keeps its pending cleanup until playback has
        // actually restarted.
        if !matches!(self.slot, SessionSlot::Ready(_)) {
            self.interrupt_fade_out();
        }

        match self.slot {
            SessionSlot::Ready(_) => self.start_playback().await,
            SessionSlot::Connecting { attempt } => {
                debug!("Play attached to connection attempt {}", attempt);
                self.play_requested = true;
            }
            SessionSlot::Idle => {
                self.play_requested = true;
                self.begin_connect();
            }
        }
    }

    async fn pause(&mut self) {
        if matches!(self.slot, SessionSlot::Connecting { .. }) {
            self.play_requested = false;
        }
        if !self.machine.pause() {
            return;
        }
        self.promotion.cancel();
        self.begin_fade_out(Cleanup::Pause).await;
    }

    async fn stop(&mut self) {
        self.play_requested = false;
        if let SessionSlot::Connecting { attempt } = self.slot {
            info!("Abandoning connection attempt {}", attempt);
            self.slot = SessionSlot::Idle;
        }
        if !self.machine.stop() {
            return;
        }
        self.promotion.cancel();
        self.begin_fade_out(Cleanup::Stop).await;
    }

    fn set_prompts(&mut self, prompts: Vec<Prompt>) {
        self.prompts = prompts.into_iter().map(Prompt::clamped).collect();
    }

    fn set_master_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, UNITY_GAIN)
        };
        let now = self.clock.now();
        self.graph
            .lock()
            .master_gain
            .ramp_to(volume, now, self.config.volume_ramp_secs);
    }

    // ── Session lifecycle ────────────────────────────────────────────────

    fn begin_connect(&mut self) {
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.slot = SessionSlot::Connecting { attempt };
        info!("Connecting to music service (attempt {})", attempt);

        let connector = self.connector.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = connector.connect().await;
            let _ = tx.send(Internal::Connected { attempt, result });
        });
    }

    async fn on_connected(&mut self, attempt: u64, result: Result<Connection, SessionError>) {
        match self.slot {
            SessionSlot::Connecting { attempt: current } if current == attempt => {}
            _ => {
                debug!("Discarding abandoned connection attempt {}", attempt);
                return;
            }
        }

        match result {
            Ok(connection) => {
                self.slot = SessionSlot::Ready(connection.session);
                self.session_events = Some(connection.events);
                if std::mem::take(&mut self.play_requested) {
                    self.start_playback().await;
                }
            }
            Err(e) => {
                warn!("Connection attempt {} failed: {}", attempt, e);
                self.slot = SessionSlot::Idle;
                self.play_requested = false;
                self.emit_error(CONNECTION_ERROR_MESSAGE.to_string(), FaultKind::Connection);
            }
        }
    }

    async fn on_session_lost(&mut self, reason: &str) {
        warn!("Music session lost: {}", reason);
        self.drop_session();
        self.stop().await;
        self.emit_error(CONNECTION_ERROR_MESSAGE.to_string(), FaultKind::Connection);
    }

    fn ready_session(&self) -> Option<Arc<dyn MusicSession>> {
        match &self.slot {
            SessionSlot::Ready(session) => Some(session.clone()),
            _ => None,
        }
    }

    fn drop_session(&mut self) {
        if matches!(self.slot, SessionSlot::Ready(_)) {
            self.slot = SessionSlot::Idle;
        }
        self.session_events = None;
    }

    async fn start_playback(&mut self) {
        let Some(session) = self.ready_session() else {
            return;
        };
        if self.machine.state().accepts_audio() {
            return;
        }

        self.publish_timer.cancel();
        if !self.publish_now().await {
            return;
        }

        if let Err(e) = session.play().await {
            self.on_session_lost(&e.to_string()).await;
            return;
        }

        self.interrupt_fade_out();
        self.machine.play();
        let now = self.clock.now();
        let mut graph = self.graph.lock();
        if self.fade_enabled {
            graph
                .output_gain
                .ramp_between(SILENT_GAIN, UNITY_GAIN, now, self.config.fade_secs);
        } else {
            graph.output_gain.set_value(UNITY_GAIN);
        }
    }

    // ── Fades and cleanup ────────────────────────────────────────────────

    fn interrupt_fade_out(&mut self) {
        if !self.fade_cleanup.cancel() {
            return;
        }
        self.pending_cleanup = None;
        self.scheduler.reset();
        let flushed = self.graph.lock().flush_unstarted(self.clock.now());
        debug!(
            "Fade-out interrupted by play, dropped {} queued sources",
            flushed
        );
    }

    async fn shutdown(&mut self) {
        info!("Shutting down playback engine");
        self.play_requested = false;
        if matches!(self.slot, SessionSlot::Connecting { .. }) {
            self.slot = SessionSlot::Idle;
        }
        self.promotion.cancel();
        self.publish_timer.cancel();
        self.fade_cleanup.cancel();
        self.pending_cleanup = None;
        self.machine.stop();
        self.graph.lock().output_gain.set_value(0.0);

        let session = self.ready_session();
        self.cleanup(Cleanup::Stop).await;
        if let Some(session) = session {
            session.close().await;
        }
    }

    async fn begin_fade_out(&mut self, kind: Cleanup) {
        if self.fade_enabled {
            let now = self.clock.now();
            self.graph
                .lock()
                .output_gain
                .ramp_to(SILENT_GAIN, now, self.config.fade_secs);
            self.pending_cleanup = Some(kind);
            self.fade_cleanup.arm(
                self.config.fade_duration(),
                &self.internal_tx,
                Internal::FadeCleanup,
            );
        } else {
            self.graph.lock().output_gain.set_value(0.0);
            self.fade_cleanup.cancel();
            self.pending_cleanup = None;
            self.cleanup(kind).await;
        }
    }

    async fn cleanup(&mut self, kind: Cleanup) {
        self.scheduler.reset();
        let dropped = self.graph.lock().clear_sources();
        debug!("{:?} cleanup dropped {} sources", kind, dropped);

        let session = self.ready_session();
        match kind {
            Cleanup::Pause => {
                if let Some(session) = session {
                    if let Err(e) = session.pause().await {
                        warn!("Failed to pause music session: {}", e);
                    }
                }
            }
            Cleanup::Stop => {
                if let Some(session) = session {
                    if let Err(e) = session.stop().await {
                        warn!("Failed to stop music session: {}", e);
                    }
                }
                self.drop_session();
            }
        }
    }

    // ── Audio ────────────────────────────────────────────────────────────

    async fn on_chunk(&mut self, chunk: AudioChunk) {
        if !self.machine.state().accepts_audio() {
            trace!("Dropping chunk while {:?}", self.machine.state());
            return;
        }

        let bytes = match self.decoder.decode(&chunk.data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Dropping undecodable chunk: {}", e);
                return;
            }
        };
        let buffer = match self
            .decoder
            .decode_audio_data(bytes, self.config.sample_rate, self.config.channels)
            .await
        {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Dropping undecodable chunk: {}", e);
                return;
            }
        };

        let now = self.clock.now();
        match self
            .scheduler
            .place(buffer.duration(), now, &mut self.machine)
        {
            Placement::Dropped => {}
            Placement::Underrun => {
                self.promotion.cancel();
            }
            Placement::Scheduled {
                start_at,
                established,
            } => {
                self.graph.lock().schedule(start_at, Arc::new(buffer));
                if established {
                    self.promotion.arm(
                        self.config.buffer_time(),
                        &self.internal_tx,
                        Internal::Promote,
                    );
                }
            }
        }
    }

    // ── Prompt publishing ────────────────────────────────────────────────

    async fn request_publish(&mut self) {
        match self.publisher.request(Instant::now()) {
            Throttle::Now => {
                self.publish_timer.cancel();
                self.publish_now().await;
            }
            Throttle::Deferred(delay) => {
                if !self.publish_timer.is_armed() {
                    self.publish_timer
                        .arm(delay, &self.internal_tx, Internal::PublishTrailing);
                }
            }
        }
    }

    /// Publish the current prompt set. Returns `false` when playback had to
    /// be paused because nothing could be forwarded.
    async fn publish_now(&mut self) -> bool {
        self.publisher.mark_published(Instant::now());
        let update = self.publisher.evaluate(&self.prompts);

        let now = self.clock.now();
        {
            let mut graph = self.graph.lock();
            if graph.tone.gain_db.target() != update.tone_db {
                graph
                    .tone
                    .gain_db
                    .ramp_to(update.tone_db, now, self.config.tone.ramp_secs);
            }
        }

        if update.active.is_empty() {
            info!("No active prompts, pausing");
            self.emit_error(NO_ACTIVE_PROMPTS_MESSAGE.to_string(), FaultKind::NoActivePrompts);
            self.pause().await;
            return false;
        }
        if let Some(message) = update.cleared {
            self.emit(EngineEvent::ErrorCleared {
                message: message.to_string(),
            });
        }

        let Some(session) = self.ready_session() else {
            return true;
        };
        match session.set_weighted_prompts(update.active).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Weighted prompts rejected: {}", e);
                self.emit_error(e.to_string(), FaultKind::Publish);
                self.pause().await;
                false
            }
        }
    }

    // ── Notifications ────────────────────────────────────────────────────

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, message: String, kind: FaultKind) {
        self.emit(EngineEvent::Error { message, kind });
    }

    fn snapshot(&self) -> EngineSnapshot {
        let now = self.clock.now();
        let graph = self.graph.lock();
        EngineSnapshot {
            state: self.machine.state(),
            session: match self.slot {
                SessionSlot::Idle => SessionStatus::Idle,
                SessionSlot::Connecting { .. } => SessionStatus::Connecting,
                SessionSlot::Ready(_) => SessionStatus::Ready,
            },
            next_start_time: self.scheduler.next_start_time(),
            scheduled_sources: graph.sources().len(),
            underruns: self.scheduler.underruns(),
            master_volume: graph.master_gain.target(),
            output_gain: graph.output_gain.value_at(now),
            tone_db: graph.tone.gain_db.value_at(now),
            fade_enabled: self.fade_enabled,
            cleanup_pending: self.fade_cleanup.is_armed(),
            prompts: self.prompts.clone(),
            filtered_prompts: self.publisher.filtered(),
        }
    }
}

async fn next_session_event(events: Option<flume::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    match events {
        Some(events) => events.recv_async().await.ok(),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        audio::InstantClock,
        session::mock::{DurationDecoder, MockConnector, SessionCall},
    };
    use PlaybackState::*;

    struct Harness {
        handle: EngineHandle,
        connector: Arc<MockConnector>,
        events: broadcast::Receiver<EngineEvent>,
    }

    fn harness_with(config: PlaybackConfig, connector: MockConnector) -> Harness {
        let connector = Arc::new(connector);
        let handle = spawn(
            config,
            connector.clone(),
            Arc::new(DurationDecoder),
            Arc::new(InstantClock::new()),
            Vec::new(),
        );
        let events = handle.subscribe();
        Harness {
            handle,
            connector,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(PlaybackConfig::default(), MockConnector::default())
    }

    fn funk() -> Vec<Prompt> {
        vec![Prompt::new("p0", "Funk", 1.0)]
    }

    /// Let spawned work run, then round-trip through the engine queue.
    async fn sync(handle: &EngineHandle) -> EngineSnapshot {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        handle.snapshot().await.unwrap()
    }

    async fn wait_state(handle: &EngineHandle, target: PlaybackState) {
        let mut rx = handle.watch_state();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .expect("engine gone");
    }

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn states(events: &[EngineEvent]) -> Vec<PlaybackState> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::PlaybackStateChanged { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn errors(events: &[EngineEvent]) -> Vec<(FaultKind, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Error { message, kind } => Some((*kind, message.clone())),
                _ => None,
            })
            .collect()
    }

    async fn start(h: &Harness) {
        h.handle.play(funk()).await.unwrap();
        wait_state(&h.handle, Loading).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_connects_publishes_then_loads() {
        let mut h = harness();
        start(&h).await;

        let calls = h.connector.link().session.calls();
        assert_eq!(
            calls,
            vec![
                SessionCall::Prompts(vec![Prompt::new("p0", "Funk", 1.0).to_weighted()]),
                SessionCall::Play,
            ]
        );
        assert_eq!(states(&drain(&mut h.events)), vec![Loading]);

        let snap = sync(&h.handle).await;
        assert_eq!(snap.session, SessionStatus::Ready);
        assert!(snap.output_gain < 0.001);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffers_are_gapless_and_promoted_after_buffer_time() {
        let h = harness();
        start(&h).await;
        let link = h.connector.link();

        link.send_chunks(&[1.0]);
        sync(&h.handle).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        link.send_chunks(&[1.0]);

        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Loading);
        assert_eq!(snap.next_start_time, 4.0);
        assert_eq!(h.handle.graph().lock().scheduled_starts(), vec![2.0, 3.0]);

        tokio::time::sleep(Duration::from_millis(1_001)).await;
        sync(&h.handle).await;
        assert_eq!(h.handle.state(), Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_100ms_apart_play_back_to_back() {
        let h = harness();
        start(&h).await;
        let link = h.connector.link();

        link.send_chunks(&[1.0]);
        sync(&h.handle).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        link.send_chunks(&[1.0]);

        let snap = sync(&h.handle).await;
        assert_eq!(h.handle.graph().lock().scheduled_starts(), vec![2.0, 3.0]);
        assert_eq!(snap.next_start_time, 4.0);

        tokio::time::sleep(Duration::from_millis(1_899)).await;
        assert_eq!(sync(&h.handle).await.state, Loading);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(sync(&h.handle).await.state, Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_chunk_notifications_are_placed_in_order() {
        let h = harness();
        start(&h).await;

        h.connector.link().send_chunks(&[0.5, 0.25, 1.0]);
        sync(&h.handle).await;
        assert_eq!(
            h.handle.graph().lock().scheduled_starts(),
            vec![2.0, 2.5, 2.75]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_underrun_rebuffers_once() {
        let mut h = harness();
        start(&h).await;
        let link = h.connector.link();

        link.send_chunks(&[1.0]);
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        sync(&h.handle).await;
        assert_eq!(h.handle.state(), Playing);
        drain(&mut h.events);

        // Timeline ran out at 3.0.
        tokio::time::sleep(Duration::from_secs(2)).await;
        link.send_chunks(&[1.0]);
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Loading);
        assert_eq!(snap.underruns, 1);
        assert_eq!(snap.next_start_time, 0.0);

        link.send_chunks(&[1.0]);
        let snap = sync(&h.handle).await;
        assert_eq!(snap.underruns, 1);
        assert!((snap.next_start_time - (4.1 + 2.0 + 1.0)).abs() < 1e-9);
        assert_eq!(states(&drain(&mut h.events)), vec![Loading]);
        assert!(h.connector.link().session.calls().iter().all(|c| *c != SessionCall::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_are_dropped_while_paused() {
        let h = harness();
        start(&h).await;
        h.handle.pause().await.unwrap();
        wait_state(&h.handle, Paused).await;

        h.connector.link().send_chunks(&[1.0, 1.0]);
        let snap = sync(&h.handle).await;
        assert_eq!(snap.scheduled_sources, 0);
        assert_eq!(snap.next_start_time, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_plays_share_one_connection() {
        let h = harness_with(
            PlaybackConfig::default(),
            MockConnector::with_delay(Duration::from_millis(100)),
        );
        h.handle.play(funk()).await.unwrap();
        h.handle.play(funk()).await.unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.session, SessionStatus::Connecting);

        wait_state(&h.handle, Loading).await;
        assert_eq!(h.connector.connects(), 1);
        let plays = h
            .connector
            .link()
            .session
            .calls()
            .into_iter()
            .filter(|c| *c == SessionCall::Play)
            .count();
        assert_eq!(plays, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_connection_attempt() {
        let h = harness_with(
            PlaybackConfig::default(),
            MockConnector::with_delay(Duration::from_millis(100)),
        );
        h.handle.play(funk()).await.unwrap();
        h.handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Stopped);
        assert_eq!(snap.session, SessionStatus::Idle);
        assert_eq!(h.connector.connects(), 1);
        assert!(h.connector.link().session.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_while_loading_toggles_to_stopped() {
        let mut h = harness();
        start(&h).await;
        h.handle.play(funk()).await.unwrap();
        let snap = sync(&h.handle).await;

        assert_eq!(snap.state, Stopped);
        assert_eq!(states(&drain(&mut h.events)), vec![Loading, Stopped]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_pause_dispatch() {
        let h = harness();
        h.handle.play_pause(funk()).await.unwrap();
        wait_state(&h.handle, Loading).await;

        h.connector.link().send_chunks(&[3.0]);
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        sync(&h.handle).await;
        assert_eq!(h.handle.state(), Playing);

        h.handle.play_pause(funk()).await.unwrap();
        assert_eq!(sync(&h.handle).await.state, Paused);

        h.handle.play_pause(funk()).await.unwrap();
        assert_eq!(sync(&h.handle).await.state, Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_stop_defers_cleanup_and_play_cancels_it() {
        let mut h = harness();
        start(&h).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!((sync(&h.handle).await.output_gain - 1.0).abs() < 1e-6);

        h.handle.stop().await.unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Stopped);
        assert!(snap.cleanup_pending);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let snap = sync(&h.handle).await;
        assert!((snap.output_gain - 0.5).abs() < 0.01, "gain {}", snap.output_gain);
        let link = h.connector.link();
        assert!(!link.session.calls().contains(&SessionCall::Stop));

        h.handle.play(funk()).await.unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Loading);
        assert!(!snap.cleanup_pending);
        assert_eq!(snap.session, SessionStatus::Ready);
        assert_eq!(h.connector.connects(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!link.session.calls().contains(&SessionCall::Stop));
        assert_eq!(
            states(&drain(&mut h.events)),
            vec![Loading, Stopped, Loading]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_with_no_active_prompts_keeps_pending_stop() {
        let h = harness();
        start(&h).await;
        let link = h.connector.link();

        h.handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.handle
            .play(vec![Prompt::new("p0", "Funk", 0.0)])
            .await
            .unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Stopped);
        assert!(snap.cleanup_pending);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let snap = sync(&h.handle).await;
        assert_eq!(link.session.calls().last(), Some(&SessionCall::Stop));
        assert_eq!(snap.session, SessionStatus::Idle);
        assert!(!snap.cleanup_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_restart_keeps_pending_pause() {
        let mut h = harness();
        start(&h).await;
        let link = h.connector.link();

        h.handle.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        link.session
            .reject_prompts
            .store(true, std::sync::atomic::Ordering::SeqCst);
        drain(&mut h.events);
        h.handle.play(funk()).await.unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Paused);
        assert!(snap.cleanup_pending);
        assert_eq!(errors(&drain(&mut h.events))[0].0, FaultKind::Publish);

        tokio::time::sleep(Duration::from_secs(5)).await;
        sync(&h.handle).await;
        assert_eq!(link.session.calls().last(), Some(&SessionCall::Pause));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_skips_fade_and_closes_session() {
        let h = harness();
        start(&h).await;
        let link = h.connector.link();
        link.send_chunks(&[1.0]);
        sync(&h.handle).await;

        h.handle.shutdown().await.unwrap();
        let calls = link.session.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[SessionCall::Stop, SessionCall::Close]
        );
        assert_eq!(h.handle.state(), Stopped);
        assert!(h.handle.graph().lock().sources().is_empty());
        assert!(matches!(h.handle.snapshot().await, Err(EngineError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_fade_out_stops_at_once() {
        let h = harness();
        start(&h).await;
        let link = h.connector.link();

        h.handle.stop().await.unwrap();
        assert!(sync(&h.handle).await.cleanup_pending);
        h.handle.shutdown().await.unwrap();

        assert_eq!(
            link.session.calls().last(),
            Some(&SessionCall::Close)
        );
        assert!(link.session.calls().contains(&SessionCall::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_while_playing_publishes_new_weights() {
        let h = harness();
        start(&h).await;
        let link = h.connector.link();
        link.send_chunks(&[3.0]);
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        sync(&h.handle).await;
        assert_eq!(h.handle.state(), Playing);

        h.handle
            .play(vec![Prompt::new("p0", "Funk", 0.5)])
            .await
            .unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Playing);

        let updates = link.session.prompt_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1][0].weight, 0.5);
        let plays = link
            .session
            .calls()
            .into_iter()
            .filter(|c| *c == SessionCall::Play)
            .count();
        assert_eq!(plays, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_stop_completes_and_drops_session() {
        let h = harness();
        start(&h).await;
        let link = h.connector.link();
        link.send_chunks(&[1.0]);
        sync(&h.handle).await;

        h.handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_001)).await;
        let snap = sync(&h.handle).await;
        assert!(link.session.calls().contains(&SessionCall::Stop));
        assert_eq!(snap.session, SessionStatus::Idle);
        assert_eq!(snap.scheduled_sources, 0);
        assert_eq!(snap.next_start_time, 0.0);

        h.handle.play(funk()).await.unwrap();
        wait_state(&h.handle, Loading).await;
        assert_eq!(h.connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_without_fade_cleans_up_immediately() {
        let mut config = PlaybackConfig::default();
        config.fade_enabled = false;
        let h = harness_with(config, MockConnector::default());
        start(&h).await;
        assert_eq!(sync(&h.handle).await.output_gain, 1.0);

        h.handle.pause().await.unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Paused);
        assert_eq!(snap.output_gain, 0.0);
        assert!(!snap.cleanup_pending);
        assert_eq!(h.connector.link().session.calls().last(), Some(&SessionCall::Pause));
        assert_eq!(snap.session, SessionStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_active_prompts_error_and_clear() {
        let mut h = harness();
        h.handle
            .play(vec![Prompt::new("p0", "Funk", 0.0)])
            .await
            .unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Stopped);
        assert_eq!(snap.session, SessionStatus::Ready);

        let events = drain(&mut h.events);
        assert_eq!(
            errors(&events),
            vec![(FaultKind::NoActivePrompts, NO_ACTIVE_PROMPTS_MESSAGE.to_string())]
        );
        assert!(states(&events).is_empty());

        h.handle.set_weighted_prompts(funk()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        sync(&h.handle).await;

        let events = drain(&mut h.events);
        assert_eq!(
            events,
            vec![EngineEvent::ErrorCleared {
                message: NO_ACTIVE_PROMPTS_MESSAGE.to_string()
            }]
        );
        assert_eq!(h.connector.link().session.prompt_updates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zeroing_every_prompt_pauses_playback() {
        let mut h = harness();
        start(&h).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        drain(&mut h.events);

        h.handle
            .set_weighted_prompts(vec![Prompt::new("p0", "Funk", 0.0)])
            .await
            .unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Paused);
        let events = drain(&mut h.events);
        assert_eq!(errors(&events).len(), 1);
        assert_eq!(errors(&events)[0].0, FaultKind::NoActivePrompts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_is_throttled_to_latest_value() {
        let h = harness();
        start(&h).await;
        let link = h.connector.link();

        for weight in [0.2, 0.4, 0.6] {
            h.handle
                .set_weighted_prompts(vec![Prompt::new("p0", "Funk", weight)])
                .await
                .unwrap();
        }
        sync(&h.handle).await;
        assert_eq!(link.session.prompt_updates().len(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        sync(&h.handle).await;
        let updates = link.session.prompt_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1][0].weight, 0.6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_publish_pauses() {
        let mut h = harness();
        start(&h).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let link = h.connector.link();
        link.session
            .reject_prompts
            .store(true, std::sync::atomic::Ordering::SeqCst);
        drain(&mut h.events);

        h.handle.set_weighted_prompts(funk()).await.unwrap();
        let snap = sync(&h.handle).await;
        assert_eq!(snap.state, Paused);
        let errs = errors(&drain(&mut h.events));
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].0, FaultKind::Publish);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_prompts_leave_active_set() {
        let mut h = harness();
        start(&h).await;
        let link = h.connector.link();
        link.send_filtered("Funk");
        let snap = sync(&h.handle).await;
        assert_eq!(snap.filtered_prompts, vec!["Funk".to_string()]);
        assert!(drain(&mut h.events).iter().any(|e| matches!(
            e,
            EngineEvent::FilteredPrompt { text, .. } if text == "Funk"
        )));

        tokio::time::sleep(Duration::from_millis(300)).await;
        h.handle
            .set_weighted_prompts(vec![
                Prompt::new("p0", "Funk", 1.0),
                Prompt::new("p1", "Shoegaze", 1.0),
            ])
            .await
            .unwrap();
        sync(&h.handle).await;
        let updates = link.session.prompt_updates();
        let last = updates.last().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].text, "Shoegaze");
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_error_stops_with_connection_fault() {
        let mut h = harness();
        start(&h).await;
        h.connector.link().send_error("socket reset");
        let snap = sync(&h.handle).await;

        assert_eq!(snap.state, Stopped);
        assert_eq!(snap.session, SessionStatus::Idle);
        assert_eq!(
            errors(&drain(&mut h.events)),
            vec![(FaultKind::Connection, CONNECTION_ERROR_MESSAGE.to_string())]
        );

        h.handle.play(funk()).await.unwrap();
        wait_state(&h.handle, Loading).await;
        assert_eq!(h.connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_reports_connection_fault() {
        let mut h = harness();
        h.connector.set_failing(true);
        h.handle.play(funk()).await.unwrap();
        let snap = sync(&h.handle).await;

        assert_eq!(snap.state, Stopped);
        assert_eq!(snap.session, SessionStatus::Idle);
        assert_eq!(errors(&drain(&mut h.events))[0].0, FaultKind::Connection);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tone_shaping_follows_trigger_prompt() {
        let h = harness();
        h.handle
            .set_weighted_prompts(vec![
                Prompt::new("p0", "Funk", 1.0),
                Prompt::new("p1", "Dystopian Industrial", 1.0),
            ])
            .await
            .unwrap();
        assert_eq!(sync(&h.handle).await.tone_db, 0.0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!((sync(&h.handle).await.tone_db + 9.0).abs() < 0.01);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(sync(&h.handle).await.tone_db, -18.0);

        h.handle.set_weighted_prompts(funk()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!((sync(&h.handle).await.tone_db + 9.0).abs() < 0.01);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(sync(&h.handle).await.tone_db, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_volume_is_clamped_and_ramped() {
        let h = harness();
        h.handle.set_master_volume(1.7).await.unwrap();
        assert_eq!(sync(&h.handle).await.master_volume, 1.0);

        h.handle.set_master_volume(0.25).await.unwrap();
        sync(&h.handle).await;
        let graph = h.handle.graph();
        tokio::time::sleep(Duration::from_millis(25)).await;
        let mid = graph.lock().master_gain.value_at(0.025);
        assert!((mid - 0.625).abs() < 1e-3, "mid {}", mid);
        assert_eq!(graph.lock().master_gain.value_at(0.05), 0.25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_chunk_is_dropped() {
        let h = harness();
        start(&h).await;
        let link = h.connector.link();
        let _ = link.events.send(SessionEvent::AudioChunks(vec![AudioChunk {
            data: bytes::Bytes::from_static(b"not a duration"),
            mime_type: None,
        }]));
        let snap = sync(&h.handle).await;
        assert_eq!(snap.scheduled_sources, 0);
        assert_eq!(snap.state, Loading);
    }
}
