//! Session controller
//!
//! Top-level state machine tying the playback session, the now-playing
//! clock and the two station streams together. It is driven entirely from
//! one task: transport events, timer deadlines and user commands come in
//! one at a time, and HTTP work it wants done goes out as [`Effect`]s.
//!
//! ```text
//!            switch_station            settle delay
//!   IDLE ─────────────────► SWITCHING ─────────────► PAUSED ◄──┐
//!                              ▲                        │ play  │ pause
//!                              │ switch_station         ▼       │
//!                              └─────────────────── PLAYING ────┘
//! ```

use crate::codec::decoder::PageDecoder;
use crate::config::PlaybackConfig;
use crate::constants::LOADING_TITLE;
use crate::network::http::StationData;
use crate::network::transport::{ConnectionId, StreamKind, TransportConnector, TransportEvent};
use crate::now_playing::{ClockEvent, Clock, NowPlaying, NowPlayingClock};
use crate::playback::session::{PlaybackSession, SessionStats};
use crate::protocol::{InboundMessage, TrackMetadata};
use crate::timer::{TaskId, TaskQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No station selected
    Idle,
    Playing,
    Paused,
    /// Old station torn down, waiting to connect the new one
    Switching,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Switching => "switching",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SessionTask {
    TeardownOutput,
    OpenMetadata { station: String },
}

/// Work for the driver to carry out on the controller's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch track list and queue, then call [`SessionController::on_station_data`]
    FetchStationData { station: String },
    /// Fetch the queue, then call [`SessionController::on_queue`]
    RefreshQueue { station: String },
}

/// The selected station and its metadata stream
#[derive(Debug, Clone, PartialEq)]
pub struct StationSession {
    pub name: String,
    pub metadata: Option<ConnectionId>,
    pub data: StationData,
}

impl StationSession {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            metadata: None,
            data: StationData::default(),
        }
    }
}

/// Snapshot for a status display
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: SessionState,
    pub station: Option<String>,
    pub now_playing: NowPlaying,
    pub volume: f64,
    pub listeners: Option<u32>,
    /// Seconds of audio scheduled ahead of the output clock
    pub buffered_ahead: Option<f64>,
    pub packets: SessionStats,
}

/// Receives everything a UI would show; every method defaults to a no-op
pub trait SessionObserver {
    fn state_changed(&mut self, _state: SessionState) {}
    fn title_changed(&mut self, _title: &str) {}
    fn listeners_changed(&mut self, _count: u32) {}
    /// Something went wrong and the user should know
    fn alert(&mut self, _message: &str) {}
    /// Confirmation of a user action
    fn notice(&mut self, _message: &str) {}
    fn station_data_changed(&mut self, _station: &str, _data: &StationData) {}
    fn queue_changed(&mut self, _queue: &[String]) {}
    fn stations_listed(&mut self, _stations: &[String]) {}
    fn status(&mut self, _report: &StatusReport) {}
}

pub struct SessionController<D, C, K> {
    state: SessionState,
    station: Option<StationSession>,
    playback: PlaybackSession<D>,
    now_playing: NowPlayingClock,
    connector: C,
    clock: K,
    observer: Box<dyn SessionObserver>,
    tasks: TaskQueue<SessionTask>,
    teardown_task: Option<TaskId>,
    metadata_task: Option<TaskId>,
    pre_skip_volume: Option<f64>,
    effects: Vec<Effect>,
    config: PlaybackConfig,
}

impl<D: PageDecoder, C: TransportConnector, K: Clock> SessionController<D, C, K> {
    pub fn new(
        playback: PlaybackSession<D>,
        connector: C,
        clock: K,
        observer: Box<dyn SessionObserver>,
        config: PlaybackConfig,
    ) -> Self {
        let now_playing = NowPlayingClock::new(clock.now_ms());
        Self {
            state: SessionState::Idle,
            station: None,
            playback,
            now_playing,
            connector,
            clock,
            observer,
            tasks: TaskQueue::new(),
            teardown_task: None,
            metadata_task: None,
            pre_skip_volume: None,
            effects: Vec::new(),
            config,
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!("Session {} -> {}", self.state, state);
            self.state = state;
            self.observer.state_changed(state);
        }
    }

    /// Tear the current station down and tune to `name`
    ///
    /// The metadata stream opens after the settle delay; audio stays off
    /// until the next [`play`](Self::play).
    pub fn switch_station(&mut self, name: &str) {
        if self.station.as_ref().map(|s| s.name.as_str()) == Some(name) {
            tracing::debug!("Already tuned to {}", name);
            return;
        }
        tracing::info!("Switching to station {}", name);

        self.pause();
        if let Some(metadata) = self.station.as_ref().and_then(|s| s.metadata) {
            self.connector.close(metadata);
        }
        if let Some(task) = self.metadata_task.take() {
            self.tasks.cancel(task);
        }
        self.pre_skip_volume = None;

        let now = self.clock.now_ms();
        self.now_playing.reset(now);
        self.observer.title_changed(LOADING_TITLE);

        self.station = Some(StationSession::new(name));
        self.effects.push(Effect::FetchStationData {
            station: name.to_string(),
        });
        self.metadata_task = Some(self.tasks.schedule(
            now + self.config.switch_settle_ms,
            SessionTask::OpenMetadata {
                station: name.to_string(),
            },
        ));
        self.set_state(SessionState::Switching);
    }

    /// Start (or restart) audio for the current station
    pub fn play(&mut self) {
        if self.state == SessionState::Playing {
            return;
        }
        let Some(station) = self.station.as_ref().map(|s| s.name.clone()) else {
            self.observer.alert("No station selected");
            return;
        };

        if let Some(task) = self.teardown_task.take() {
            self.tasks.cancel(task);
        }
        self.ensure_metadata(&station);

        match self.playback.resume(&mut self.connector, &station) {
            Ok(()) => self.set_state(SessionState::Playing),
            Err(e) => {
                tracing::error!("Failed to open audio output: {}", e);
                self.observer.alert(&format!("Could not open audio output: {}", e));
                if self.state != SessionState::Switching {
                    self.set_state(SessionState::Paused);
                }
            }
        }
    }

    /// Reconnect the metadata stream if it went stale
    fn ensure_metadata(&mut self, station: &str) {
        if self.metadata_task.is_some() {
            // Still settling after a switch
            return;
        }
        let current = self.station.as_ref().and_then(|s| s.metadata);
        if let Some(id) = current {
            if self.connector.is_open(id) {
                return;
            }
            self.connector.close(id);
        }

        tracing::info!("Reconnecting metadata stream for {}", station);
        self.now_playing.reset(self.clock.now_ms());
        self.observer.title_changed(LOADING_TITLE);
        self.open_metadata(station);
    }

    fn open_metadata(&mut self, station: &str) {
        let id = self.connector.open(StreamKind::Metadata, station);
        if let Some(session) = self.station.as_mut() {
            session.metadata = Some(id);
        }
    }

    /// Fade out and schedule the output teardown; no-op when not playing
    pub fn pause(&mut self) {
        if !self.playback.pause(&mut self.connector) {
            return;
        }
        self.schedule_teardown();
        self.set_state(SessionState::Paused);
    }

    fn schedule_teardown(&mut self) {
        if let Some(task) = self.teardown_task.take() {
            self.tasks.cancel(task);
        }
        let deadline = self.clock.now_ms() + self.config.teardown_grace_ms;
        self.teardown_task = Some(self.tasks.schedule(deadline, SessionTask::TeardownOutput));
    }

    pub fn toggle(&mut self) {
        if self.state == SessionState::Playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// The server accepted a skip on `station`: silence and flush until its
    /// metadata arrives
    ///
    /// Ignored when tuned elsewhere by now. Repeated confirmations keep the
    /// volume saved by the first.
    pub fn skip_confirmed(&mut self, station: &str) {
        if self.station.as_ref().map(|s| s.name.as_str()) != Some(station) {
            tracing::debug!("Ignoring skip confirmation for {}", station);
            return;
        }
        self.observer.notice("Successfully skipped");
        let current = self.playback.volume();
        self.pre_skip_volume.get_or_insert(current);
        self.playback.set_volume(0.0);
        self.playback.clear_queued();
        self.now_playing.force_skip_length();
    }

    pub fn skip_failed(&mut self, reason: &str) {
        self.observer.alert(&format!("Failure: {}", reason));
    }

    /// Set volume on the 0-200 scale
    pub fn set_volume(&mut self, volume: f64) {
        self.pre_skip_volume = None;
        self.playback.set_volume(volume);
    }

    pub fn change_volume(&mut self, delta: f64) {
        self.pre_skip_volume = None;
        self.playback.change_volume_by(delta);
    }

    pub fn on_transport_event(&mut self, event: TransportEvent) {
        let id = event.id();
        let current = match event.kind() {
            StreamKind::Audio => self.playback.audio_connection(),
            StreamKind::Metadata => self.station.as_ref().and_then(|s| s.metadata),
        };
        if current != Some(id) {
            tracing::trace!("Ignoring event from stale {} stream {}", event.kind(), id);
            return;
        }

        match event {
            TransportEvent::Message { kind, text, .. } => match kind.parse(&text) {
                Ok(message) => self.on_message(kind, message),
                Err(e) => tracing::warn!("Dropping message on {} stream: {}", kind, e),
            },
            TransportEvent::Closed { kind, reason, .. } => self.on_closed(id, kind, reason),
        }
    }

    fn on_message(&mut self, kind: StreamKind, message: InboundMessage) {
        if let Some(text) = message.rejection_text() {
            tracing::warn!("{} stream rejected: {}", kind, text);
            self.observer.alert(text);
            return;
        }
        match (kind, message) {
            (StreamKind::Audio, InboundMessage::Batch(batch)) => {
                let position = self.now_playing.time_in_audio(self.clock.now_ms());
                let outcome = self.playback.handle_batch(&batch, position);
                tracing::trace!(
                    "Batch at {:.0}ms: {} accepted, {} dropped, {} failed",
                    batch.start_offset_ms,
                    outcome.accepted,
                    outcome.dropped,
                    outcome.failed
                );
            }
            (StreamKind::Metadata, InboundMessage::Metadata(meta)) => self.on_metadata(&meta),
            (kind, message) => tracing::warn!("Unexpected message on {} stream: {:?}", kind, message),
        }
    }

    fn on_metadata(&mut self, meta: &TrackMetadata) {
        let events = self.now_playing.on_metadata(meta, self.clock.now_ms());
        self.dispatch_clock_events(events);
    }

    fn dispatch_clock_events(&mut self, events: Vec<ClockEvent>) {
        for event in events {
            match event {
                ClockEvent::TitleChanged(title) => self.observer.title_changed(&title),
                ClockEvent::ListenersChanged(count) => self.observer.listeners_changed(count),
                ClockEvent::TrackStarted => {
                    if let Some(station) = &self.station {
                        self.effects.push(Effect::RefreshQueue {
                            station: station.name.clone(),
                        });
                    }
                }
                ClockEvent::SkipCompleted => {
                    if let Some(volume) = self.pre_skip_volume.take() {
                        self.playback.set_volume(volume);
                    }
                }
            }
        }
    }

    fn on_closed(&mut self, id: ConnectionId, kind: StreamKind, reason: Option<String>) {
        match kind {
            StreamKind::Audio => {
                if self.playback.on_audio_closed(id) {
                    if let Some(reason) = &reason {
                        self.observer.alert(&format!("Audio stream lost: {}", reason));
                    }
                    self.schedule_teardown();
                    self.set_state(SessionState::Paused);
                }
            }
            StreamKind::Metadata => {
                tracing::warn!("Metadata stream {} closed; reconnecting on next play", id);
                if let Some(session) = self.station.as_mut() {
                    session.metadata = None;
                }
            }
        }
    }

    /// Earliest pending deadline (ms on the controller's clock)
    pub fn next_deadline(&self) -> Option<f64> {
        match (self.tasks.next_deadline(), self.now_playing.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run every task that is due
    pub fn run_due(&mut self) {
        let now = self.clock.now_ms();
        for (id, task) in self.tasks.take_due(now) {
            match task {
                SessionTask::TeardownOutput => {
                    if self.teardown_task == Some(id) {
                        self.teardown_task = None;
                        self.playback.teardown_output();
                    }
                }
                SessionTask::OpenMetadata { station } => {
                    if self.metadata_task != Some(id) {
                        continue;
                    }
                    self.metadata_task = None;
                    if self.station.as_ref().map(|s| s.name.as_str()) == Some(station.as_str()) {
                        self.open_metadata(&station);
                        if self.state == SessionState::Switching {
                            self.set_state(SessionState::Paused);
                        }
                    }
                }
            }
        }

        let events = self.now_playing.fire_due(now);
        self.dispatch_clock_events(events);
    }

    /// Drain pending effects
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Fetched track list and queue for `station`; stale results are ignored
    pub fn on_station_data(&mut self, station: &str, data: StationData) {
        if let Some(session) = self.station.as_mut().filter(|s| s.name == station) {
            session.data = data;
            self.observer.station_data_changed(station, &session.data);
        }
    }

    /// Fetched (or vote-updated) queue for `station`
    pub fn on_queue(&mut self, station: &str, queue: Vec<String>) {
        if let Some(session) = self.station.as_mut().filter(|s| s.name == station) {
            session.data.queued = queue;
            self.observer.queue_changed(&session.data.queued);
        }
    }

    pub fn on_station_list(&mut self, stations: &[String]) {
        self.observer.stations_listed(stations);
    }

    /// Surface a failed background request
    pub fn report_error(&mut self, message: &str) {
        tracing::warn!("{}", message);
        self.observer.alert(message);
    }

    pub fn report_notice(&mut self, message: &str) {
        self.observer.notice(message);
    }

    pub fn status_report(&self) -> StatusReport {
        let now = self.clock.now_ms();
        StatusReport {
            state: self.state,
            station: self.station.as_ref().map(|s| s.name.clone()),
            now_playing: self.now_playing.snapshot(now),
            volume: self.playback.volume(),
            listeners: self.now_playing.num_listeners(),
            buffered_ahead: self.playback.scheduler().map(|s| s.buffered_ahead()),
            packets: self.playback.stats().clone(),
        }
    }

    pub fn report_status(&mut self) {
        let report = self.status_report();
        self.observer.status(&report);
    }

    /// Close everything
    pub fn shutdown(&mut self) {
        self.playback.stop(&mut self.connector);
        if let Some(metadata) = self.station.as_mut().and_then(|s| s.metadata.take()) {
            self.connector.close(metadata);
        }
        self.tasks.clear();
        self.teardown_task = None;
        self.metadata_task = None;
        self.set_state(SessionState::Idle);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn station(&self) -> Option<&StationSession> {
        self.station.as_ref()
    }

    pub fn now_playing(&self) -> &NowPlayingClock {
        &self.now_playing
    }

    pub fn playback(&self) -> &PlaybackSession<D> {
        &self.playback
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }
}
