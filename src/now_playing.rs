//! Now-playing clock
//!
//! The server reports, per metadata message, how far into the current track
//! its broadcast is. Locally we keep a page clock (milliseconds since the
//! metadata stream was (re)connected) and an anchor `relative_start_time`
//! such that `time() - relative_start_time` is the position in the track.
//!
//! A message announcing the next track (`start_offset == 0`) arrives while
//! the listener is still hearing the end of the previous one, since audio
//! is buffered ahead. The title swap is therefore deferred until the current
//! track's remaining time has elapsed. The first message after a connect and
//! skip confirmations apply immediately.

use std::time::{Duration, Instant};

use crate::constants::{LOADING_TITLE, SKIP_LENGTH_SENTINEL};
use crate::protocol::TrackMetadata;
use crate::timer::{TaskId, TaskQueue};

/// Monotonic millisecond clock
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// [`Clock`] backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }

    /// The instant `ms` milliseconds after this clock's origin
    pub fn instant_at(&self, ms: f64) -> Instant {
        self.origin + Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No metadata since the stream (re)connected
    JustStarted,
    Steady,
}

/// Outcome of a metadata message or a fired title swap
#[derive(Debug, Clone, PartialEq)]
pub enum ClockEvent {
    TitleChanged(String),
    ListenersChanged(u32),
    /// The server started a new track; the queue has moved
    TrackStarted,
    /// The server confirmed a skip with fresh metadata
    SkipCompleted,
}

#[derive(Debug, Clone)]
struct PendingTitle {
    title: String,
    total_length: f64,
}

/// Read-only view for a UI
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub title: String,
    pub position_ms: f64,
    pub total_length_ms: f64,
    pub fraction: f64,
}

impl NowPlaying {
    /// `"01:05/03:20"`, position clamped to the track length
    pub fn progress_text(&self) -> String {
        let total = self.total_length_ms.max(0.0);
        let position = self.position_ms.max(0.0).min(total);
        format!("{}/{}", format_time(position), format_time(total))
    }
}

/// `MM:SS`, or `HH:MM:SS` from one hour up
pub fn format_time(ms: f64) -> String {
    let total_seconds = (ms.max(0.0) / 1000.0).floor() as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours == 0 {
        format!("{:02}:{:02}", minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

#[derive(Debug)]
pub struct NowPlayingClock {
    epoch_ms: f64,
    relative_start_time: f64,
    total_length: f64,
    title: String,
    phase: Phase,
    last_offset_ms: f64,
    last_reported_title: Option<String>,
    num_listeners: Option<u32>,
    swaps: TaskQueue<PendingTitle>,
    pending: Option<TaskId>,
}

impl NowPlayingClock {
    pub fn new(now_ms: f64) -> Self {
        Self {
            epoch_ms: now_ms,
            relative_start_time: 0.0,
            total_length: 0.0,
            title: LOADING_TITLE.to_string(),
            phase: Phase::JustStarted,
            last_offset_ms: 0.0,
            last_reported_title: None,
            num_listeners: None,
            swaps: TaskQueue::new(),
            pending: None,
        }
    }

    /// Metadata stream (re)connect: restart the page clock and show the placeholder
    ///
    /// A pending swap survives; when it fires over the placeholder it only
    /// replaces the title, leaving the position anchor alone.
    pub fn reset(&mut self, now_ms: f64) {
        self.epoch_ms = now_ms;
        self.title = LOADING_TITLE.to_string();
        self.phase = Phase::JustStarted;
    }

    /// Page clock
    pub fn time(&self, now_ms: f64) -> f64 {
        now_ms - self.epoch_ms
    }

    /// Position within the current track
    pub fn time_in_audio(&self, now_ms: f64) -> f64 {
        self.time(now_ms) - self.relative_start_time
    }

    pub fn time_left_in_audio(&self, now_ms: f64) -> f64 {
        self.total_length - self.time_in_audio(now_ms)
    }

    /// Progress in [0, 1]; 0 while the length is unknown
    pub fn fraction_complete(&self, now_ms: f64) -> f64 {
        if self.total_length <= 0.0 {
            return 0.0;
        }
        (self.time_in_audio(now_ms) / self.total_length).clamp(0.0, 1.0)
    }

    pub fn on_metadata(&mut self, meta: &TrackMetadata, now_ms: f64) -> Vec<ClockEvent> {
        let mut events = Vec::new();

        if meta.start_offset_ms == 0.0 {
            self.defer_update(&meta.title, meta.total_length, now_ms);
            events.push(ClockEvent::TrackStarted);
        }

        if self.phase == Phase::JustStarted {
            events.push(self.force_update(&meta.title, meta.total_length, now_ms));
        }

        if meta.skipped {
            events.push(self.force_update(&meta.title, meta.total_length, now_ms));
            events.push(ClockEvent::SkipCompleted);
        }

        self.last_offset_ms = meta.start_offset_ms;
        self.last_reported_title = Some(meta.title.clone());
        if self.num_listeners != Some(meta.num_listeners) {
            self.num_listeners = Some(meta.num_listeners);
            events.push(ClockEvent::ListenersChanged(meta.num_listeners));
        }

        if self.phase == Phase::JustStarted {
            self.relative_start_time = -meta.start_offset_ms;
            self.phase = Phase::Steady;
        }

        events
    }

    fn cancel_pending(&mut self) {
        if let Some(id) = self.pending.take() {
            self.swaps.cancel(id);
        }
    }

    fn force_update(&mut self, title: &str, total_length: f64, now_ms: f64) -> ClockEvent {
        self.cancel_pending();
        self.relative_start_time = self.time(now_ms);
        self.total_length = total_length;
        self.title = title.to_string();
        tracing::debug!("Now playing {} (immediate)", title);
        ClockEvent::TitleChanged(self.title.clone())
    }

    fn defer_update(&mut self, title: &str, total_length: f64, now_ms: f64) {
        self.cancel_pending();
        let deadline = now_ms + self.time_left_in_audio(now_ms);
        tracing::debug!("Next title {} due in {:.0}ms", title, deadline - now_ms);
        self.pending = Some(self.swaps.schedule(
            deadline,
            PendingTitle {
                title: title.to_string(),
                total_length,
            },
        ));
    }

    /// Apply a deferred title swap whose time has come
    pub fn fire_due(&mut self, now_ms: f64) -> Vec<ClockEvent> {
        let mut events = Vec::new();
        for (id, swap) in self.swaps.take_due(now_ms) {
            if self.pending == Some(id) {
                self.pending = None;
            }
            if self.title != LOADING_TITLE {
                self.relative_start_time = self.time(now_ms);
            }
            self.total_length = swap.total_length;
            self.title = swap.title;
            tracing::debug!("Now playing {}", self.title);
            events.push(ClockEvent::TitleChanged(self.title.clone()));
        }
        events
    }

    /// Deadline of the pending title swap
    pub fn next_deadline(&self) -> Option<f64> {
        self.swaps.next_deadline()
    }

    pub fn has_pending_title(&self) -> bool {
        self.pending.is_some()
    }

    /// Between a confirmed skip and the next metadata message
    pub fn force_skip_length(&mut self) {
        self.total_length = SKIP_LENGTH_SENTINEL;
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn num_listeners(&self) -> Option<u32> {
        self.num_listeners
    }

    /// Offset and title of the most recent metadata message
    pub fn last_reported(&self) -> Option<(f64, &str)> {
        self.last_reported_title
            .as_deref()
            .map(|title| (self.last_offset_ms, title))
    }

    pub fn snapshot(&self, now_ms: f64) -> NowPlaying {
        NowPlaying {
            title: self.title.clone(),
            position_ms: self.time_in_audio(now_ms),
            total_length_ms: self.total_length,
            fraction: self.fraction_complete(now_ms),
        }
    }
}
