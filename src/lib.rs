//! # Live Radio Client
//!
//! Gapless playout of a live radio station streamed as small framed
//! packets over WebSockets.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               RADIO SERVER                                   │
//! │   audio_broadcast (WS)          metadata_only (WS)         HTTP directory    │
//! │   {start_offset, pages[]}       {title, start_offset,...}  station/queue/... │
//! └───────────┬───────────────────────────────┬─────────────────────┬──────────┘
//!             │                               │                     │
//!             ▼                               ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        Client driver (client::RadioClient)                   │
//! │   select! { commands, transport events, fetch results, next deadline }      │
//! └───────────┬───────────────────────────────┬─────────────────────────────────┘
//!             │                               │
//!             ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                   Session Controller (controller) IDLE/PLAYING/...           │
//! │  ┌──────────────────────────────────┐   ┌──────────────────────────────┐    │
//! │  │ Playback Session                 │   │ Now-Playing Clock            │    │
//! │  │  drift gate ─► Decoder Adapter   │◄──│  time_in_audio()             │    │
//! │  │              (prev Ogg page)     │   │  deferred / forced titles    │    │
//! │  │                  │               │   └──────────────────────────────┘    │
//! │  │                  ▼               │                                       │
//! │  │            PCM Scheduler         │   Scheduled tasks (timer)             │
//! │  │        next_free_time cursor     │   title swap / teardown / settle      │
//! │  └──────────────────┬───────────────┘                                       │
//! └─────────────────────┼───────────────────────────────────────────────────────┘
//!                       ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │  Output device (audio::device)                                              │
//! │  source voices ─► gain ramp ─► analyser tap ─► cpal stream (audio clock)    │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod network;
pub mod now_playing;
pub mod playback;
pub mod protocol;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of decoded station audio
    pub const SAMPLE_RATE: u32 = 48000;

    /// Channel count of decoded station audio (stereo)
    pub const CHANNELS: u16 = 2;

    /// Bytes per interleaved stereo frame (two i16 samples)
    pub const BYTES_PER_FRAME: usize = 4;

    /// Packets older than this (relative to the track position) are dropped
    pub const DEFAULT_LOWER_GUARD_MS: f64 = 1000.0;

    /// Packets further in the past than this are taken to belong to the next track
    pub const DEFAULT_WRAP_GUARD_MS: f64 = 20000.0;

    /// Lead added to the audio clock when the playback cursor fell behind it
    pub const DEFAULT_RESYNC_EPSILON_MS: f64 = 100.0;

    /// Gain ramp length used for volume changes and pause fade-out
    pub const DEFAULT_FADE_MS: f64 = 100.0;

    /// Delay between pausing and releasing the output device
    pub const DEFAULT_TEARDOWN_GRACE_MS: f64 = 2000.0;

    /// Delay between closing the old metadata stream and opening the new one
    pub const DEFAULT_SWITCH_SETTLE_MS: f64 = 200.0;

    /// Default user volume on the 0-200 scale
    pub const DEFAULT_VOLUME: f64 = 150.0;

    /// Maximum user volume
    pub const MAX_VOLUME: f64 = 200.0;

    /// Gain the pause fade ramps down to (a ramp cannot target exactly zero)
    pub const PAUSE_GAIN: f32 = 0.00001;

    /// Total length placeholder used between a skip and the next metadata message
    pub const SKIP_LENGTH_SENTINEL: f64 = 1.0;

    /// Title shown while waiting for the first metadata message
    pub const LOADING_TITLE: &str = "Loading...";

    /// Analyser tap capacity (in stereo frames)
    pub const ANALYSER_CAPACITY: usize = 4096;
}
