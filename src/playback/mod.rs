//! Playback: drift gate, volume curve and the playback session

pub mod drift;
pub mod session;
pub mod volume;

pub use drift::DriftGate;
pub use session::{BatchOutcome, PlaybackSession, SessionStats};
pub use volume::{offset_volume, volume_to_gain};
