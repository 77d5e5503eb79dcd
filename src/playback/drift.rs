//! Relevance test for arriving packets
//!
//! A packet is stale when it sits more than the lower guard behind the
//! current track position. Packets far enough behind (past the wrap guard)
//! are taken to be the start of the next track, whose offsets restart at
//! zero, and are let through.

use crate::config::PlaybackConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftGate {
    pub lower_guard_ms: f64,
    pub wrap_guard_ms: f64,
}

impl DriftGate {
    pub fn new(lower_guard_ms: f64, wrap_guard_ms: f64) -> Self {
        Self {
            lower_guard_ms,
            wrap_guard_ms,
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(config.lower_guard_ms, config.wrap_guard_ms)
    }

    /// Whether a packet at `packet_offset_ms` should play when the track is at `position_ms`
    pub fn accepts(&self, packet_offset_ms: f64, position_ms: f64) -> bool {
        packet_offset_ms > position_ms - self.lower_guard_ms || packet_offset_ms < position_ms - self.wrap_guard_ms
    }
}

impl Default for DriftGate {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_guards() {
        let gate = DriftGate::default();
        assert!(gate.accepts(9600.0, 10000.0));
        assert!(!gate.accepts(8000.0, 10000.0));
        // Next track
        assert!(gate.accepts(500.0, 30000.0));
        // Neither recent nor far enough back to be a new track
        assert!(!gate.accepts(500.0, 10000.0));
    }

    #[test]
    fn test_tight_lower_guard() {
        let gate = DriftGate::new(500.0, 20000.0);
        assert!(!gate.accepts(9000.0, 10000.0));
        assert!(gate.accepts(9600.0, 10000.0));
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let gate = DriftGate::default();
        assert!(!gate.accepts(9000.0, 10000.0));
        assert!(gate.accepts(9000.1, 10000.0));
        assert!(!gate.accepts(10000.0, 30000.0));
        assert!(gate.accepts(9999.9, 30000.0));
    }

    #[test]
    fn test_early_in_track_accepts_everything_ahead() {
        let gate = DriftGate::default();
        assert!(gate.accepts(0.0, 0.0));
        assert!(gate.accepts(0.0, 500.0));
    }
}
