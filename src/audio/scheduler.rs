//! Gapless scheduling of decoded PCM on the output clock
//!
//! Buffers are laid end to end on a cursor (`next_free_time`). If the cursor
//! falls behind the device clock (network stall, late batch) it jumps to
//! the clock plus a small lead, since a start time in the past would be
//! clipped.

use std::collections::VecDeque;

use crate::audio::analyser::SharedAnalyser;
use crate::audio::output::{AudioOutput, SourceId};
use crate::audio::pcm::pcm_to_stereo;

/// A source connected to the graph and when it finishes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: SourceId,
    pub end_time: f64,
}

/// Round to 2 decimal places
fn round_centis(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

/// Cursor-based PCM scheduler owning one output device
pub struct PcmScheduler {
    output: Box<dyn AudioOutput>,
    next_free_time: f64,
    scheduled: VecDeque<ScheduledBuffer>,
    resync_epsilon: f64,
    resyncs: u64,
}

impl PcmScheduler {
    /// `resync_epsilon` is in seconds
    pub fn new(output: Box<dyn AudioOutput>, resync_epsilon: f64) -> Self {
        Self {
            output,
            next_free_time: 0.0,
            scheduled: VecDeque::new(),
            resync_epsilon,
            resyncs: 0,
        }
    }

    /// Schedule interleaved 16-bit stereo PCM right after everything already queued
    pub fn schedule_pcm(&mut self, pcm: &[u8]) -> SourceId {
        let buffer = pcm_to_stereo(pcm);
        let duration = buffer.duration();

        let now = self.output.current_time();
        if self.next_free_time < now {
            tracing::debug!(
                "Playback cursor {:.3}s behind clock {:.3}s, resyncing",
                now - self.next_free_time,
                now
            );
            self.next_free_time = now + self.resync_epsilon;
            self.resyncs += 1;
        }

        let start = self.next_free_time;
        let id = self.output.start_source(buffer, start);

        self.prune(now);
        self.scheduled.push_back(ScheduledBuffer {
            id,
            end_time: start + duration,
        });

        // The trailing guard frame is absorbed by the rounding
        self.next_free_time += round_centis(duration);
        id
    }

    /// Disconnect every source that has finished by `now`
    pub fn prune(&mut self, now: f64) {
        let output = &mut self.output;
        self.scheduled.retain(|entry| {
            if entry.end_time < now {
                output.disconnect_source(entry.id);
                false
            } else {
                true
            }
        });
    }

    /// Stop and disconnect everything queued; the cursor snaps to the clock
    pub fn clear(&mut self) {
        let now = self.output.current_time();
        for entry in self.scheduled.drain(..) {
            self.output.stop_source(entry.id, now);
            self.output.disconnect_source(entry.id);
        }
        self.next_free_time = now;
    }

    /// Flush and release the output device
    pub fn close(mut self) {
        self.clear();
        self.output.close();
    }

    pub fn next_free_time(&self) -> f64 {
        self.next_free_time
    }

    /// Sources currently registered
    pub fn scheduled(&self) -> impl Iterator<Item = &ScheduledBuffer> {
        self.scheduled.iter()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    /// Seconds of audio queued ahead of the clock
    pub fn buffered_ahead(&self) -> f64 {
        (self.next_free_time - self.output.current_time()).max(0.0)
    }

    /// Times the cursor had to jump forward to the clock
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn ramp_gain(&mut self, target: f32, duration: f64) {
        self.output.ramp_gain(target, duration);
    }

    pub fn gain(&self) -> f32 {
        self.output.gain()
    }

    pub fn analyser(&self) -> SharedAnalyser {
        self.output.analyser()
    }
}
