//! Output graph contract
//!
//! A device exposes its own clock and a fixed graph:
//! per-buffer source → shared gain → shared analyser → speakers.
//! Times are seconds on the device clock.

use crate::audio::analyser::SharedAnalyser;
use crate::audio::pcm::StereoBuffer;
use crate::error::AudioError;

/// Handle to one scheduled source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// An open output device
pub trait AudioOutput {
    /// Audio clock: seconds of audio the device has played since it opened
    fn current_time(&self) -> f64;

    /// Connect `buffer` to the gain stage, starting at `when`
    ///
    /// A start time already in the past plays immediately.
    fn start_source(&mut self, buffer: StereoBuffer, when: f64) -> SourceId;

    /// Silence a source from `when`; unknown or finished sources are ignored
    fn stop_source(&mut self, id: SourceId, when: f64);

    /// Remove a source from the graph; unknown sources are ignored
    fn disconnect_source(&mut self, id: SourceId);

    /// Linear gain ramp from the current value to `target` over `duration` seconds
    fn ramp_gain(&mut self, target: f32, duration: f64);

    /// Gain right now
    fn gain(&self) -> f32;

    /// Visualization tap after the gain stage
    fn analyser(&self) -> SharedAnalyser;

    /// Release the device; every source is dropped
    fn close(&mut self);
}

/// Opens fresh output devices (one per resume)
pub trait OutputFactory {
    fn open(&mut self) -> Result<Box<dyn AudioOutput>, AudioError>;
}
