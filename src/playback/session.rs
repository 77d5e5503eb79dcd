//! Playback session: decoder state, scheduler and gain stage
//!
//! Owns everything between an arriving packet batch and the output device.
//! The output device exists only while playing (plus the fade/teardown
//! grace period after a pause); batches arriving without one are dropped.

use crate::audio::analyser::SharedAnalyser;
use crate::audio::output::OutputFactory;
use crate::audio::scheduler::PcmScheduler;
use crate::codec::decoder::{DecoderState, PageDecoder, StreamDecoder};
use crate::config::PlaybackConfig;
use crate::constants::PAUSE_GAIN;
use crate::error::AudioError;
use crate::network::transport::{ConnectionId, StreamKind, TransportConnector};
use crate::playback::drift::DriftGate;
use crate::playback::volume::{clamp_volume, offset_volume, volume_to_gain};
use crate::protocol::PacketBatch;

/// What happened to the packets of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Passed the drift gate and went to the decoder
    pub accepted: usize,
    /// Rejected by the drift gate, or no output device
    pub dropped: usize,
    /// Accepted but failed to decode
    pub failed: usize,
}

/// Session statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub batches: u64,
    pub packets_accepted: u64,
    pub packets_dropped: u64,
    pub packets_failed: u64,
    pub outputs_opened: u64,
}

pub struct PlaybackSession<D> {
    decoder: StreamDecoder<D>,
    scheduler: Option<PcmScheduler>,
    outputs: Box<dyn OutputFactory>,
    gate: DriftGate,
    volume: f64,
    audio: Option<ConnectionId>,
    config: PlaybackConfig,
    stats: SessionStats,
}

impl<D: PageDecoder> PlaybackSession<D> {
    pub fn new(decoder: D, outputs: Box<dyn OutputFactory>, config: PlaybackConfig) -> Self {
        Self {
            decoder: StreamDecoder::new(decoder),
            scheduler: None,
            outputs,
            gate: DriftGate::from_config(&config),
            volume: clamp_volume(config.volume),
            audio: None,
            config,
            stats: SessionStats::default(),
        }
    }

    fn fade_seconds(&self) -> f64 {
        self.config.fade_ms / 1000.0
    }

    /// Decode and schedule every packet of `batch` that is still relevant
    /// at track position `position_ms`
    pub fn handle_batch(&mut self, batch: &PacketBatch, position_ms: f64) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        self.stats.batches += 1;

        let Some(scheduler) = self.scheduler.as_mut() else {
            tracing::trace!("No output device, dropping batch of {} packets", batch.packets.len());
            outcome.dropped = batch.packets.len();
            self.stats.packets_dropped += outcome.dropped as u64;
            return outcome;
        };

        let mut elapsed = 0.0;
        for packet in &batch.packets {
            let offset = batch.start_offset_ms + elapsed;
            elapsed += packet.duration_ms;

            if !self.gate.accepts(offset, position_ms) {
                tracing::trace!("Dropping packet at {:.0}ms (position {:.0}ms)", offset, position_ms);
                outcome.dropped += 1;
                continue;
            }

            outcome.accepted += 1;
            match self.decoder.decode_next(&packet.bytes) {
                Ok(pcm) if pcm.is_empty() => {
                    tracing::trace!("Packet at {:.0}ms decoded to no audio", offset);
                }
                Ok(pcm) => {
                    scheduler.schedule_pcm(&pcm);
                }
                Err(e) => {
                    tracing::warn!("Failed to decode packet at {:.0}ms: {}", offset, e);
                    outcome.failed += 1;
                }
            }
        }

        self.stats.packets_accepted += outcome.accepted as u64;
        self.stats.packets_dropped += outcome.dropped as u64;
        self.stats.packets_failed += outcome.failed as u64;
        outcome
    }

    /// Close the audio stream and fade out
    ///
    /// Returns false when already paused. The output device stays open
    /// until [`teardown_output`](Self::teardown_output) so the fade and any
    /// in-flight buffers can finish.
    pub fn pause(&mut self, connector: &mut dyn TransportConnector) -> bool {
        let Some(audio) = self.audio.take() else {
            return false;
        };
        connector.close(audio);

        let fade = self.fade_seconds();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.ramp_gain(PAUSE_GAIN, fade);
        }
        tracing::info!("Paused");
        true
    }

    /// Release the output device, if any
    pub fn teardown_output(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.close();
            tracing::debug!("Output device released");
        }
    }

    /// Open a fresh output device and the audio stream for `station`
    ///
    /// On failure nothing is left open.
    pub fn resume(&mut self, connector: &mut dyn TransportConnector, station: &str) -> Result<(), AudioError> {
        self.teardown_output();
        if let Some(previous) = self.audio.take() {
            connector.close(previous);
        }

        let output = self.outputs.open()?;
        self.scheduler = Some(PcmScheduler::new(output, self.config.resync_epsilon_ms / 1000.0));
        self.stats.outputs_opened += 1;

        // Previous packet belongs to a stream that no longer exists
        self.decoder.reset();

        self.audio = Some(connector.open(StreamKind::Audio, station));
        self.apply_volume();
        tracing::info!("Playing {}", station);
        Ok(())
    }

    /// The audio stream ended by itself; returns whether it was the current one
    pub fn on_audio_closed(&mut self, id: ConnectionId) -> bool {
        if self.audio == Some(id) {
            self.audio = None;
            let fade = self.fade_seconds();
            if let Some(scheduler) = self.scheduler.as_mut() {
                scheduler.ramp_gain(PAUSE_GAIN, fade);
            }
            true
        } else {
            false
        }
    }

    /// Set volume on the 0-200 scale
    pub fn set_volume(&mut self, volume: f64) {
        self.volume = clamp_volume(volume);
        self.apply_volume();
    }

    /// Change volume by `delta`; the result stays within (0, 200]
    pub fn change_volume_by(&mut self, delta: f64) {
        self.set_volume(offset_volume(self.volume, delta));
    }

    /// Ramp to the current volume; only while the audio stream is open
    fn apply_volume(&mut self) {
        if self.audio.is_none() {
            return;
        }
        let fade = self.fade_seconds();
        let gain = volume_to_gain(self.volume);
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.ramp_gain(gain, fade);
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Drop everything queued on the output
    pub fn clear_queued(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.clear();
        }
    }

    /// Close the audio stream and the output device immediately
    pub fn stop(&mut self, connector: &mut dyn TransportConnector) {
        if let Some(audio) = self.audio.take() {
            connector.close(audio);
        }
        self.teardown_output();
    }

    pub fn audio_connection(&self) -> Option<ConnectionId> {
        self.audio
    }

    pub fn is_playing(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_output(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn scheduler(&self) -> Option<&PcmScheduler> {
        self.scheduler.as_ref()
    }

    /// Visualization tap of the current output device
    pub fn analyser(&self) -> Option<SharedAnalyser> {
        self.scheduler.as_ref().map(|s| s.analyser())
    }

    pub fn decoder_state(&self) -> &DecoderState {
        self.decoder.state()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AudioPacket;
    use crate::testing::{FakeOutputFactory, OutputCall, RecordingConnector, StubDecoder};
    use bytes::Bytes;

    /// Stub output for one 500 ms packet
    const HALF_SECOND_PCM: usize = 24000 * 4;

    fn packet(tag: &'static [u8], duration_ms: f64) -> AudioPacket {
        AudioPacket {
            bytes: Bytes::from_static(tag),
            duration_ms,
        }
    }

    fn session(factory: &FakeOutputFactory) -> PlaybackSession<StubDecoder> {
        PlaybackSession::new(
            StubDecoder::new(HALF_SECOND_PCM),
            Box::new(factory.clone()),
            PlaybackConfig::default(),
        )
    }

    #[test]
    fn test_batch_without_output_is_dropped() {
        let factory = FakeOutputFactory::new();
        let mut session = session(&factory);
        let batch = PacketBatch {
            start_offset_ms: 0.0,
            packets: vec![packet(b"a", 500.0)],
        };

        let outcome = session.handle_batch(&batch, 0.0);
        assert_eq!(outcome.dropped, 1);
        assert!(session.decoder_state().previous().is_none());
    }

    #[test]
    fn test_back_to_back_batch() {
        let factory = FakeOutputFactory::new();
        let mut connector = RecordingConnector::new();
        let mut session = session(&factory);
        session.resume(&mut connector, "lofi").unwrap();

        let batch = PacketBatch {
            start_offset_ms: 0.0,
            packets: vec![packet(b"a", 500.0), packet(b"b", 500.0)],
        };
        let before = session.scheduler().unwrap().next_free_time();
        let outcome = session.handle_batch(&batch, 0.0);

        assert_eq!(outcome, BatchOutcome { accepted: 2, dropped: 0, failed: 0 });
        let after = session.scheduler().unwrap().next_free_time();
        assert!((after - before - 1.0).abs() < 1e-9);
        assert_eq!(factory.latest().unwrap().starts().len(), 2);
    }

    #[test]
    fn test_stale_packets_do_not_advance_state() {
        let factory = FakeOutputFactory::new();
        let mut connector = RecordingConnector::new();
        let mut session = session(&factory);
        session.resume(&mut connector, "lofi").unwrap();

        let batch = PacketBatch {
            start_offset_ms: 8000.0,
            packets: vec![packet(b"old", 1000.0), packet(b"new", 1000.0), packet(b"newer", 500.0)],
        };
        // Offsets 8000, 9000, 10000 at position 10000
        let outcome = session.handle_batch(&batch, 10000.0);

        assert_eq!(outcome.dropped, 2);
        assert_eq!(outcome.accepted, 1);
        assert_eq!(&session.decoder_state().previous().unwrap()[..], b"newer");
    }

    #[test]
    fn test_decode_failure_still_advances_state() {
        let factory = FakeOutputFactory::new();
        let mut connector = RecordingConnector::new();
        let mut session = session(&factory);
        session.resume(&mut connector, "lofi").unwrap();

        let batch = PacketBatch {
            start_offset_ms: 0.0,
            packets: vec![packet(b"fail", 500.0)],
        };
        let outcome = session.handle_batch(&batch, 0.0);

        assert_eq!(outcome.failed, 1);
        assert_eq!(&session.decoder_state().previous().unwrap()[..], b"fail");
        assert!(factory.latest().unwrap().starts().is_empty());
        assert_eq!(session.stats().packets_failed, 1);
    }

    #[test]
    fn test_pause_fades_and_closes_stream() {
        let factory = FakeOutputFactory::new();
        let mut connector = RecordingConnector::new();
        let mut session = session(&factory);
        session.resume(&mut connector, "lofi").unwrap();
        let audio = session.audio_connection().unwrap();

        assert!(session.pause(&mut connector));
        assert!(!session.pause(&mut connector));
        assert!(connector.closed().contains(&audio));
        assert!(session.has_output());

        let calls = factory.latest().unwrap().calls();
        assert_eq!(
            calls.last(),
            Some(&OutputCall::Ramp { target: PAUSE_GAIN, duration: 0.1 })
        );

        session.teardown_output();
        assert!(!session.has_output());
        assert!(factory.latest().unwrap().is_closed());
    }

    #[test]
    fn test_resume_opens_fresh_output() {
        let factory = FakeOutputFactory::new();
        let mut connector = RecordingConnector::new();
        let mut session = session(&factory);

        session.resume(&mut connector, "lofi").unwrap();
        session.handle_batch(
            &PacketBatch {
                start_offset_ms: 0.0,
                packets: vec![packet(b"a", 500.0)],
            },
            0.0,
        );
        session.pause(&mut connector);
        session.resume(&mut connector, "lofi").unwrap();

        let opened = factory.opened();
        assert_eq!(opened.len(), 2);
        assert!(opened[0].is_closed());
        assert!(!opened[1].is_closed());
        assert!(session.decoder_state().previous().is_none());
        assert_eq!(connector.open_ids(StreamKind::Audio).len(), 1);
    }

    #[test]
    fn test_resume_failure_leaves_nothing_open() {
        let factory = FakeOutputFactory::new();
        factory.fail_next_open();
        let mut connector = RecordingConnector::new();
        let mut session = session(&factory);

        assert!(session.resume(&mut connector, "lofi").is_err());
        assert!(!session.is_playing());
        assert!(!session.has_output());
        assert!(connector.opened().is_empty());
    }

    #[test]
    fn test_volume_applies_only_while_streaming() {
        let factory = FakeOutputFactory::new();
        let mut connector = RecordingConnector::new();
        let mut session = session(&factory);

        session.set_volume(100.0);
        assert_eq!(session.volume(), 100.0);

        session.resume(&mut connector, "lofi").unwrap();
        let output = factory.latest().unwrap();
        assert_eq!(output.calls().last(), Some(&OutputCall::Ramp { target: 0.5, duration: 0.1 }));

        session.change_volume_by(-500.0);
        assert_eq!(session.volume(), 0.001);

        session.pause(&mut connector);
        let calls_before = output.calls().len();
        session.set_volume(150.0);
        assert_eq!(output.calls().len(), calls_before);
    }

    #[test]
    fn test_clear_queued() {
        let factory = FakeOutputFactory::new();
        let mut connector = RecordingConnector::new();
        let mut session = session(&factory);
        session.resume(&mut connector, "lofi").unwrap();
        session.handle_batch(
            &PacketBatch {
                start_offset_ms: 0.0,
                packets: vec![packet(b"a", 500.0), packet(b"b", 500.0)],
            },
            0.0,
        );

        session.clear_queued();
        assert_eq!(session.scheduler().unwrap().scheduled_len(), 0);
    }

    #[test]
    fn test_on_audio_closed_ignores_other_ids() {
        let factory = FakeOutputFactory::new();
        let mut connector = RecordingConnector::new();
        let mut session = session(&factory);
        session.resume(&mut connector, "lofi").unwrap();
        let audio = session.audio_connection().unwrap();

        assert!(!session.on_audio_closed(ConnectionId(audio.0 + 100)));
        assert!(session.is_playing());
        assert!(session.on_audio_closed(audio));
        assert!(!session.is_playing());
    }
}
