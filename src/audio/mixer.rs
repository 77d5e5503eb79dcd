//! Sample-accurate voice mixing
//!
//! The device clock is the number of frames rendered so far. Each scheduled
//! buffer becomes a voice that starts at a frame on that clock; rendering a
//! block sums every voice overlapping it, applies the gain automation and
//! feeds the analyser tap.

use crate::audio::analyser::AnalyserTap;
use crate::audio::output::SourceId;
use crate::audio::pcm::StereoBuffer;

#[derive(Debug, Clone, Copy)]
struct Ramp {
    start_frame: u64,
    end_frame: u64,
    from: f32,
    to: f32,
}

/// Gain with linear ramps, evaluated per frame
#[derive(Debug, Clone)]
pub struct GainParam {
    value: f32,
    ramp: Option<Ramp>,
}

impl GainParam {
    pub fn new(value: f32) -> Self {
        Self { value, ramp: None }
    }

    /// Gain at `frame`
    pub fn value_at(&self, frame: u64) -> f32 {
        match self.ramp {
            Some(ramp) if frame < ramp.end_frame => {
                if frame <= ramp.start_frame {
                    return ramp.from;
                }
                let t = (frame - ramp.start_frame) as f32 / (ramp.end_frame - ramp.start_frame) as f32;
                ramp.from + (ramp.to - ramp.from) * t
            }
            Some(ramp) => ramp.to,
            None => self.value,
        }
    }

    /// Ramp from the value at `now_frame` to `target`, reached at `end_frame`
    pub fn ramp_to(&mut self, now_frame: u64, target: f32, end_frame: u64) {
        let from = self.value_at(now_frame);
        if end_frame <= now_frame {
            self.value = target;
            self.ramp = None;
            return;
        }
        self.value = target;
        self.ramp = Some(Ramp {
            start_frame: now_frame,
            end_frame,
            from,
            to: target,
        });
    }
}

#[derive(Debug)]
struct Voice {
    id: SourceId,
    start_frame: u64,
    stop_frame: Option<u64>,
    buffer: StereoBuffer,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        let natural = self.start_frame + self.buffer.frames() as u64;
        match self.stop_frame {
            Some(stop) => stop.min(natural),
            None => natural,
        }
    }
}

/// Mixer state shared between the control side and the output callback
#[derive(Debug)]
pub struct VoiceMixer {
    sample_rate: u32,
    frame: u64,
    voices: Vec<Voice>,
    gain: GainParam,
    next_id: u64,
    scratch: Vec<[f32; 2]>,
}

impl VoiceMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame: 0,
            voices: Vec::new(),
            gain: GainParam::new(1.0),
            next_id: 0,
            scratch: Vec::new(),
        }
    }

    fn to_frame(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Clock in seconds
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn add_voice(&mut self, buffer: StereoBuffer, when: f64) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        let start_frame = self.to_frame(when).max(self.frame);
        self.voices.push(Voice {
            id,
            start_frame,
            stop_frame: None,
            buffer,
        });
        id
    }

    pub fn stop_voice(&mut self, id: SourceId, when: f64) {
        let stop = self.to_frame(when).max(self.frame);
        if let Some(voice) = self.voices.iter_mut().find(|v| v.id == id) {
            voice.stop_frame = Some(stop);
        }
    }

    pub fn remove_voice(&mut self, id: SourceId) {
        self.voices.retain(|v| v.id != id);
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn ramp_gain(&mut self, target: f32, duration: f64) {
        let end = self.frame + self.to_frame(duration);
        self.gain.ramp_to(self.frame, target, end);
    }

    pub fn gain(&self) -> f32 {
        self.gain.value_at(self.frame)
    }

    /// Render one block of interleaved output and advance the clock
    ///
    /// Stereo goes to the first two channels; a mono device gets the average.
    pub fn render(&mut self, out: &mut [f32], channels: usize, tap: Option<&AnalyserTap>) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let block_start = self.frame;
        let block_end = block_start + frames as u64;

        self.scratch.clear();
        self.scratch.resize(frames, [0.0; 2]);

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for f in from..to {
                let i = (f - block_start) as usize;
                let j = (f - voice.start_frame) as usize;
                self.scratch[i][0] += voice.buffer.left[j];
                self.scratch[i][1] += voice.buffer.right[j];
            }
        }

        for (i, (frame, mixed)) in out.chunks_exact_mut(channels).zip(&self.scratch).enumerate() {
            let g = self.gain.value_at(block_start + i as u64);
            let sample = [mixed[0] * g, mixed[1] * g];
            if channels == 1 {
                frame[0] = (sample[0] + sample[1]) * 0.5;
            } else {
                frame[0] = sample[0];
                frame[1] = sample[1];
                for extra in frame.iter_mut().skip(2) {
                    *extra = 0.0;
                }
            }
            if let Some(tap) = tap {
                tap.push(sample);
            }
        }

        self.frame = block_end;
        self.voices.retain(|v| v.end_frame() > block_end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(frames: usize, value: f32) -> StereoBuffer {
        StereoBuffer {
            left: vec![value; frames],
            right: vec![-value; frames],
            sample_rate: 10,
        }
    }

    #[test]
    fn test_voice_starts_on_its_frame() {
        let mut mixer = VoiceMixer::new(10);
        mixer.add_voice(buffer(3, 0.5), 0.2);

        let mut out = vec![1.0f32; 12];
        mixer.render(&mut out, 2, None);

        let left: Vec<f32> = out.chunks(2).map(|f| f[0]).collect();
        assert_eq!(left, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.0]);
        assert_eq!(mixer.voice_count(), 0);
        assert!((mixer.current_time() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_back_to_back_voices_are_gapless() {
        let mut mixer = VoiceMixer::new(10);
        mixer.add_voice(buffer(2, 0.25), 0.0);
        mixer.add_voice(buffer(2, 0.5), 0.2);

        let mut out = vec![0.0f32; 8];
        mixer.render(&mut out, 2, None);
        let left: Vec<f32> = out.chunks(2).map(|f| f[0]).collect();
        assert_eq!(left, vec![0.25, 0.25, 0.5, 0.5]);
    }

    #[test]
    fn test_stop_and_remove() {
        let mut mixer = VoiceMixer::new(10);
        let a = mixer.add_voice(buffer(10, 1.0), 0.0);
        let b = mixer.add_voice(buffer(10, 1.0), 0.0);
        mixer.stop_voice(a, 0.1);
        mixer.remove_voice(b);
        mixer.stop_voice(SourceId(99), 0.0);

        let mut out = vec![0.0f32; 6];
        mixer.render(&mut out, 2, None);
        let left: Vec<f32> = out.chunks(2).map(|f| f[0]).collect();
        assert_eq!(left, vec![1.0, 0.0, 0.0]);
        assert_eq!(mixer.voice_count(), 0);
    }

    #[test]
    fn test_late_start_plays_immediately() {
        let mut mixer = VoiceMixer::new(10);
        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 2, None);

        mixer.add_voice(buffer(1, 0.75), 0.0);
        mixer.render(&mut out, 2, None);
        assert_eq!(out[0], 0.75);
    }

    #[test]
    fn test_gain_ramp() {
        let mut mixer = VoiceMixer::new(10);
        mixer.add_voice(buffer(10, 1.0), 0.0);
        mixer.ramp_gain(0.0, 0.4);

        let mut out = vec![0.0f32; 12];
        mixer.render(&mut out, 2, None);
        let left: Vec<f32> = out.chunks(2).map(|f| f[0]).collect();
        assert_eq!(left, vec![1.0, 0.75, 0.5, 0.25, 0.0, 0.0]);
        assert_eq!(mixer.gain(), 0.0);
    }

    #[test]
    fn test_mono_device_and_tap() {
        let mut mixer = VoiceMixer::new(10);
        mixer.add_voice(
            StereoBuffer {
                left: vec![1.0],
                right: vec![0.0],
                sample_rate: 10,
            },
            0.0,
        );
        let tap = AnalyserTap::new(8);

        let mut out = vec![0.0f32; 2];
        mixer.render(&mut out, 1, Some(&tap));
        assert_eq!(out, vec![0.5, 0.0]);
        assert_eq!(tap.drain(8), vec![[1.0, 0.0], [0.0, 0.0]]);
    }
}
