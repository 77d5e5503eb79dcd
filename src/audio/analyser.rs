//! Lock-free visualization tap
//!
//! The output callback pushes post-gain stereo frames; a visualizer drains
//! them at its own pace. When the consumer falls behind the oldest frames
//! are discarded.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One post-gain stereo frame
pub type Frame = [f32; 2];

/// Bounded frame queue between the audio thread and a visualizer
pub struct AnalyserTap {
    queue: ArrayQueue<Frame>,
    overflow_count: AtomicUsize,
}

impl AnalyserTap {
    /// Create a tap holding up to `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame, evicting the oldest one if full
    pub fn push(&self, frame: Frame) {
        if let Err(frame) = self.queue.push(frame) {
            let _ = self.queue.pop();
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            let _ = self.queue.push(frame);
        }
    }

    /// Take up to `max` of the oldest frames
    pub fn drain(&self, max: usize) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(max.min(self.queue.len()));
        while frames.len() < max {
            match self.queue.pop() {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        frames
    }

    /// Drain everything queued and summarize it
    pub fn levels(&self) -> Levels {
        Levels::from_frames(&self.drain(self.queue.capacity()))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Frames discarded because the consumer fell behind
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a tap
pub type SharedAnalyser = Arc<AnalyserTap>;

/// Create a new shared tap
pub fn create_shared_analyser(capacity: usize) -> SharedAnalyser {
    Arc::new(AnalyserTap::new(capacity))
}

/// RMS and peak per channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Levels {
    pub rms: [f32; 2],
    pub peak: [f32; 2],
}

impl Levels {
    pub fn from_frames(frames: &[Frame]) -> Self {
        if frames.is_empty() {
            return Self::default();
        }
        let mut sum = [0.0f32; 2];
        let mut peak = [0.0f32; 2];
        for frame in frames {
            for ch in 0..2 {
                sum[ch] += frame[ch] * frame[ch];
                peak[ch] = peak[ch].max(frame[ch].abs());
            }
        }
        let n = frames.len() as f32;
        Self {
            rms: [(sum[0] / n).sqrt(), (sum[1] / n).sqrt()],
            peak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let tap = AnalyserTap::new(4);
        tap.push([0.1, 0.1]);
        tap.push([0.2, 0.2]);
        assert_eq!(tap.len(), 2);

        let frames = tap.drain(10);
        assert_eq!(frames, vec![[0.1, 0.1], [0.2, 0.2]]);
        assert!(tap.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let tap = AnalyserTap::new(2);
        tap.push([1.0, 1.0]);
        tap.push([2.0, 2.0]);
        tap.push([3.0, 3.0]);

        assert_eq!(tap.overflow_count(), 1);
        assert_eq!(tap.drain(2), vec![[2.0, 2.0], [3.0, 3.0]]);
    }

    #[test]
    fn test_levels() {
        let tap = AnalyserTap::new(8);
        tap.push([0.5, -1.0]);
        tap.push([-0.5, 0.0]);

        let levels = tap.levels();
        assert_eq!(levels.rms[0], 0.5);
        assert_eq!(levels.peak, [0.5, 1.0]);
        assert!(tap.is_empty());
        assert_eq!(Levels::from_frames(&[]), Levels::default());
    }
}
