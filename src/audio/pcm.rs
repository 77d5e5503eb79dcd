//! Interleaved PCM to per-channel float buffers

use crate::constants::{BYTES_PER_FRAME, SAMPLE_RATE};

const POSITIVE_DIVISOR: f32 = 32767.0;
const NEGATIVE_DIVISOR: f32 = 32768.0;

/// De-interleaved stereo audio ready for an output source
#[derive(Debug, Clone, PartialEq)]
pub struct StereoBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

impl StereoBuffer {
    /// Frames per channel
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Map an i16 sample into [-1, 1]; both extremes land exactly on the bounds
#[inline]
pub fn normalize(sample: i16) -> f32 {
    if sample > 0 {
        sample as f32 / POSITIVE_DIVISOR
    } else {
        sample as f32 / NEGATIVE_DIVISOR
    }
}

/// Split a 32-bit interleaved unit into (left, right): low half is left
#[inline]
pub fn split_frame(unit: i32) -> (i16, i16) {
    ((unit & 0xFFFF) as u16 as i16, (unit >> 16) as i16)
}

/// Convert interleaved 16-bit little-endian stereo into a [`StereoBuffer`]
///
/// The buffer carries one extra zero frame at the end; a source that stops
/// on a non-zero sample clicks. Trailing bytes short of a frame are ignored.
pub fn pcm_to_stereo(pcm: &[u8]) -> StereoBuffer {
    let frames = pcm.len() / BYTES_PER_FRAME;
    let mut left = vec![0.0f32; frames + 1];
    let mut right = vec![0.0f32; frames + 1];

    for (i, chunk) in pcm.chunks_exact(BYTES_PER_FRAME).enumerate() {
        let unit = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let (l, r) = split_frame(unit);
        left[i] = normalize(l);
        right[i] = normalize(r);
    }

    StereoBuffer {
        left,
        right,
        sample_rate: SAMPLE_RATE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame_bytes(left: i16, right: i16) -> [u8; 4] {
        let l = left.to_le_bytes();
        let r = right.to_le_bytes();
        [l[0], l[1], r[0], r[1]]
    }

    #[test]
    fn test_extremes() {
        assert_eq!(normalize(i16::MIN), -1.0);
        assert_eq!(normalize(i16::MAX), 1.0);
        assert_eq!(normalize(0), 0.0);
        assert_eq!(normalize(-16384), -0.5);
    }

    #[test]
    fn test_left_is_low_half() {
        let unit = i32::from_le_bytes(frame_bytes(-2, 300));
        assert_eq!(split_frame(unit), (-2, 300));
    }

    #[test]
    fn test_trailing_zero_frame() {
        let mut pcm = Vec::new();
        pcm.extend_from_slice(&frame_bytes(i16::MAX, i16::MIN));
        pcm.extend_from_slice(&frame_bytes(100, -100));

        let buffer = pcm_to_stereo(&pcm);
        assert_eq!(buffer.frames(), 3);
        assert_eq!(buffer.left, vec![1.0, 100.0 / 32767.0, 0.0]);
        assert_eq!(buffer.right, vec![-1.0, -100.0 / 32768.0, 0.0]);
    }

    #[test]
    fn test_partial_frame_ignored() {
        let mut pcm = frame_bytes(1, 1).to_vec();
        pcm.extend_from_slice(&[0xFF, 0x7F]);
        assert_eq!(pcm_to_stereo(&pcm).frames(), 2);
    }

    #[test]
    fn test_duration() {
        let pcm = vec![0u8; 47999 * BYTES_PER_FRAME];
        assert!((pcm_to_stereo(&pcm).duration() - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_channels_split_and_stay_in_range(left in any::<i16>(), right in any::<i16>()) {
            let buffer = pcm_to_stereo(&frame_bytes(left, right));
            prop_assert_eq!(buffer.left[0], normalize(left));
            prop_assert_eq!(buffer.right[0], normalize(right));
            prop_assert!((-1.0..=1.0).contains(&buffer.left[0]));
            prop_assert!((-1.0..=1.0).contains(&buffer.right[0]));
            prop_assert_eq!(buffer.left[0] > 0.0, left > 0);
        }
    }
}
