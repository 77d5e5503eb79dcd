//! Page decoding with cross-packet prediction
//!
//! Every Ogg page is decoded by a fresh Opus decoder primed with the
//! previous page's packets, so a page can be decoded knowing nothing but
//! its predecessor. The output is interleaved little-endian i16 stereo.

use bytes::Bytes;
use opus::{Channels, Decoder};
use std::ops::{Deref, DerefMut};

use crate::codec::ogg::OggPage;
use crate::constants::{BYTES_PER_FRAME, SAMPLE_RATE};
use crate::error::CodecError;

/// Largest Opus frame: 120 ms at 48 kHz
const MAX_FRAME_SAMPLES: usize = 5760;

/// External decoder contract
///
/// Two-phase: the caller asks for the exact output size, then hands in a
/// buffer of that size.
pub trait PageDecoder {
    /// Bytes of PCM `current` decodes to
    fn size_needed(&self, current: &[u8]) -> Result<usize, CodecError>;

    /// Decode `current` into `out`, using `previous` as context; returns bytes written
    fn decode_into(&mut self, current: &[u8], previous: Option<&[u8]>, out: &mut [u8]) -> Result<usize, CodecError>;
}

/// libopus-backed decoder for Ogg pages of 48 kHz stereo Opus
#[derive(Debug, Default)]
pub struct OpusPageDecoder;

impl OpusPageDecoder {
    pub fn new() -> Self {
        Self
    }

    fn is_header_packet(packet: &[u8]) -> bool {
        packet.starts_with(b"OpusHead") || packet.starts_with(b"OpusTags")
    }
}

impl PageDecoder for OpusPageDecoder {
    fn size_needed(&self, current: &[u8]) -> Result<usize, CodecError> {
        let page = OggPage::parse(current)?;
        let frames: usize = page
            .packets()
            .filter(|p| !Self::is_header_packet(p))
            .filter_map(|p| opus::packet::get_nb_samples(p, SAMPLE_RATE).ok())
            .sum();
        Ok(frames * BYTES_PER_FRAME)
    }

    fn decode_into(&mut self, current: &[u8], previous: Option<&[u8]>, out: &mut [u8]) -> Result<usize, CodecError> {
        let page = OggPage::parse(current)?;
        let mut decoder = Decoder::new(SAMPLE_RATE, Channels::Stereo)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;
        let mut frame = vec![0i16; MAX_FRAME_SAMPLES * 2];

        // Prime the predictor; output is discarded
        if let Some(previous) = previous {
            match OggPage::parse(previous) {
                Ok(prev_page) => {
                    for packet in prev_page.packets().filter(|p| !Self::is_header_packet(p)) {
                        let _ = decoder.decode(packet, &mut frame, false);
                    }
                }
                Err(e) => tracing::debug!("Previous page unusable as context: {}", e),
            }
        }

        let mut written = 0;
        for packet in page.packets().filter(|p| !Self::is_header_packet(p)) {
            let samples = match decoder.decode(packet, &mut frame, false) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::debug!("Skipping undecodable packet ({} bytes): {}", packet.len(), e);
                    continue;
                }
            };

            let bytes = samples * BYTES_PER_FRAME;
            if written + bytes > out.len() {
                return Err(CodecError::BufferTooSmall {
                    needed: written + bytes,
                    available: out.len(),
                });
            }
            for (dst, sample) in out[written..written + bytes]
                .chunks_exact_mut(2)
                .zip(&frame[..samples * 2])
            {
                dst.copy_from_slice(&sample.to_le_bytes());
            }
            written += bytes;
        }

        Ok(written)
    }
}

/// Reusable scratch memory handed out one decode call at a time
#[derive(Debug, Default)]
struct Scratch {
    buffer: Vec<u8>,
}

impl Scratch {
    fn lease(&mut self, len: usize) -> BufferLease<'_> {
        self.buffer.clear();
        self.buffer.resize(len, 0);
        BufferLease { buffer: &mut self.buffer }
    }
}

/// Exclusive, sized view of the scratch buffer; wiped when dropped
struct BufferLease<'a> {
    buffer: &'a mut Vec<u8>,
}

impl Deref for BufferLease<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer
    }
}

impl DerefMut for BufferLease<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        self.buffer.clear();
    }
}

/// Wraps a [`PageDecoder`] with sized output leasing
pub struct DecoderAdapter<D> {
    decoder: D,
    scratch: Scratch,
}

impl<D: PageDecoder> DecoderAdapter<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            scratch: Scratch::default(),
        }
    }

    /// Decode `current` with `previous` as context into owned PCM bytes
    pub fn decode(&mut self, current: &[u8], previous: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
        let needed = self.decoder.size_needed(current)?;
        let mut lease = self.scratch.lease(needed);
        let written = self.decoder.decode_into(current, previous, &mut lease)?;
        Ok(lease[..written].to_vec())
    }
}

/// The previous packet's raw bytes
#[derive(Debug, Default)]
pub struct DecoderState {
    previous: Option<Bytes>,
}

impl DecoderState {
    pub fn previous(&self) -> Option<&Bytes> {
        self.previous.as_ref()
    }

    fn advance(&mut self, packet: Bytes) {
        self.previous = Some(packet);
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Decoder adapter plus the state threading packets together
pub struct StreamDecoder<D> {
    adapter: DecoderAdapter<D>,
    state: DecoderState,
}

impl<D: PageDecoder> StreamDecoder<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            adapter: DecoderAdapter::new(decoder),
            state: DecoderState::default(),
        }
    }

    /// Decode the next packet of the stream
    ///
    /// The state advances to `packet` whether or not decoding succeeds.
    pub fn decode_next(&mut self, packet: &Bytes) -> Result<Vec<u8>, CodecError> {
        let result = self
            .adapter
            .decode(packet, self.state.previous().map(|b| &b[..]));
        self.state.advance(packet.clone());
        result
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// Forget the previous packet (new stream)
    pub fn reset(&mut self) {
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ogg::tests::page_of;
    use crate::testing::StubDecoder;

    fn encode_page(frames: usize, phase: f32) -> Vec<u8> {
        let mut encoder = opus::Encoder::new(48000, Channels::Stereo, opus::Application::Audio).unwrap();
        let mut packets = Vec::new();
        for f in 0..frames {
            let mut pcm = Vec::with_capacity(960 * 2);
            for i in 0..960 {
                let t = (f * 960 + i) as f32 / 48000.0;
                let v = ((t * 440.0 * 2.0 * std::f32::consts::PI + phase).sin() * 8000.0) as i16;
                pcm.push(v);
                pcm.push(v);
            }
            let mut out = vec![0u8; 4000];
            let len = encoder.encode(&pcm, &mut out).unwrap();
            out.truncate(len);
            packets.push(out);
        }
        let refs: Vec<&[u8]> = packets.iter().map(|p| &p[..]).collect();
        page_of(&refs)
    }

    #[test]
    fn test_opus_page_size_and_decode() {
        let page = encode_page(3, 0.0);
        let mut decoder = OpusPageDecoder::new();

        let needed = decoder.size_needed(&page).unwrap();
        assert_eq!(needed, 3 * 960 * BYTES_PER_FRAME);

        let mut out = vec![0u8; needed];
        let written = decoder.decode_into(&page, None, &mut out).unwrap();
        assert_eq!(written, needed);
    }

    #[test]
    fn test_opus_decode_with_previous_page() {
        let previous = encode_page(2, 0.0);
        let current = encode_page(2, 1.0);
        let mut adapter = DecoderAdapter::new(OpusPageDecoder::new());

        let pcm = adapter.decode(&current, Some(&previous)).unwrap();
        assert_eq!(pcm.len(), 2 * 960 * BYTES_PER_FRAME);
    }

    #[test]
    fn test_header_pages_decode_to_nothing() {
        let mut head = b"OpusHead".to_vec();
        head.extend_from_slice(&[1, 2, 0x38, 0x01, 0x80, 0xbb, 0, 0, 0, 0, 0]);
        let page = page_of(&[&head[..]]);

        let mut adapter = DecoderAdapter::new(OpusPageDecoder::new());
        assert!(adapter.decode(&page, None).unwrap().is_empty());
    }

    #[test]
    fn test_buffer_too_small() {
        let page = encode_page(2, 0.0);
        let mut decoder = OpusPageDecoder::new();
        let mut out = vec![0u8; 960 * BYTES_PER_FRAME];
        assert!(matches!(
            decoder.decode_into(&page, None, &mut out),
            Err(CodecError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_state_advances_on_success_and_failure() {
        let mut stream = StreamDecoder::new(StubDecoder::new(8));
        let good = Bytes::from_static(b"good");
        let bad = Bytes::from_static(b"fail");

        assert_eq!(stream.decode_next(&good).unwrap().len(), 8);
        assert_eq!(stream.state().previous(), Some(&good));

        assert!(stream.decode_next(&bad).is_err());
        assert_eq!(stream.state().previous(), Some(&bad));
    }

    #[test]
    fn test_previous_packet_is_handed_to_decoder() {
        let mut stream = StreamDecoder::new(StubDecoder::new(4));
        stream.decode_next(&Bytes::from_static(b"one")).unwrap();
        stream.decode_next(&Bytes::from_static(b"two")).unwrap();

        let seen = stream.adapter.decoder.seen_previous.clone();
        assert_eq!(seen, vec![None, Some(b"one".to_vec())]);
    }

    #[test]
    fn test_reset_forgets_previous() {
        let mut stream = StreamDecoder::new(StubDecoder::new(4));
        stream.decode_next(&Bytes::from_static(b"one")).unwrap();
        stream.reset();
        assert!(stream.state().previous().is_none());
    }
}
