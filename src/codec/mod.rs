//! Ogg/Opus page decoding
//!
//! Turns one server page (plus the page before it) into interleaved
//! 16-bit stereo PCM.

pub mod decoder;
pub mod ogg;

pub use decoder::{DecoderAdapter, DecoderState, OpusPageDecoder, PageDecoder, StreamDecoder};
pub use ogg::OggPage;
