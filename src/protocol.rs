//! Wire protocol
//!
//! Both WebSocket streams carry either a bare rejection token or a JSON
//! document. Every inbound text is parsed into an [`InboundMessage`];
//! anything that does not match the schema is a
//! [`ProtocolError::MalformedMessage`].
//!
//! The HTTP directory answers with small ad-hoc text bodies; their parsers
//! live here too.

use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::ProtocolError;

/// Rejection token: the requested station does not exist
pub const INVALID_STATION: &str = "INVALID_STATION";

/// Rejection token: the requested stream endpoint does not exist
pub const INVALID_ENDPOINT: &str = "INVALID_ENDPOINT";

/// Failure marker used by the vote and skip endpoints
pub const FAILURE: &str = "FAILURE";

/// One encoded unit (an Ogg page) with its declared duration
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    pub bytes: Bytes,
    pub duration_ms: f64,
}

/// Packets sharing a track-relative start offset
#[derive(Debug, Clone, PartialEq)]
pub struct PacketBatch {
    pub start_offset_ms: f64,
    pub packets: Vec<AudioPacket>,
}

/// Now-playing information from the metadata stream
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    /// Track length, in the unit the server emits (milliseconds)
    pub total_length: f64,
    pub start_offset_ms: f64,
    pub skipped: bool,
    pub num_listeners: u32,
}

/// A parsed message from either stream
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Batch(PacketBatch),
    Metadata(TrackMetadata),
    InvalidStation,
    InvalidEndpoint,
}

impl InboundMessage {
    /// User-facing text for rejection tokens
    pub fn rejection_text(&self) -> Option<&'static str> {
        match self {
            InboundMessage::InvalidStation => Some("Invalid station selected!"),
            InboundMessage::InvalidEndpoint => Some("Invalid websocket endpoint!"),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct WireBatch {
    start_offset: f64,
    pages: Vec<WirePage>,
}

#[derive(Deserialize)]
struct WirePage {
    buff: Vec<i64>,
    duration: f64,
}

#[derive(Deserialize)]
struct WireMetadata {
    title: String,
    start_offset: f64,
    total_length: f64,
    #[serde(default)]
    skipped_track: bool,
    #[serde(default)]
    num_listeners: u32,
}

fn rejection(text: &str) -> Option<InboundMessage> {
    match text.trim() {
        INVALID_STATION => Some(InboundMessage::InvalidStation),
        INVALID_ENDPOINT => Some(InboundMessage::InvalidEndpoint),
        _ => None,
    }
}

fn check_time(name: &str, value: f64) -> Result<f64, ProtocolError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ProtocolError::MalformedMessage(format!("{} must be a non-negative number, got {}", name, value)))
    }
}

/// Page bytes arrive as a JSON array of either signed or unsigned byte values
fn page_bytes(values: &[i64]) -> Result<Bytes, ProtocolError> {
    let mut bytes = Vec::with_capacity(values.len());
    for &value in values {
        if !(-128..=255).contains(&value) {
            return Err(ProtocolError::MalformedMessage(format!("byte value {} out of range", value)));
        }
        bytes.push(value as u8);
    }
    Ok(Bytes::from(bytes))
}

/// Parse a message from the audio stream
pub fn parse_audio_message(text: &str) -> Result<InboundMessage, ProtocolError> {
    if let Some(message) = rejection(text) {
        return Ok(message);
    }

    let wire: WireBatch = serde_json::from_str(text)?;
    let mut packets = Vec::with_capacity(wire.pages.len());
    for page in &wire.pages {
        packets.push(AudioPacket {
            bytes: page_bytes(&page.buff)?,
            duration_ms: check_time("duration", page.duration)?,
        });
    }

    Ok(InboundMessage::Batch(PacketBatch {
        start_offset_ms: check_time("start_offset", wire.start_offset)?,
        packets,
    }))
}

/// Parse a message from the metadata stream
pub fn parse_metadata_message(text: &str) -> Result<InboundMessage, ProtocolError> {
    if let Some(message) = rejection(text) {
        return Ok(message);
    }

    let wire: WireMetadata = serde_json::from_str(text)?;
    Ok(InboundMessage::Metadata(TrackMetadata {
        title: wire.title,
        total_length: check_time("total_length", wire.total_length)?,
        start_offset_ms: check_time("start_offset", wire.start_offset)?,
        skipped: wire.skipped_track,
        num_listeners: wire.num_listeners,
    }))
}

/// `/station_list` body
#[derive(Debug, Deserialize)]
pub struct StationList {
    pub stations: Vec<String>,
}

/// Station key used in URLs: lowercase with spaces as underscores
pub fn station_slug(display_name: &str) -> String {
    display_name.trim().to_lowercase().replace(' ', "_")
}

/// Split a `a/b/c` list, dropping empty entries
pub fn parse_slash_list(body: &str) -> Vec<String> {
    body.trim()
        .split('/')
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Queue bodies list the most recently requested track first; display order is reversed
pub fn parse_queue(body: &str) -> Vec<String> {
    let mut queue = parse_slash_list(body);
    queue.reverse();
    queue
}

/// Vote response: the updated queue, or `None` when the server refused
pub fn parse_vote_response(body: &str) -> Option<Vec<String>> {
    if body.trim() == FAILURE {
        None
    } else {
        Some(parse_queue(body))
    }
}

/// Skip response: `Err(reason)` for `FAILURE:<reason>`
pub fn parse_skip_response(body: &str) -> Result<(), String> {
    match body.trim().strip_prefix(FAILURE) {
        Some(reason) => Err(reason.trim_start_matches(':').trim().to_string()),
        None => Ok(()),
    }
}

/// `/broadcast_metadata` body: `KEY: value` lines with numeric values
pub fn parse_broadcast_metadata(body: &str) -> HashMap<String, f64> {
    body.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let value = value.trim().parse::<f64>().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}
