//! Transport contract shared by the WebSocket connector and test fakes
//!
//! Every opened stream gets a fresh [`ConnectionId`]. Events carry the id of
//! the connection that produced them, so anything still in flight from a
//! connection that has since been replaced can be recognised and dropped.

use reqwest::Url;

use crate::error::{NetworkError, ProtocolError};
use crate::protocol::{parse_audio_message, parse_metadata_message, InboundMessage};

/// Identity of one opened stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The two per-station streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Packet batches
    Audio,
    /// Now-playing updates
    Metadata,
}

impl StreamKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            StreamKind::Audio => "audio_broadcast",
            StreamKind::Metadata => "metadata_only",
        }
    }

    /// Parse a text frame received on this stream
    pub fn parse(&self, text: &str) -> Result<InboundMessage, ProtocolError> {
        match self {
            StreamKind::Audio => parse_audio_message(text),
            StreamKind::Metadata => parse_metadata_message(text),
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Metadata => write!(f, "metadata"),
        }
    }
}

/// `{ws_base}/ws/radio/{station}/{audio_broadcast|metadata_only}`
pub fn stream_url(ws_base: &str, station: &str, kind: StreamKind) -> Result<Url, NetworkError> {
    let mut url = Url::parse(ws_base).map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", ws_base, e)))?;
    url.path_segments_mut()
        .map_err(|_| NetworkError::InvalidUrl(ws_base.to_string()))?
        .pop_if_empty()
        .extend(["ws", "radio", station, kind.path_segment()]);
    Ok(url)
}

/// Something that happened on an opened stream
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A text frame
    Message {
        id: ConnectionId,
        kind: StreamKind,
        text: String,
    },
    /// The stream ended; `reason` is set when it ended on an error
    Closed {
        id: ConnectionId,
        kind: StreamKind,
        reason: Option<String>,
    },
}

impl TransportEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            TransportEvent::Message { id, .. } | TransportEvent::Closed { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            TransportEvent::Message { kind, .. } | TransportEvent::Closed { kind, .. } => *kind,
        }
    }
}

/// Opens and closes station streams
///
/// Opening never fails synchronously: connection errors surface later as a
/// [`TransportEvent::Closed`] for the returned id.
pub trait TransportConnector {
    fn open(&mut self, kind: StreamKind, station: &str) -> ConnectionId;

    /// Close a stream; closing an unknown or already closed id is a no-op
    fn close(&mut self, id: ConnectionId);

    /// Whether `id` is still connected (or connecting)
    fn is_open(&self, id: ConnectionId) -> bool;
}
