//! Network subsystem: station streams and the HTTP directory

pub mod http;
pub mod transport;
pub mod ws;

pub use http::{BroadcastInfo, StationData, StationDirectory};
pub use transport::{stream_url, ConnectionId, StreamKind, TransportConnector, TransportEvent};
pub use ws::WsConnector;
