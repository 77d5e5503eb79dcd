//! WebSocket streams
//!
//! Each opened stream runs as its own tokio task forwarding text frames
//! into a shared event channel, tagged with the stream's connection id.

use futures_util::StreamExt;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::network::transport::{stream_url, ConnectionId, StreamKind, TransportConnector, TransportEvent};

struct Connection {
    open: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// [`TransportConnector`] over tokio-tungstenite
///
/// Must be used from within a tokio runtime.
pub struct WsConnector {
    ws_base: String,
    events: UnboundedSender<TransportEvent>,
    next_id: u64,
    connections: HashMap<ConnectionId, Connection>,
}

impl WsConnector {
    pub fn new(ws_base: impl Into<String>, events: UnboundedSender<TransportEvent>) -> Self {
        Self {
            ws_base: ws_base.into(),
            events,
            next_id: 1,
            connections: HashMap::new(),
        }
    }
}

impl TransportConnector for WsConnector {
    fn open(&mut self, kind: StreamKind, station: &str) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        // Forget streams that ended on their own
        self.connections.retain(|_, c| c.open.load(Ordering::Relaxed));

        let open = Arc::new(AtomicBool::new(true));
        let events = self.events.clone();

        let task = match stream_url(&self.ws_base, station, kind) {
            Ok(url) => {
                tracing::info!("Opening {} stream {} to {}", kind, id, url);
                tokio::spawn(run_stream(id, kind, url, open.clone(), events))
            }
            Err(e) => {
                let open = open.clone();
                tokio::spawn(async move {
                    open.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Closed {
                        id,
                        kind,
                        reason: Some(e.to_string()),
                    });
                })
            }
        };

        self.connections.insert(id, Connection { open, task });
        id
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.remove(&id) {
            connection.open.store(false, Ordering::SeqCst);
            connection.task.abort();
            tracing::debug!("Closed stream {}", id);
        }
    }

    fn is_open(&self, id: ConnectionId) -> bool {
        self.connections
            .get(&id)
            .map(|c| c.open.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

impl Drop for WsConnector {
    fn drop(&mut self) {
        for (_, connection) in self.connections.drain() {
            connection.task.abort();
        }
    }
}

async fn run_stream(
    id: ConnectionId,
    kind: StreamKind,
    url: Url,
    open: Arc<AtomicBool>,
    events: UnboundedSender<TransportEvent>,
) {
    let reason = match connect_async(url.as_str()).await {
        Ok((mut socket, _response)) => {
            tracing::debug!("{} stream {} connected", kind, id);
            let mut reason = None;
            while let Some(frame) = socket.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!("Dropping non-UTF-8 binary frame on {} stream {}", kind, id);
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        reason = Some(e.to_string());
                        break;
                    }
                };
                if events.send(TransportEvent::Message { id, kind, text }).is_err() {
                    // Driver is gone
                    break;
                }
            }
            reason
        }
        Err(e) => Some(format!("connect failed: {}", e)),
    };

    match &reason {
        Some(reason) => tracing::warn!("{} stream {} ended: {}", kind, id, reason),
        None => tracing::info!("{} stream {} closed by server", kind, id),
    }
    open.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed { id, kind, reason });
}
