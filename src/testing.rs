//! In-crate fakes shared by the unit tests

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::analyser::{create_shared_analyser, SharedAnalyser};
use crate::audio::output::{AudioOutput, OutputFactory, SourceId};
use crate::audio::pcm::StereoBuffer;
use crate::codec::decoder::PageDecoder;
use crate::controller::{SessionObserver, SessionState, StatusReport};
use crate::error::{AudioError, CodecError};
use crate::network::http::StationData;
use crate::network::transport::{ConnectionId, StreamKind, TransportConnector};
use crate::now_playing::Clock;

/// Clock the test moves by hand
#[derive(Debug, Clone, Default)]
pub(crate) struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub(crate) fn new(now_ms: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(now_ms)),
        }
    }

    pub(crate) fn set(&self, now_ms: f64) {
        *self.now.lock() = now_ms;
    }

    pub(crate) fn advance(&self, ms: f64) {
        *self.now.lock() += ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now.lock()
    }
}

/// A call made on a [`FakeOutput`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OutputCall {
    Start { id: SourceId, when: f64, frames: usize },
    Stop { id: SourceId, when: f64 },
    Disconnect(SourceId),
    Ramp { target: f32, duration: f64 },
    Close,
}

#[derive(Debug)]
struct FakeOutputState {
    time: f64,
    gain: f32,
    next_id: u64,
    closed: bool,
    calls: Vec<OutputCall>,
}

/// Output device recording every call; clones share state
#[derive(Clone)]
pub(crate) struct FakeOutput {
    state: Arc<Mutex<FakeOutputState>>,
    analyser: SharedAnalyser,
}

impl FakeOutput {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeOutputState {
                time: 0.0,
                gain: 1.0,
                next_id: 0,
                closed: false,
                calls: Vec::new(),
            })),
            analyser: create_shared_analyser(16),
        }
    }

    pub(crate) fn set_time(&self, seconds: f64) {
        self.state.lock().time = seconds;
    }

    pub(crate) fn calls(&self) -> Vec<OutputCall> {
        self.state.lock().calls.clone()
    }

    /// `(id, when)` of every started source
    pub(crate) fn starts(&self) -> Vec<(SourceId, f64)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                OutputCall::Start { id, when, .. } => Some((*id, *when)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().time
    }

    fn start_source(&mut self, buffer: StereoBuffer, when: f64) -> SourceId {
        let mut state = self.state.lock();
        let id = SourceId(state.next_id);
        state.next_id += 1;
        state.calls.push(OutputCall::Start {
            id,
            when,
            frames: buffer.frames(),
        });
        id
    }

    fn stop_source(&mut self, id: SourceId, when: f64) {
        self.state.lock().calls.push(OutputCall::Stop { id, when });
    }

    fn disconnect_source(&mut self, id: SourceId) {
        self.state.lock().calls.push(OutputCall::Disconnect(id));
    }

    fn ramp_gain(&mut self, target: f32, duration: f64) {
        let mut state = self.state.lock();
        state.gain = target;
        state.calls.push(OutputCall::Ramp { target, duration });
    }

    fn gain(&self) -> f32 {
        self.state.lock().gain
    }

    fn analyser(&self) -> SharedAnalyser {
        self.analyser.clone()
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.calls.push(OutputCall::Close);
    }
}

/// Hands out [`FakeOutput`]s and keeps a handle to each
#[derive(Clone, Default)]
pub(crate) struct FakeOutputFactory {
    opened: Arc<Mutex<Vec<FakeOutput>>>,
    fail_next: Arc<AtomicBool>,
}

impl FakeOutputFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn opened(&self) -> Vec<FakeOutput> {
        self.opened.lock().clone()
    }

    pub(crate) fn latest(&self) -> Option<FakeOutput> {
        self.opened.lock().last().cloned()
    }

    pub(crate) fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl OutputFactory for FakeOutputFactory {
    fn open(&mut self) -> Result<Box<dyn AudioOutput>, AudioError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AudioError::DeviceNotFound("fake".to_string()));
        }
        let output = FakeOutput::new();
        self.opened.lock().push(output.clone());
        Ok(Box::new(output))
    }
}

/// Decoder producing `bytes_per_packet` bytes of silence per packet
///
/// The packet `b"fail"` fails to decode.
#[derive(Debug, Default)]
pub(crate) struct StubDecoder {
    bytes_per_packet: usize,
    pub(crate) seen_previous: Vec<Option<Vec<u8>>>,
}

impl StubDecoder {
    pub(crate) fn new(bytes_per_packet: usize) -> Self {
        Self {
            bytes_per_packet,
            seen_previous: Vec::new(),
        }
    }
}

impl PageDecoder for StubDecoder {
    fn size_needed(&self, _current: &[u8]) -> Result<usize, CodecError> {
        Ok(self.bytes_per_packet)
    }

    fn decode_into(&mut self, current: &[u8], previous: Option<&[u8]>, out: &mut [u8]) -> Result<usize, CodecError> {
        self.seen_previous.push(previous.map(<[u8]>::to_vec));
        if current == b"fail" {
            return Err(CodecError::DecodingFailed("stub failure".to_string()));
        }
        out.fill(0);
        Ok(out.len())
    }
}

#[derive(Debug, Default)]
struct ConnectorLog {
    next_id: u64,
    opened: Vec<(ConnectionId, StreamKind, String)>,
    open: HashSet<ConnectionId>,
    closed: Vec<ConnectionId>,
}

/// Connector that only records; clones share the log
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingConnector {
    log: Arc<Mutex<ConnectorLog>>,
}

impl RecordingConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn opened(&self) -> Vec<(ConnectionId, StreamKind, String)> {
        self.log.lock().opened.clone()
    }

    pub(crate) fn closed(&self) -> Vec<ConnectionId> {
        self.log.lock().closed.clone()
    }

    /// Currently open ids of `kind`
    pub(crate) fn open_ids(&self, kind: StreamKind) -> Vec<ConnectionId> {
        let log = self.log.lock();
        log.opened
            .iter()
            .filter(|(id, k, _)| *k == kind && log.open.contains(id))
            .map(|(id, _, _)| *id)
            .collect()
    }

    /// Most recently opened id of `kind`
    pub(crate) fn latest(&self, kind: StreamKind) -> Option<ConnectionId> {
        self.log
            .lock()
            .opened
            .iter()
            .rev()
            .find(|(_, k, _)| *k == kind)
            .map(|(id, _, _)| *id)
    }

    /// The remote end went away without a close from our side
    pub(crate) fn drop_remote(&self, id: ConnectionId) {
        self.log.lock().open.remove(&id);
    }
}

impl TransportConnector for RecordingConnector {
    fn open(&mut self, kind: StreamKind, station: &str) -> ConnectionId {
        let mut log = self.log.lock();
        log.next_id += 1;
        let id = ConnectionId(log.next_id);
        log.opened.push((id, kind, station.to_string()));
        log.open.insert(id);
        id
    }

    fn close(&mut self, id: ConnectionId) {
        let mut log = self.log.lock();
        log.open.remove(&id);
        log.closed.push(id);
    }

    fn is_open(&self, id: ConnectionId) -> bool {
        self.log.lock().open.contains(&id)
    }
}

/// Something a [`RecordingObserver`] saw
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Observed {
    State(SessionState),
    Title(String),
    Listeners(u32),
    Alert(String),
    Notice(String),
    StationData(String, StationData),
    Queue(Vec<String>),
    Stations(Vec<String>),
    Status(StatusReport),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingObserver {
    events: Arc<Mutex<Vec<Observed>>>,
}

impl RecordingObserver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }

    pub(crate) fn titles(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Title(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn alerts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Alert(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn states(&self) -> Vec<SessionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::State(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Observed) {
        self.events.lock().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn state_changed(&mut self, state: SessionState) {
        self.push(Observed::State(state));
    }

    fn title_changed(&mut self, title: &str) {
        self.push(Observed::Title(title.to_string()));
    }

    fn listeners_changed(&mut self, count: u32) {
        self.push(Observed::Listeners(count));
    }

    fn alert(&mut self, message: &str) {
        self.push(Observed::Alert(message.to_string()));
    }

    fn notice(&mut self, message: &str) {
        self.push(Observed::Notice(message.to_string()));
    }

    fn station_data_changed(&mut self, station: &str, data: &StationData) {
        self.push(Observed::StationData(station.to_string(), data.clone()));
    }

    fn queue_changed(&mut self, queue: &[String]) {
        self.push(Observed::Queue(queue.to_vec()));
    }

    fn stations_listed(&mut self, stations: &[String]) {
        self.push(Observed::Stations(stations.to_vec()));
    }

    fn status(&mut self, report: &StatusReport) {
        self.push(Observed::Status(report.clone()));
    }
}
