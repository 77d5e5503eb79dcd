//! Client driver
//!
//! Runs the controller on the current task. Stream frames, HTTP results
//! and user commands arrive on channels; the loop handles one at a time
//! and sleeps until the controller's next deadline in between.

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant as TokioInstant;

use crate::audio::output::OutputFactory;
use crate::codec::decoder::PageDecoder;
use crate::config::AppConfig;
use crate::controller::{Effect, SessionController, SessionObserver};
use crate::error::{NetworkError, Result};
use crate::network::http::{format_uptime, BroadcastInfo, StationData, StationDirectory};
use crate::network::transport::TransportEvent;
use crate::network::ws::WsConnector;
use crate::now_playing::SystemClock;
use crate::playback::session::PlaybackSession;
use crate::protocol::station_slug;

/// User commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Toggle,
    /// Tune to a station (URL key)
    Station(String),
    Skip,
    /// Request a track for the current station
    Vote(String),
    /// Absolute volume, 0-200
    Volume(f64),
    /// Relative volume change
    VolumeBy(f64),
    ListStations,
    Status,
    Quit,
}

impl Command {
    /// Parse one line of user input
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match (word.to_lowercase().as_str(), rest) {
            ("play", "") => Command::Play,
            ("pause", "") => Command::Pause,
            ("toggle" | "p", "") => Command::Toggle,
            ("station" | "tune", name) if !name.is_empty() => Command::Station(name.to_string()),
            ("skip", "") => Command::Skip,
            ("vote" | "request", track) if !track.is_empty() => Command::Vote(track.to_string()),
            ("volume" | "vol", value) => {
                if let Some(delta) = value.strip_prefix('+') {
                    Command::VolumeBy(delta.parse().ok()?)
                } else if value.starts_with('-') {
                    Command::VolumeBy(value.parse().ok()?)
                } else {
                    Command::Volume(value.parse().ok()?)
                }
            }
            ("stations", "") => Command::ListStations,
            ("status" | "s", "") => Command::Status,
            ("quit" | "exit" | "q", "") => Command::Quit,
            _ => return None,
        };
        Some(command)
    }
}

/// Result of a spawned HTTP request
#[derive(Debug)]
enum FetchResult {
    StationData {
        station: String,
        result: std::result::Result<StationData, NetworkError>,
    },
    Queue {
        station: String,
        result: std::result::Result<Vec<String>, NetworkError>,
    },
    Vote {
        station: String,
        track: String,
        result: std::result::Result<Vec<String>, NetworkError>,
    },
    Skip {
        station: String,
        result: std::result::Result<(), NetworkError>,
    },
    Stations(std::result::Result<Vec<String>, NetworkError>),
    Broadcast(std::result::Result<BroadcastInfo, NetworkError>),
}

pub struct RadioClient<D> {
    controller: SessionController<D, WsConnector, SystemClock>,
    directory: StationDirectory,
    transport_rx: UnboundedReceiver<TransportEvent>,
    fetch_tx: UnboundedSender<FetchResult>,
    fetch_rx: UnboundedReceiver<FetchResult>,
    /// Tune to the first listed station once the list arrives
    auto_tune: bool,
    /// Start playing as soon as a station is selected
    play_on_tune: bool,
}

impl<D: PageDecoder> RadioClient<D> {
    /// Opening streams spawns tasks, so playing needs a tokio runtime
    pub fn new(
        config: &AppConfig,
        decoder: D,
        outputs: Box<dyn OutputFactory>,
        observer: Box<dyn SessionObserver>,
    ) -> Result<Self> {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();

        let directory = StationDirectory::new(&config.server.http_base())?;
        let connector = WsConnector::new(config.server.websocket_base(), transport_tx);
        let playback = PlaybackSession::new(decoder, outputs, config.playback.clone());
        let controller = SessionController::new(
            playback,
            connector,
            SystemClock::new(),
            observer,
            config.playback.clone(),
        );

        let mut client = Self {
            controller,
            directory,
            transport_rx,
            fetch_tx,
            fetch_rx,
            auto_tune: false,
            play_on_tune: false,
        };
        match &config.server.station {
            Some(station) => client.controller.switch_station(&station_slug(station)),
            None => client.auto_tune = true,
        }
        Ok(client)
    }

    /// Play once a station is selected; immediately if one already is
    pub fn autoplay(&mut self) {
        if self.controller.station().is_some() {
            self.controller.play();
        } else {
            self.play_on_tune = true;
        }
    }

    /// Switch to `name` (display name or URL key)
    fn tune(&mut self, name: &str) {
        self.auto_tune = false;
        self.controller.switch_station(&station_slug(name));
        if std::mem::take(&mut self.play_on_tune) {
            self.controller.play();
        }
    }

    /// Run until `commands` closes or a [`Command::Quit`] arrives
    pub async fn run(mut self, mut commands: UnboundedReceiver<Command>) -> Result<()> {
        self.spawn_fetch(|directory| async move { FetchResult::Broadcast(directory.broadcast_info().await) });
        self.spawn_fetch(|directory| async move { FetchResult::Stations(directory.station_list().await) });

        loop {
            self.dispatch_effects();

            let deadline = self
                .controller
                .next_deadline()
                .map(|ms| TokioInstant::from_std(self.controller.clock().instant_at(ms)));
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Quit) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.transport_rx.recv() => self.controller.on_transport_event(event),
                Some(result) = self.fetch_rx.recv() => self.handle_fetch(result),
                _ = timer => self.controller.run_due(),
            }
        }

        tracing::info!("Shutting down");
        self.controller.shutdown();
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        tracing::debug!("Command: {:?}", command);
        match command {
            Command::Play => self.controller.play(),
            Command::Pause => self.controller.pause(),
            Command::Toggle => self.controller.toggle(),
            Command::Station(name) => self.tune(&name),
            Command::Skip => {
                let Some(station) = self.current_station() else {
                    self.controller.report_error("No station selected");
                    return;
                };
                self.spawn_fetch(|directory| async move {
                    let result = directory.skip(&station).await;
                    FetchResult::Skip { station, result }
                });
            }
            Command::Vote(track) => {
                let Some(station) = self.current_station() else {
                    self.controller.report_error("No station selected");
                    return;
                };
                self.spawn_fetch(|directory| async move {
                    let result = directory.request_track(&station, &track).await;
                    FetchResult::Vote { station, track, result }
                });
            }
            Command::Volume(volume) => self.controller.set_volume(volume),
            Command::VolumeBy(delta) => self.controller.change_volume(delta),
            Command::ListStations => {
                self.spawn_fetch(|directory| async move { FetchResult::Stations(directory.station_list().await) });
            }
            Command::Status => self.controller.report_status(),
            Command::Quit => {}
        }
    }

    fn handle_fetch(&mut self, result: FetchResult) {
        match result {
            FetchResult::StationData { station, result } => match result {
                Ok(data) => self.controller.on_station_data(&station, data),
                Err(e) => self.controller.report_error(&format!("Could not load {}: {}", station, e)),
            },
            FetchResult::Queue { station, result } => match result {
                Ok(queue) => self.controller.on_queue(&station, queue),
                Err(e) => tracing::warn!("Queue refresh for {} failed: {}", station, e),
            },
            FetchResult::Vote { station, track, result } => match result {
                Ok(queue) => {
                    self.controller.report_notice(&format!("Requested {}", track));
                    self.controller.on_queue(&station, queue);
                }
                Err(e) => self.controller.report_error(&format!("Request for {} failed: {}", track, e)),
            },
            FetchResult::Skip { station, result } => match result {
                Ok(()) => self.controller.skip_confirmed(&station),
                Err(NetworkError::Rejected(reason)) => self.controller.skip_failed(&reason),
                Err(e) => self.controller.report_error(&format!("Skip failed: {}", e)),
            },
            FetchResult::Stations(result) => match result {
                Ok(stations) => {
                    self.controller.on_station_list(&stations);
                    if self.auto_tune {
                        self.auto_tune = false;
                        if let Some(first) = stations.first() {
                            self.tune(first);
                        }
                    }
                }
                Err(e) => self.controller.report_error(&format!("Could not list stations: {}", e)),
            },
            FetchResult::Broadcast(result) => match result {
                Ok(info) => {
                    if let Some(uptime) = info.running_for(Utc::now()) {
                        self.controller
                            .report_notice(&format!("Running for: {}", format_uptime(uptime)));
                    }
                }
                Err(e) => tracing::debug!("Broadcast metadata unavailable: {}", e),
            },
        }
    }

    fn dispatch_effects(&mut self) {
        for effect in self.controller.take_effects() {
            match effect {
                Effect::FetchStationData { station } => self.spawn_fetch(|directory| async move {
                    let result = directory.station_data(&station).await;
                    FetchResult::StationData { station, result }
                }),
                Effect::RefreshQueue { station } => self.spawn_fetch(|directory| async move {
                    let result = directory.queue(&station).await;
                    FetchResult::Queue { station, result }
                }),
            }
        }
    }

    fn spawn_fetch<F, Fut>(&self, request: F)
    where
        F: FnOnce(StationDirectory) -> Fut,
        Fut: std::future::Future<Output = FetchResult> + Send + 'static,
    {
        let tx = self.fetch_tx.clone();
        let request = request(self.directory.clone());
        tokio::spawn(async move {
            let _ = tx.send(request.await);
        });
    }

    fn current_station(&self) -> Option<String> {
        self.controller.station().map(|s| s.name.clone())
    }
}
