//! Radio Client Application
//!
//! Tunes to a station and plays it on the default (or chosen) output
//! device. Commands are read from stdin, one per line.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radio_client::{
    audio::device::{list_devices, CpalOutputFactory},
    client::{Command, RadioClient},
    codec::OpusPageDecoder,
    config::AppConfig,
    controller::{SessionObserver, SessionState, StatusReport},
    network::StationData,
    protocol::station_slug,
};

#[derive(Parser, Debug)]
#[command(name = "radio")]
#[command(about = "Live radio client")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "RADIO_CONFIG")]
    config: Option<PathBuf>,

    /// Server base URL, e.g. https://radio.example.com
    #[arg(short, long, env = "RADIO_SERVER")]
    server: Option<String>,

    /// Station to tune to on start
    #[arg(long)]
    station: Option<String>,

    /// Output device id (see --list-devices)
    #[arg(short, long)]
    device: Option<String>,

    /// Start playing as soon as the station is tuned
    #[arg(long)]
    autoplay: bool,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

const HELP: &str = "\
Commands:
  play | pause | p (toggle)
  station <name>      tune to a station
  stations            list stations
  skip                skip the current track
  vote <track>        request a track
  vol <0-200|+n|-n>   set or change volume
  status | s          show what's playing
  quit";

/// Prints everything to the terminal
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn state_changed(&mut self, state: SessionState) {
        println!("[{}]", state);
    }

    fn title_changed(&mut self, title: &str) {
        println!("Now playing: {}", title);
    }

    fn listeners_changed(&mut self, count: u32) {
        println!("Listeners: {}", count);
    }

    fn alert(&mut self, message: &str) {
        eprintln!("!! {}", message);
    }

    fn notice(&mut self, message: &str) {
        println!("{}", message);
    }

    fn station_data_changed(&mut self, station: &str, data: &StationData) {
        println!("{}: {} tracks, {} queued", station, data.tracks.len(), data.queued.len());
    }

    fn queue_changed(&mut self, queue: &[String]) {
        if queue.is_empty() {
            println!("Queue is empty");
        } else {
            println!("Queue:");
            for (position, track) in queue.iter().enumerate() {
                println!("  {}. {}", position + 1, track);
            }
        }
    }

    fn stations_listed(&mut self, stations: &[String]) {
        println!("Stations: {}", stations.join(", "));
    }

    fn status(&mut self, report: &StatusReport) {
        println!(
            "{} | {} | {} [{}] | vol {:.0}",
            report.state,
            report.station.as_deref().unwrap_or("-"),
            report.now_playing.title,
            report.now_playing.progress_text(),
            report.volume
        );
        if let Some(listeners) = report.listeners {
            println!("  {} listening", listeners);
        }
        if let Some(ahead) = report.buffered_ahead {
            println!("  {:.2}s buffered", ahead);
        }
        let packets = &report.packets;
        println!(
            "  packets: {} played, {} dropped, {} failed",
            packets.packets_accepted - packets.packets_failed,
            packets.packets_dropped,
            packets.packets_failed
        );
    }
}

/// Read stdin on a plain thread; stdin reads block
fn spawn_stdin_reader(tx: mpsc::UnboundedSender<Command>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match Command::parse(&line) {
                Some(command) => {
                    let quit = command == Command::Quit;
                    if tx.send(command).is_err() || quit {
                        break;
                    }
                }
                None => println!("{}", HELP),
            }
        }
        // EOF behaves like quit
        let _ = tx.send(Command::Quit);
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if args.list_devices {
        println!("\n=== Available Output Devices ===");
        for device in list_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    ID: {}", device.id);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
        return Ok(());
    }

    let mut config = AppConfig::load_or_default(args.config.as_deref()).context("Failed to load config")?;
    if let Some(server) = args.server {
        config.server.base_url = server;
    }
    if let Some(station) = args.station {
        config.server.station = Some(station_slug(&station));
    }
    if let Some(device) = args.device {
        config.output.device_id = Some(device);
    }

    tracing::info!("Starting radio client for {}", config.server.http_base());

    let outputs = CpalOutputFactory::new(config.output.clone());
    let mut client = RadioClient::new(&config, OpusPageDecoder::new(), Box::new(outputs), Box::new(ConsoleObserver))
        .context("Failed to start client")?;
    if args.autoplay {
        client.autoplay();
    }

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(command_tx);
    println!("{}", HELP);

    client.run(command_rx).await?;
    Ok(())
}
