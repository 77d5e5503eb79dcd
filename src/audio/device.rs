//! Output device enumeration and the cpal-backed output graph

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::analyser::{create_shared_analyser, SharedAnalyser};
use crate::audio::mixer::VoiceMixer;
use crate::audio::output::{AudioOutput, OutputFactory, SourceId};
use crate::audio::pcm::StereoBuffer;
use crate::config::OutputConfig;
use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::AudioError;

/// How long `open` waits for the output thread to report the stream state
const STREAM_START_TIMEOUT: Duration = Duration::from_secs(3);

/// Output device description
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all output devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_output_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device);
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    is_default: default_output_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Supported sample rates (from the common set) and channel counts
fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [44100u32, 48000, 88200, 96000, 176400, 192000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate() && rate <= config.max_sample_rate() && !sample_rates.contains(&rate_val) {
                    sample_rates.push(rate_val);
                }
            }

            let ch = config.channels();
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    }

    sample_rates.sort();
    channels.sort();

    (sample_rates, channels)
}

/// Get an output device by its ID (`output:<name>` or a bare name)
pub fn get_device_by_id(id: &str) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let name = id.strip_prefix("output:").unwrap_or(id);

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

/// Output graph on a cpal stream
///
/// The stream lives on its own thread (cpal streams are not `Send` on every
/// host); the mixer is shared with the data callback.
pub struct CpalOutput {
    device_name: String,
    mixer: Arc<Mutex<VoiceMixer>>,
    analyser: SharedAnalyser,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl CpalOutput {
    /// Open `device_id` (or the default device) at 48 kHz stereo and start it
    pub fn open(config: &OutputConfig) -> Result<Self, AudioError> {
        let device = match config.device_id.as_deref() {
            Some(id) => get_device_by_id(id)?,
            None => get_default_output_device()?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let stream_config = StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: match config.buffer_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        let mixer = Arc::new(Mutex::new(VoiceMixer::new(SAMPLE_RATE)));
        let analyser = create_shared_analyser(config.analyser_capacity);
        let running = Arc::new(AtomicBool::new(true));
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_callback = running.clone();
        let running_for_loop = running.clone();
        let mixer_for_callback = mixer.clone();
        let analyser_for_callback = analyser.clone();
        let channels = stream_config.channels as usize;

        let handle = thread::Builder::new()
            .name("radio-output".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if !running_for_callback.load(Ordering::Relaxed) {
                            data.fill(0.0);
                            return;
                        }
                        mixer_for_callback
                            .lock()
                            .render(data, channels, Some(&analyser_for_callback));
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, releasing the device
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let started = ready_rx
            .recv_timeout(STREAM_START_TIMEOUT)
            .map_err(|_| AudioError::StreamError("output thread did not start".to_string()))
            .and_then(|result| result);
        if let Err(e) = started {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        tracing::info!("Opened output device {}", device_name);

        Ok(Self {
            device_name,
            mixer,
            analyser,
            running,
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Check for stream errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn start_source(&mut self, buffer: StereoBuffer, when: f64) -> SourceId {
        self.mixer.lock().add_voice(buffer, when)
    }

    fn stop_source(&mut self, id: SourceId, when: f64) {
        self.mixer.lock().stop_voice(id, when);
    }

    fn disconnect_source(&mut self, id: SourceId) {
        self.mixer.lock().remove_voice(id);
    }

    fn ramp_gain(&mut self, target: f32, duration: f64) {
        self.mixer.lock().ramp_gain(target, duration);
    }

    fn gain(&self) -> f32 {
        self.mixer.lock().gain()
    }

    fn analyser(&self) -> SharedAnalyser {
        self.analyser.clone()
    }

    fn close(&mut self) {
        if let Some(err) = self.check_errors() {
            tracing::warn!("Output stream reported: {}", err);
        }
        self.running.store(false, Ordering::SeqCst);
        self.mixer.lock().clear();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Closed output device {}", self.device_name);
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`CpalOutput`]s with a fixed configuration
pub struct CpalOutputFactory {
    config: OutputConfig,
}

impl CpalOutputFactory {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }
}

impl OutputFactory for CpalOutputFactory {
    fn open(&mut self) -> Result<Box<dyn AudioOutput>, AudioError> {
        Ok(Box::new(CpalOutput::open(&self.config)?))
    }
}
