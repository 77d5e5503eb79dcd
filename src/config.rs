//! Application configuration
//!
//! Loaded from a TOML file, either at an explicit path or in the platform
//! config directory. Every field has a default so a partial (or missing)
//! file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::Error;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub playback: PlaybackConfig,
    pub output: OutputConfig,
}

/// Radio server endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the HTTP directory, e.g. `https://radio.example.com`
    pub base_url: String,
    /// Base URL for the WebSocket streams; derived from `base_url` when unset
    pub websocket_url: Option<String>,
    /// Station to tune to on start; the first listed station when unset
    pub station: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost".to_string(),
            websocket_url: None,
            station: None,
        }
    }
}

impl ServerConfig {
    /// WebSocket base URL (`wss://host` for `https://host`)
    pub fn websocket_base(&self) -> String {
        if let Some(url) = &self.websocket_url {
            return url.trim_end_matches('/').to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("wss://{}", base)
        }
    }

    /// HTTP base URL without a trailing slash
    pub fn http_base(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }
}

/// Playout tuning
///
/// The guard pair is an empirically tuned heuristic, not a protocol contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub lower_guard_ms: f64,
    pub wrap_guard_ms: f64,
    pub resync_epsilon_ms: f64,
    pub fade_ms: f64,
    pub teardown_grace_ms: f64,
    pub switch_settle_ms: f64,
    /// Starting volume on the 0-200 scale
    pub volume: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            lower_guard_ms: DEFAULT_LOWER_GUARD_MS,
            wrap_guard_ms: DEFAULT_WRAP_GUARD_MS,
            resync_epsilon_ms: DEFAULT_RESYNC_EPSILON_MS,
            fade_ms: DEFAULT_FADE_MS,
            teardown_grace_ms: DEFAULT_TEARDOWN_GRACE_MS,
            switch_settle_ms: DEFAULT_SWITCH_SETTLE_MS,
            volume: DEFAULT_VOLUME,
        }
    }
}

/// Output device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device id as reported by `list_devices` (`output:<name>`); default device when unset
    pub device_id: Option<String>,
    /// Fixed cpal buffer size in frames
    pub buffer_size: Option<u32>,
    pub analyser_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            buffer_size: None,
            analyser_capacity: ANALYSER_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path`, or from the default location, or fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/live-radio-client/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "live-radio-client")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn validate(&self) -> Result<(), Error> {
        let p = &self.playback;
        if p.lower_guard_ms < 0.0 || p.wrap_guard_ms <= p.lower_guard_ms {
            return Err(Error::Config(format!(
                "wrap_guard_ms ({}) must exceed lower_guard_ms ({}) and both be non-negative",
                p.wrap_guard_ms, p.lower_guard_ms
            )));
        }
        if !(0.0..=MAX_VOLUME).contains(&p.volume) {
            return Err(Error::Config(format!("volume {} outside 0-{}", p.volume, MAX_VOLUME)));
        }
        if self.output.analyser_capacity == 0 {
            return Err(Error::Config("analyser_capacity must be non-zero".to_string()));
        }
        Ok(())
    }
}
