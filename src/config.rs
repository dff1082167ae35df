//! Mixer configuration
//!
//! ```toml
//! sample_rate = 48000
//! asset_root = "assets"
//! impulse_response = "impulses/hall.wav"
//! queue_size = 64
//!
//! [bus]
//! wet_level = 0.6
//! delay_left = 0.010
//! delay_right = 0.015
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::bus::BusSettings;
use crate::cache::FsAssetSource;
use crate::engine::Engine;
use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Engine rate in Hz. Device engines use the device's rate instead.
    pub sample_rate: u32,
    /// Root directory relative asset URLs resolve against
    pub asset_root: PathBuf,
    /// Reverb impulse response URL; no reverb when absent
    pub impulse_response: Option<String>,
    /// Per-node message queue capacity
    pub queue_size: usize,
    /// Samples the analyser looks at
    pub analyser_window: usize,
    /// Volume of newly imported tracks
    pub track_volume: f32,
    /// Send level of newly imported tracks
    pub track_send: f32,
    pub bus: BusSettings,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            asset_root: PathBuf::from("."),
            impulse_response: None,
            queue_size: 64,
            analyser_window: 2048,
            track_volume: 1.0,
            track_send: 0.3,
            bus: BusSettings::default(),
        }
    }
}

impl MixerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Reject values no engine can run with. Bus parameters are clamped on use
    /// and never rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} outside 8000..=192000",
                self.sample_rate
            )));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid("queue_size must be positive".into()));
        }
        if self.analyser_window < 64 {
            return Err(ConfigError::Invalid(format!(
                "analyser_window {} below 64",
                self.analyser_window
            )));
        }
        for (name, v) in [("track_volume", self.track_volume), ("track_send", self.track_send)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!("{name} {v} outside 0..=1")));
            }
        }
        Ok(())
    }

    /// An engine at the configured rate, without a device sink
    pub fn engine(&self) -> Engine {
        self.configure(Engine::new(self.sample_rate))
    }

    /// Apply the engine-level settings to an engine built elsewhere, such as
    /// one opened on a device at the device's rate.
    pub fn configure(&self, engine: Engine) -> Engine {
        engine.with_queue_size(self.queue_size)
    }

    pub fn asset_source(&self) -> FsAssetSource {
        FsAssetSource::new(self.asset_root.clone())
    }
}
