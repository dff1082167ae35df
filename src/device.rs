//! Output device discovery.
//!
//! ```no_run
//! use stembus::{CpalDevice, Engine};
//!
//! for device in CpalDevice::list_outputs() {
//!     println!("{} ({} Hz, {} ch)", device.name(), device.sample_rate(), device.channels());
//! }
//!
//! if let Some(device) = CpalDevice::default_output() {
//!     let engine = Engine::new(device.sample_rate()).with_output(device.create_sink());
//!     assert!(engine.has_output());
//! }
//! ```

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::debug;

use crate::nodes::CpalSink;

/// An output device and the stream configuration it prefers.
pub struct CpalDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    name: String,
}

impl CpalDevice {
    fn probe(device: cpal::Device) -> Option<Self> {
        let config = match device.default_output_config() {
            Ok(config) => config,
            Err(e) => {
                debug!(error = %e, "skipping device without an output config");
                return None;
            }
        };
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Some(Self { device, config, name })
    }

    /// The host's default output, or `None` when there is no usable device.
    pub fn default_output() -> Option<Self> {
        Self::probe(cpal::default_host().default_output_device()?)
    }

    /// Every output the default host reports. Empty if enumeration fails.
    pub fn list_outputs() -> Vec<Self> {
        cpal::default_host()
            .output_devices()
            .map(|devices| devices.filter_map(Self::probe).collect())
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    /// Open a stream on this device and return the node that feeds it.
    pub fn create_sink(&self) -> CpalSink {
        CpalSink::new(&self.device, &self.config)
    }
}
