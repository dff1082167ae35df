//! Shared bus
//!
//! The process-wide nodes every track feeds: a convolution reverb send with a
//! stereo micro-delay and band-limiting filters, and a master tap feeding the
//! analyser. Built once per engine and never rewired; only parameters change.
//!
//! ```text
//! send ─► convolver ─┬► delay L ─┐
//!                    └► delay R ─┴► merge ─► highpass ─► lowpass ─► wet ─┬► destination
//!                                                                        └► master ─► analyser
//! ```
//!
//! Track gains connect to the destination and to [`Bus::master_input`]
//! directly, and to the convolver through their send gain.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::buffer::AudioBuffer;
use crate::cache::{AssetSource, BufferCache};
use crate::engine::{Engine, Handle};
use crate::error::{GraphError, LoadResult};
use crate::node::NodeId;
use crate::nodes::effect::clamp_frequency;
use crate::nodes::{
    Analyser, AnalyserReader, Biquad, Convolver, ConvolverMessage, Delay, DelayChannel, Gain, Mixer,
    PreparedImpulse,
};
use crate::param::Param;

/// Wet level range
pub const MAX_WET_LEVEL: f32 = 2.0;

/// Longest micro-delay, in seconds
pub const MAX_DELAY_SECS: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StereoChannel {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterBand {
    Highpass,
    Lowpass,
}

/// Initial bus parameters
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub wet_level: f32,
    pub delay_left: f32,
    pub delay_right: f32,
    pub highpass: f32,
    pub lowpass: f32,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            wet_level: 0.5,
            delay_left: 0.012,
            delay_right: 0.017,
            highpass: 200.0,
            lowpass: 8_000.0,
        }
    }
}

fn clamp_wet(level: f32) -> f32 {
    if level.is_nan() {
        return 0.0;
    }
    level.clamp(0.0, MAX_WET_LEVEL)
}

fn clamp_delay(secs: f32) -> f32 {
    if secs.is_nan() {
        return 0.0;
    }
    secs.clamp(0.0, MAX_DELAY_SECS)
}

/// The shared node set. Setters clamp and store into the nodes' [`Param`]
/// cells, which the next block picks up. Getters read the same cells, so they
/// always report what the audio thread will use.
pub struct Bus {
    sample_rate: u32,

    convolver: Handle<ConvolverMessage>,
    delays: [Handle<()>; 2],
    merger: Handle<()>,
    filters: [Handle<()>; 2],
    wet: Handle<()>,
    master: Handle<()>,
    analyser: Handle<()>,

    wet_level: Param,
    delay_times: [Param; 2],
    filter_frequencies: [Param; 2],
    reverb_enabled: bool,
}

impl Bus {
    /// Build and wire the bus. The reverb stays silent until an impulse is
    /// loaded.
    pub fn new(
        engine: &mut Engine,
        settings: &BusSettings,
        analyser_window: usize,
    ) -> Result<(Self, AnalyserReader), GraphError> {
        let sample_rate = engine.sample_rate();
        let wet_level = clamp_wet(settings.wet_level);
        let delay_times = [clamp_delay(settings.delay_left), clamp_delay(settings.delay_right)];
        let filter_frequencies = [
            clamp_frequency(settings.highpass, sample_rate),
            clamp_frequency(settings.lowpass, sample_rate),
        ];

        let left = Delay::new(DelayChannel::Left, sample_rate, MAX_DELAY_SECS).with_time(delay_times[0]);
        let right = Delay::new(DelayChannel::Right, sample_rate, MAX_DELAY_SECS).with_time(delay_times[1]);
        let highpass = Biquad::highpass(filter_frequencies[0], sample_rate);
        let lowpass = Biquad::lowpass(filter_frequencies[1], sample_rate);
        let wet = Gain::new(wet_level).with_smoothing_ms(10.0, sample_rate);
        // Keep the control side of every tunable before the nodes move into the graph
        let wet_param = wet.gain_param();
        let delay_params = [left.time_param(), right.time_param()];
        let cutoff_params = [highpass.frequency_param(), lowpass.frequency_param()];

        let convolver = engine.add(Convolver::new());
        let left = engine.add(left);
        let right = engine.add(right);
        let merger = engine.add(Mixer::stereo());
        let highpass = engine.add(highpass);
        let lowpass = engine.add(lowpass);
        let wet = engine.add(wet);
        let master = engine.add(Gain::new(1.0));

        let (analyser_node, reader) = Analyser::new(analyser_window);
        let analyser = engine.add_tap(analyser_node);

        engine.connect(&convolver, &left)?;
        engine.connect(&convolver, &right)?;
        engine.connect(&left, &merger)?;
        engine.connect(&right, &merger)?;
        engine.connect(&merger, &highpass)?;
        engine.connect(&highpass, &lowpass)?;
        engine.connect(&lowpass, &wet)?;
        engine.output(&wet)?;
        engine.connect(&wet, &master)?;
        engine.connect(&master, &analyser)?;

        info!(sample_rate, wet_level, ?delay_times, ?filter_frequencies, "bus wired");

        Ok((
            Self {
                sample_rate,
                convolver,
                delays: [left, right],
                merger,
                filters: [highpass, lowpass],
                wet,
                master,
                analyser,
                wet_level: wet_param,
                delay_times: delay_params,
                filter_frequencies: cutoff_params,
                reverb_enabled: false,
            },
            reader,
        ))
    }

    /// Where track sends connect
    pub fn send_input(&self) -> NodeId {
        self.convolver.id()
    }

    /// Where the metering tap collects from
    pub fn master_input(&self) -> NodeId {
        self.master.id()
    }

    pub fn analyser(&self) -> NodeId {
        self.analyser.id()
    }

    /// Ids of every node the bus owns
    pub fn node_ids(&self) -> [NodeId; 9] {
        [
            self.convolver.id(),
            self.delays[0].id(),
            self.delays[1].id(),
            self.merger.id(),
            self.filters[0].id(),
            self.filters[1].id(),
            self.wet.id(),
            self.master.id(),
            self.analyser.id(),
        ]
    }

    #[inline]
    pub fn reverb_enabled(&self) -> bool {
        self.reverb_enabled
    }

    /// Install an impulse response. Returns whether it reached the convolver.
    pub fn load_impulse(&mut self, impulse: &AudioBuffer) -> bool {
        let prepared = PreparedImpulse::prepare(impulse, self.sample_rate);
        debug!(frames = prepared.frames(), "installing impulse");
        self.reverb_enabled = self
            .convolver
            .deliver(ConvolverMessage::SetImpulse(Box::new(prepared)), "impulse");
        self.reverb_enabled
    }

    /// Load and install an impulse response through the cache.
    ///
    /// On failure the reverb is disabled and dry playback is unaffected.
    pub async fn load_impulse_from<S: AssetSource>(&mut self, cache: &BufferCache<S>, url: &str) -> LoadResult<()> {
        match cache.load_buffer(url).await {
            Ok(buffer) => {
                self.load_impulse(&buffer);
                Ok(())
            }
            Err(e) => {
                warn!(url, error = %e, "impulse unavailable, reverb disabled");
                self.disable_reverb();
                Err(e)
            }
        }
    }

    pub fn disable_reverb(&mut self) {
        if self.reverb_enabled {
            self.convolver.deliver(ConvolverMessage::Clear, "impulse");
        }
        self.reverb_enabled = false;
    }

    #[inline]
    pub fn wet_level(&self) -> f32 {
        self.wet_level.get()
    }

    /// Set the reverb return level, clamped to `[0, 2]`. Returns the value applied.
    pub fn set_wet_level(&mut self, level: f32) -> f32 {
        let level = clamp_wet(level);
        self.wet_level.set(level);
        level
    }

    #[inline]
    pub fn delay_time(&self, channel: StereoChannel) -> f32 {
        self.delay_times[channel as usize].get()
    }

    /// Set one side's micro-delay in seconds, clamped to `[0, 1]`.
    pub fn set_delay_time(&mut self, channel: StereoChannel, secs: f32) -> f32 {
        let secs = clamp_delay(secs);
        self.delay_times[channel as usize].set(secs);
        secs
    }

    #[inline]
    pub fn filter_frequency(&self, band: FilterBand) -> f32 {
        self.filter_frequencies[band as usize].get()
    }

    /// Set a filter cutoff in Hz, clamped to `[10, 0.45 * sample_rate]`.
    pub fn set_filter_frequency(&mut self, band: FilterBand, hz: f32) -> f32 {
        let hz = clamp_frequency(hz, self.sample_rate);
        self.filter_frequencies[band as usize].set(hz);
        hz
    }

    /// Remove every bus node from the engine.
    pub fn teardown(self, engine: &mut Engine) {
        for id in self.node_ids() {
            if let Err(e) = engine.remove(id) {
                warn!(error = %e, "bus node already gone");
            }
        }
    }
}
