//! Tracks and their playback units

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::buffer::AudioBuffer;
use crate::bus::Bus;
use crate::engine::{Engine, Handle};
use crate::error::{GraphError, LoadError, SessionError, SessionResult};
use crate::nodes::{BufferSource, Gain};
use crate::param::Param;
use crate::registry::LiveSource;

/// Session-unique track identifier. Never reused after removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub(crate) u32);

impl TrackId {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed(LoadError),
}

/// A stem in the session: where it comes from and how loud it plays.
#[derive(Clone, Debug)]
pub struct Track {
    id: TrackId,
    url: String,
    name: String,
    buffer: Option<Arc<AudioBuffer>>,
    load_state: LoadState,
    volume: f32,
    send_level: f32,
    pan: Option<f32>,
}

impl Track {
    pub(crate) fn new(id: TrackId, url: String, name: String, volume: f32, send_level: f32) -> Self {
        Self {
            id,
            url,
            name,
            buffer: None,
            load_state: LoadState::Pending,
            volume: clamp_unit(volume),
            send_level: clamp_unit(send_level),
            pan: None,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self) -> Option<&Arc<AudioBuffer>> {
        self.buffer.as_ref()
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.buffer.as_ref().map(|b| b.duration_secs())
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn send_level(&self) -> f32 {
        self.send_level
    }

    pub fn pan(&self) -> Option<f32> {
        self.pan
    }

    pub(crate) fn set_loaded(&mut self, buffer: Arc<AudioBuffer>) {
        self.buffer = Some(buffer);
        self.load_state = LoadState::Loaded;
    }

    pub(crate) fn set_failed(&mut self, error: LoadError) {
        self.buffer = None;
        self.load_state = LoadState::Failed(error);
    }

    pub(crate) fn apply_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    pub(crate) fn apply_send(&mut self, level: f32) {
        self.send_level = level;
    }

    pub(crate) fn apply_pan(&mut self, pan: f32) {
        self.pan = Some(pan);
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn clamp_pan(p: f32) -> f32 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(-1.0, 1.0)
    }
}

/// Fader moves are smoothed over this many milliseconds
const FADER_SMOOTHING_MS: f32 = 5.0;

/// Lifecycle of a unit's source slot
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UnitState {
    /// Wired, waiting for its buffer
    Idle,
    /// Buffer loaded, nothing playing
    Armed,
    /// A source started at `offset` is live
    Playing { offset: f64 },
    /// Stopped by pause/stop/scrub
    Stopped,
    /// The source ran to the end of its buffer
    Ended,
}

/// The persistent per-track subgraph: a fader and a reverb send.
///
/// ```text
/// source ─► gain ─┬► destination
///                 ├► bus master tap
///                 └► send ─► bus reverb
/// ```
///
/// Sources are single-use, so every start builds a new one and wires it into
/// the same gain; the gain and send live as long as the track. Volume, pan and
/// send level are written straight into the nodes' [`Param`] cells.
pub struct TrackUnit {
    track: TrackId,
    gain: Handle<()>,
    send: Handle<()>,
    volume: Param,
    pan: Param,
    send_level: Param,
    state: UnitState,
}

impl TrackUnit {
    pub fn new(engine: &mut Engine, bus: &Bus, track: &Track) -> Result<Self, GraphError> {
        let sample_rate = engine.sample_rate();
        let gain = Gain::new(track.volume)
            .with_smoothing_ms(FADER_SMOOTHING_MS, sample_rate)
            .with_pan(track.pan.unwrap_or(0.0));
        let send = Gain::new(track.send_level).with_smoothing_ms(FADER_SMOOTHING_MS, sample_rate);
        let (volume, pan, send_level) = (gain.gain_param(), gain.pan_param(), send.gain_param());
        let gain = engine.add(gain);
        let send = engine.add(send);

        let wired = engine
            .output(&gain)
            .and_then(|()| engine.connect_ids(gain.id(), bus.master_input()))
            .and_then(|()| engine.connect(&gain, &send))
            .and_then(|()| engine.connect_ids(send.id(), bus.send_input()));
        if let Err(e) = wired {
            let _ = engine.remove(gain.id());
            let _ = engine.remove(send.id());
            return Err(e);
        }

        Ok(Self {
            track: track.id,
            gain,
            send,
            volume,
            pan,
            send_level,
            state: if track.is_loaded() { UnitState::Armed } else { UnitState::Idle },
        })
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn gain_node(&self) -> crate::NodeId {
        self.gain.id()
    }

    pub fn send_node(&self) -> crate::NodeId {
        self.send.id()
    }

    /// The buffer arrived; the unit can start.
    pub fn arm(&mut self) {
        if self.state == UnitState::Idle {
            self.state = UnitState::Armed;
        }
    }

    /// Build a fresh source at `offset` seconds and wire it into the gain.
    ///
    /// Rejects a missing buffer before the graph is touched. The caller owns
    /// retiring whatever source was live before.
    pub fn spawn_source(
        &mut self,
        engine: &mut Engine,
        buffer: Option<&Arc<AudioBuffer>>,
        offset: f64,
        now: f64,
    ) -> SessionResult<LiveSource> {
        let buffer = buffer.ok_or(SessionError::TrackNotLoaded(self.track))?;

        let source = BufferSource::new(buffer.clone(), offset);
        let ended = source.end_signal();
        let node = engine.add(source).id();
        if let Err(e) = engine.connect_ids(node, self.gain.id()) {
            let _ = engine.remove(node);
            return Err(e.into());
        }

        self.state = UnitState::Playing { offset };
        trace!(track = %self.track, offset, "source started");
        Ok(LiveSource::new(node, offset, now, ended))
    }

    pub(crate) fn set_volume(&mut self, volume: f32) -> f32 {
        let volume = clamp_unit(volume);
        self.volume.set(volume);
        volume
    }

    pub(crate) fn set_send(&mut self, level: f32) -> f32 {
        let level = clamp_unit(level);
        self.send_level.set(level);
        level
    }

    pub(crate) fn set_pan(&mut self, pan: f32) -> f32 {
        let pan = clamp_pan(pan);
        self.pan.set(pan);
        pan
    }

    /// Levels the nodes will render with: `(volume, send, pan)`
    pub fn levels(&self) -> (f32, f32, f32) {
        (self.volume.get(), self.send_level.get(), self.pan.get())
    }

    pub(crate) fn mark_stopped(&mut self) {
        if matches!(self.state, UnitState::Playing { .. }) {
            self.state = UnitState::Stopped;
        }
    }

    pub(crate) fn mark_ended(&mut self) {
        if matches!(self.state, UnitState::Playing { .. }) {
            self.state = UnitState::Ended;
        }
    }

    /// Remove the gain and send from the graph.
    pub fn teardown(self, engine: &mut Engine) {
        for id in [self.gain.id(), self.send.id()] {
            if let Err(e) = engine.remove(id) {
                warn!(track = %self.track, error = %e, "unit node already gone");
            }
        }
    }
}
