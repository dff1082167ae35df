//! Playback session
//!
//! [`Session`] keeps every track in lockstep with one transport. Each play
//! computes a single reference on the audio clock and starts every loaded
//! track at the same logical offset; pause and stop retire every live source
//! synchronously. Naturally-ended sources are reaped by [`Session::poll`],
//! which the host calls once per frame.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::assignment::{Assignments, ObjectId, UiContext};
use crate::buffer::AudioBuffer;
use crate::bus::{Bus, FilterBand, StereoChannel};
use crate::cache::{AssetSource, BufferCache};
use crate::config::MixerConfig;
use crate::engine::Engine;
use crate::error::{LoadResult, SessionError, SessionResult};
use crate::nodes::AnalyserReader;
use crate::registry::ActiveNodes;
use crate::track::{LoadState, Track, TrackId, TrackUnit, UnitState};
use crate::transport::{Transport, TransportState};

/// What one `play` did
#[derive(Clone, Debug, PartialEq)]
pub struct PlayReport {
    /// Logical offset every track started at
    pub offset: f64,
    pub started: Vec<TrackId>,
    /// Tracks with no buffer yet (still loading or failed)
    pub skipped: Vec<TrackId>,
    /// Tracks whose start failed in the graph
    pub failed: Vec<(TrackId, SessionError)>,
}

/// Buffer loading progress over all tracks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadProgress {
    pub total: usize,
    pub loaded: usize,
    pub failed: usize,
}

impl LoadProgress {
    pub fn pending(&self) -> usize {
        self.total - self.loaded - self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// A track's source reached the end of its buffer
    TrackEnded(TrackId),
    /// The main track finished; the transport is back at `Stopped`
    PlaybackEnded,
}

/// Snapshot returned by [`Session::poll`]
#[derive(Clone, Debug, PartialEq)]
pub struct Poll {
    pub state: TransportState,
    /// Logical position in seconds
    pub position: f64,
    pub events: Vec<SessionEvent>,
}

/// Tracks, their units, the shared bus and the transport, driven through one
/// engine.
pub struct Session<S: AssetSource> {
    engine: Engine,
    bus: Bus,
    analyser: AnalyserReader,
    cache: Arc<BufferCache<S>>,
    transport: Transport,

    tracks: Vec<Track>,
    units: HashMap<TrackId, TrackUnit>,
    active: ActiveNodes,
    assignments: Assignments,

    /// Longest loaded track; its end is the end of playback
    main_track: Option<TrackId>,
    next_track_id: u32,
    track_volume: f32,
    track_send: f32,
}

impl<S: AssetSource> Session<S> {
    /// Wire the bus into `engine`. The reverb stays off until
    /// [`load_impulse`](Self::load_impulse) succeeds.
    pub fn new(mut engine: Engine, cache: Arc<BufferCache<S>>, config: &MixerConfig) -> SessionResult<Self> {
        let (bus, analyser) = Bus::new(&mut engine, &config.bus, config.analyser_window)?;
        Ok(Self {
            engine,
            bus,
            analyser,
            cache,
            transport: Transport::new(),
            tracks: Vec::new(),
            units: HashMap::new(),
            active: ActiveNodes::new(),
            assignments: Assignments::new(),
            main_track: None,
            next_track_id: 0,
            track_volume: config.track_volume,
            track_send: config.track_send,
        })
    }

    /// [`new`](Self::new), then load the configured impulse response.
    ///
    /// A missing or broken impulse is logged and leaves the reverb off.
    pub async fn open(engine: Engine, cache: Arc<BufferCache<S>>, config: &MixerConfig) -> SessionResult<Self> {
        let mut session = Self::new(engine, cache, config)?;
        if let Some(url) = &config.impulse_response {
            // Failure is already logged by the bus
            let _ = session.load_impulse(url).await;
        }
        Ok(session)
    }

    pub async fn load_impulse(&mut self, url: &str) -> LoadResult<()> {
        self.bus.load_impulse_from(&self.cache, url).await
    }

    /// Install an already decoded impulse response.
    pub fn set_impulse(&mut self, impulse: &AudioBuffer) -> bool {
        self.bus.load_impulse(impulse)
    }

    // Tracks and loading

    /// Add a track and wire its unit. The buffer loads on the next
    /// [`load_pending`](Self::load_pending).
    pub fn import_track(&mut self, url: impl Into<String>, name: impl Into<String>) -> SessionResult<TrackId> {
        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;

        let track = Track::new(id, url.into(), name.into(), self.track_volume, self.track_send);
        let unit = TrackUnit::new(&mut self.engine, &self.bus, &track)?;
        info!(track = %id, url = track.url(), name = track.name(), "track imported");

        self.assignments.assign(id, None);
        self.units.insert(id, unit);
        self.tracks.push(track);
        Ok(id)
    }

    /// Load every pending track concurrently, reporting progress after each one
    /// settles. Failed tracks are marked and skipped; the rest carry on.
    pub async fn load_pending(&mut self, mut on_progress: impl FnMut(LoadProgress)) -> LoadProgress {
        let mut loads: FuturesUnordered<_> = self
            .tracks
            .iter()
            .filter(|t| *t.load_state() == LoadState::Pending)
            .map(|t| {
                let cache = self.cache.clone();
                let id = t.id();
                let url = t.url().to_owned();
                async move { (id, cache.load_buffer(&url).await) }
            })
            .collect();

        while let Some((id, result)) = loads.next().await {
            self.apply_load(id, result);
            on_progress(self.load_progress());
        }
        self.load_progress()
    }

    /// Record the outcome of a buffer load. Ignored if the track was removed
    /// meanwhile. Returns whether the track is now playable.
    pub fn apply_load(&mut self, id: TrackId, result: LoadResult<Arc<AudioBuffer>>) -> bool {
        let Some(track) = self.tracks.iter_mut().find(|t| t.id() == id) else {
            debug!(track = %id, "load finished for a removed track");
            return false;
        };

        let loaded = match result {
            Ok(buffer) => {
                track.set_loaded(buffer);
                if let Some(unit) = self.units.get_mut(&id) {
                    unit.arm();
                }
                true
            }
            Err(e) => {
                warn!(track = %id, error = %e, "track unusable");
                track.set_failed(e);
                false
            }
        };
        self.refresh_main_track();
        loaded
    }

    pub fn load_progress(&self) -> LoadProgress {
        self.tracks.iter().fold(
            LoadProgress {
                total: self.tracks.len(),
                ..LoadProgress::default()
            },
            |mut p, t| {
                match t.load_state() {
                    LoadState::Loaded => p.loaded += 1,
                    LoadState::Failed(_) => p.failed += 1,
                    LoadState::Pending => {}
                }
                p
            },
        )
    }

    fn refresh_main_track(&mut self) {
        let main = self
            .tracks
            .iter()
            .filter_map(|t| t.duration_secs().map(|d| (t.id(), d)))
            .fold(None, |best: Option<(TrackId, f64)>, (id, d)| match best {
                Some((_, longest)) if longest >= d => best,
                _ => Some((id, d)),
            })
            .map(|(id, _)| id);

        if main != self.main_track {
            debug!(track = ?main, "main track changed");
            self.main_track = main;
        }
    }

    fn main_duration(&self) -> Option<f64> {
        self.main_track.and_then(|id| self.track(id)).and_then(Track::duration_secs)
    }

    fn require_loaded(&self) -> SessionResult<()> {
        if self.tracks.iter().any(Track::is_loaded) {
            Ok(())
        } else {
            Err(SessionError::NoTracksLoaded)
        }
    }

    // Transport

    /// Start (or resume) every loaded track at one shared offset.
    ///
    /// From `Paused` this resumes where the pause happened, from `Stopped` at
    /// the scrub position. Calling it while playing restarts everything at the
    /// current position. A resume point at or past the end of the main track
    /// starts over from zero.
    pub fn play_all(&mut self) -> SessionResult<PlayReport> {
        self.require_loaded()?;

        let now = self.engine.current_time();
        let mut offset = match self.transport.state() {
            TransportState::Playing => self.transport.elapsed(now),
            _ => self.transport.resume_point(),
        };
        if self.main_duration().is_some_and(|end| offset >= end) {
            debug!(offset, "resume point past the end, starting over");
            offset = 0.0;
        }

        self.transport.start_at(now, offset);
        let report = self.start_units(now, offset);
        info!(
            offset,
            started = report.started.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "playing"
        );
        Ok(report)
    }

    fn start_units(&mut self, now: f64, offset: f64) -> PlayReport {
        let mut report = PlayReport {
            offset,
            started: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        };

        for track in &self.tracks {
            let id = track.id();
            let Some(buffer) = track.buffer() else {
                report.skipped.push(id);
                continue;
            };
            let Some(unit) = self.units.get_mut(&id) else {
                report.failed.push((id, SessionError::UnknownTrack(id)));
                continue;
            };

            let started = self
                .active
                .replace(&mut self.engine, id, |engine| unit.spawn_source(engine, Some(buffer), offset, now));
            match started {
                Ok(_) => report.started.push(id),
                Err(e) => {
                    warn!(track = %id, error = %e, "track failed to start");
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    fn stop_units(&mut self) {
        for id in self.active.stop_all(&mut self.engine) {
            if let Some(unit) = self.units.get_mut(&id) {
                unit.mark_stopped();
            }
        }
    }

    /// Pause every track, remembering the logical position. Returns it.
    pub fn pause_all(&mut self) -> SessionResult<f64> {
        self.require_loaded()?;
        let now = self.engine.current_time();
        let elapsed = self.transport.pause(now).ok_or(SessionError::NotPlaying)?;
        self.stop_units();
        info!(elapsed, "paused");
        Ok(elapsed)
    }

    /// Stop every track and rewind to zero. Always allowed.
    pub fn stop_all(&mut self) {
        self.transport.stop();
        self.stop_units();
        info!("stopped");
    }

    /// Space bar: pause when playing, play otherwise.
    pub fn toggle_playback(&mut self) -> SessionResult<TransportState> {
        if self.transport.is_playing() {
            self.pause_all()?;
        } else {
            self.play_all()?;
        }
        Ok(self.transport.state())
    }

    /// Move the playback position. While playing, every track restarts at
    /// `position` with a fresh reference.
    pub fn scrub(&mut self, position: f64) -> SessionResult<f64> {
        self.require_loaded()?;
        let mut position = if position.is_nan() { 0.0 } else { position.max(0.0) };
        if let Some(end) = self.main_duration() {
            position = position.min(end);
        }

        if self.transport.scrub(position) {
            let now = self.engine.current_time();
            self.transport.start_at(now, position);
            let report = self.start_units(now, position);
            debug!(position, started = report.started.len(), "scrubbed while playing");
        } else {
            debug!(position, "scrubbed");
        }
        Ok(position)
    }

    /// Restart one track at the current logical position, replacing its live
    /// source. Only meaningful while playing.
    pub fn restart_track(&mut self, id: TrackId) -> SessionResult<()> {
        let track = self.track(id).ok_or(SessionError::UnknownTrack(id))?;
        let buffer = track.buffer().cloned().ok_or(SessionError::TrackNotLoaded(id))?;
        if !self.transport.is_playing() {
            return Err(SessionError::NotPlaying);
        }
        let unit = self.units.get_mut(&id).ok_or(SessionError::UnknownTrack(id))?;

        let now = self.engine.current_time();
        let offset = self.transport.elapsed(now);
        self.active
            .replace(&mut self.engine, id, |engine| unit.spawn_source(engine, Some(&buffer), offset, now))?;
        debug!(track = %id, offset, "track restarted");
        Ok(())
    }

    /// Per-frame housekeeping: refresh the displayed position, reap ended
    /// sources, and finish playback once the main track is done.
    pub fn poll(&mut self) -> Poll {
        let now = self.engine.current_time();
        let mut position = self.transport.refresh(now);
        let mut events = Vec::new();

        let ended = self.active.reap_ended(&mut self.engine);
        let main_ended = self.main_track.is_some_and(|main| ended.contains(&main));
        for id in ended {
            if let Some(unit) = self.units.get_mut(&id) {
                unit.mark_ended();
            }
            events.push(SessionEvent::TrackEnded(id));
        }

        if self.transport.is_playing() && (main_ended || self.active.is_empty()) {
            self.stop_all();
            position = 0.0;
            info!("playback ended");
            events.push(SessionEvent::PlaybackEnded);
        }

        Poll {
            state: self.transport.state(),
            position,
            events,
        }
    }

    // Mixing

    fn track_mut(&mut self, id: TrackId) -> SessionResult<(&mut Track, &mut TrackUnit)> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(SessionError::UnknownTrack(id))?;
        let unit = self.units.get_mut(&id).ok_or(SessionError::UnknownTrack(id))?;
        Ok((track, unit))
    }

    /// Set a track's volume, clamped to `[0, 1]`. Returns the value applied.
    pub fn set_track_volume(&mut self, id: TrackId, volume: f32) -> SessionResult<f32> {
        let (track, unit) = self.track_mut(id)?;
        let volume = unit.set_volume(volume);
        track.apply_volume(volume);
        Ok(volume)
    }

    /// Set a track's reverb send, clamped to `[0, 1]`.
    pub fn set_track_send(&mut self, id: TrackId, level: f32) -> SessionResult<f32> {
        let (track, unit) = self.track_mut(id)?;
        let level = unit.set_send(level);
        track.apply_send(level);
        Ok(level)
    }

    /// Set a track's stereo balance, clamped to `[-1, 1]`.
    pub fn set_track_pan(&mut self, id: TrackId, pan: f32) -> SessionResult<f32> {
        let (track, unit) = self.track_mut(id)?;
        let pan = unit.set_pan(pan);
        track.apply_pan(pan);
        Ok(pan)
    }

    pub fn set_reverb_level(&mut self, level: f32) -> f32 {
        self.bus.set_wet_level(level)
    }

    pub fn set_delay_time(&mut self, channel: StereoChannel, secs: f32) -> f32 {
        self.bus.set_delay_time(channel, secs)
    }

    pub fn set_filter_frequency(&mut self, band: FilterBand, hz: f32) -> f32 {
        self.bus.set_filter_frequency(band, hz)
    }

    // Lifecycle

    /// Stop and unwire a track, and evict its buffer unless another track
    /// shares the URL. Other tracks keep playing undisturbed.
    pub fn remove_track(&mut self, id: TrackId) -> SessionResult<()> {
        let index = self
            .tracks
            .iter()
            .position(|t| t.id() == id)
            .ok_or(SessionError::UnknownTrack(id))?;

        self.active.stop(&mut self.engine, id);
        if let Some(unit) = self.units.remove(&id) {
            unit.teardown(&mut self.engine);
        }
        self.assignments.remove(id);

        let track = self.tracks.remove(index);
        if !self.tracks.iter().any(|t| t.url() == track.url()) {
            self.cache.clear_buffer(track.url());
        }
        self.refresh_main_track();
        info!(track = %id, "track removed");
        Ok(())
    }

    /// Stop playback and drop every track and cached buffer. The bus and its
    /// impulse stay.
    pub fn clear_session(&mut self) {
        self.stop_all();
        for (_, unit) in self.units.drain() {
            unit.teardown(&mut self.engine);
        }
        self.tracks.clear();
        self.assignments.clear();
        self.cache.clear_all_buffers();
        self.main_track = None;
        info!("session cleared");
    }

    /// Stop everything and unwire the whole session, handing the engine back.
    pub fn teardown(mut self) -> Engine {
        self.clear_session();
        self.bus.teardown(&mut self.engine);
        self.engine
    }

    pub fn assign_track(&mut self, id: TrackId, object: Option<ObjectId>) -> SessionResult<()> {
        if self.track(id).is_none() {
            return Err(SessionError::UnknownTrack(id));
        }
        self.assignments.assign(id, object);
        Ok(())
    }

    /// Attach a track to whatever the editor has selected (or unassign it
    /// when nothing is).
    pub fn assign_selected(&mut self, id: TrackId, ui: &UiContext) -> SessionResult<()> {
        self.assign_track(id, ui.selected.clone())
    }

    // Clock

    /// Render `blocks` blocks, advancing the audio clock.
    pub fn render(&mut self, blocks: u64) {
        self.engine.render(blocks);
    }

    pub fn render_secs(&mut self, secs: f64) {
        self.engine.render_secs(secs);
    }

    /// Keep a real-time device fed. See [`Engine::catch_up`].
    pub fn catch_up(&mut self, elapsed: std::time::Duration, lead_blocks: u64) -> u64 {
        self.engine.catch_up(elapsed, lead_blocks)
    }

    pub fn current_time(&self) -> f64 {
        self.engine.current_time()
    }

    // Accessors

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn analyser(&mut self) -> &mut AnalyserReader {
        &mut self.analyser
    }

    pub fn cache(&self) -> &Arc<BufferCache<S>> {
        &self.cache
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    /// Logical position now, without touching the display state
    pub fn position(&self) -> f64 {
        self.transport.elapsed(self.engine.current_time())
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    pub fn unit_state(&self, id: TrackId) -> Option<UnitState> {
        self.units.get(&id).map(TrackUnit::state)
    }

    pub fn active(&self) -> &ActiveNodes {
        &self.active
    }

    pub fn assignments(&self) -> &Assignments {
        &self.assignments
    }

    pub fn main_track(&self) -> Option<TrackId> {
        self.main_track
    }
}
