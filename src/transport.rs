//! Transport clock
//!
//! Maps audio-clock time to a logical playback position. The transport does
//! not read any clock itself: every transition takes `now`, the engine's
//! current time in seconds, so one `play` computes one reference for all
//! tracks.

use tracing::trace;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Transport position bookkeeping.
///
/// While playing, the logical position is `now - play_offset_ref`. While not
/// playing, `pause_elapsed` (paused) or `scrub_position` (stopped) is the
/// resume point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transport {
    state: TransportState,
    play_offset_ref: Option<f64>,
    pause_elapsed: f64,
    scrub_position: f64,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> TransportState {
        self.state
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    /// Audio-clock time at which logical position 0 would have played
    #[inline]
    pub fn play_offset_ref(&self) -> Option<f64> {
        self.play_offset_ref
    }

    #[inline]
    pub fn pause_elapsed(&self) -> f64 {
        self.pause_elapsed
    }

    #[inline]
    pub fn scrub_position(&self) -> f64 {
        self.scrub_position
    }

    /// Where the next `start_at` should begin when nothing overrides it
    pub fn resume_point(&self) -> f64 {
        match self.state {
            TransportState::Paused => self.pause_elapsed,
            _ => self.scrub_position,
        }
    }

    /// Enter `Playing` so that logical `position` is heard at audio time `now`.
    pub fn start_at(&mut self, now: f64, position: f64) {
        let position = position.max(0.0);
        self.play_offset_ref = Some(now - position);
        self.scrub_position = position;
        self.state = TransportState::Playing;
        trace!(now, position, "transport playing");
    }

    /// Enter `Paused`, capturing the logical position. Returns it, or `None` if
    /// the transport wasn't playing.
    pub fn pause(&mut self, now: f64) -> Option<f64> {
        if !self.is_playing() {
            return None;
        }
        let elapsed = self.elapsed(now);
        self.pause_elapsed = elapsed;
        self.scrub_position = elapsed;
        self.state = TransportState::Paused;
        trace!(now, elapsed, "transport paused");
        Some(elapsed)
    }

    /// Enter `Stopped` and rewind to zero. Allowed from any state.
    pub fn stop(&mut self) {
        *self = Self::default();
        trace!("transport stopped");
    }

    /// Move the resume point. Returns `true` if the transport is playing, in
    /// which case the caller must restart playback at `position`.
    pub fn scrub(&mut self, position: f64) -> bool {
        let position = position.max(0.0);
        match self.state {
            TransportState::Stopped => self.scrub_position = position,
            TransportState::Paused => {
                self.pause_elapsed = position;
                self.scrub_position = position;
            }
            TransportState::Playing => return true,
        }
        false
    }

    /// Logical position at audio time `now`
    pub fn elapsed(&self, now: f64) -> f64 {
        match (self.state, self.play_offset_ref) {
            (TransportState::Playing, Some(reference)) => (now - reference).max(0.0),
            (TransportState::Paused, _) => self.pause_elapsed,
            _ => self.scrub_position,
        }
    }

    /// Refresh the displayed position while playing and return it.
    pub fn refresh(&mut self, now: f64) -> f64 {
        let position = self.elapsed(now);
        if self.is_playing() {
            self.scrub_position = position;
        }
        position
    }
}
