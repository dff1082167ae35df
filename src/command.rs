//! Command surface
//!
//! Everything a host UI can ask of a [`Session`], as values. Hosts that route
//! input through one place can build a [`Command`] and [`dispatch`] it.
//!
//! [`dispatch`]: Session::dispatch

use tracing::debug;

use crate::assignment::ObjectId;
use crate::bus::{FilterBand, StereoChannel};
use crate::cache::AssetSource;
use crate::error::SessionResult;
use crate::session::{PlayReport, Session};
use crate::track::TrackId;
use crate::transport::TransportState;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    TogglePlayback,
    Scrub(f64),
    ClearSession,
    SetTrackVolume(TrackId, f32),
    SetTrackSend(TrackId, f32),
    SetTrackPan(TrackId, f32),
    SetReverbLevel(f32),
    SetDelayTime(StereoChannel, f32),
    SetFilterFrequency(FilterBand, f32),
    /// Register a track; its buffer loads with the next `load_pending`
    ImportTrack { url: String, name: String },
    RemoveTrack(TrackId),
    RestartTrack(TrackId),
    AssignTrack(TrackId, Option<ObjectId>),
}

/// Result of a dispatched command
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Played(PlayReport),
    /// Paused at this logical position
    Paused(f64),
    Transport(TransportState),
    /// A parameter after clamping
    Value(f32),
    /// The position actually scrubbed to
    Position(f64),
    Imported(TrackId),
    Done,
}

/// Keyboard shortcuts. Only playback is handled by the session; the others
/// toggle host-side UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shortcut {
    TogglePlayback,
    ToggleUi,
    TogglePerformanceOverlay,
}

impl Shortcut {
    /// Map a key name (as reported by browsers and winit alike) to a shortcut.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            " " | "Space" => Some(Shortcut::TogglePlayback),
            "u" | "U" | "KeyU" => Some(Shortcut::ToggleUi),
            "p" | "P" | "KeyP" => Some(Shortcut::TogglePerformanceOverlay),
            _ => None,
        }
    }

    /// The session command behind the shortcut, if it has one
    pub fn command(self) -> Option<Command> {
        match self {
            Shortcut::TogglePlayback => Some(Command::TogglePlayback),
            Shortcut::ToggleUi | Shortcut::TogglePerformanceOverlay => None,
        }
    }
}

impl<S: AssetSource> Session<S> {
    pub fn dispatch(&mut self, command: Command) -> SessionResult<Outcome> {
        debug!(?command, "dispatch");
        Ok(match command {
            Command::Play => Outcome::Played(self.play_all()?),
            Command::Pause => Outcome::Paused(self.pause_all()?),
            Command::Stop => {
                self.stop_all();
                Outcome::Transport(TransportState::Stopped)
            }
            Command::TogglePlayback => Outcome::Transport(self.toggle_playback()?),
            Command::Scrub(position) => Outcome::Position(self.scrub(position)?),
            Command::ClearSession => {
                self.clear_session();
                Outcome::Done
            }
            Command::SetTrackVolume(id, v) => Outcome::Value(self.set_track_volume(id, v)?),
            Command::SetTrackSend(id, v) => Outcome::Value(self.set_track_send(id, v)?),
            Command::SetTrackPan(id, p) => Outcome::Value(self.set_track_pan(id, p)?),
            Command::SetReverbLevel(v) => Outcome::Value(self.set_reverb_level(v)),
            Command::SetDelayTime(channel, v) => Outcome::Value(self.set_delay_time(channel, v)),
            Command::SetFilterFrequency(band, v) => Outcome::Value(self.set_filter_frequency(band, v)),
            Command::ImportTrack { url, name } => Outcome::Imported(self.import_track(url, name)?),
            Command::RemoveTrack(id) => {
                self.remove_track(id)?;
                Outcome::Done
            }
            Command::RestartTrack(id) => {
                self.restart_track(id)?;
                Outcome::Done
            }
            Command::AssignTrack(id, object) => {
                self.assign_track(id, object)?;
                Outcome::Done
            }
        })
    }
}
