//! Error types

use std::path::PathBuf;

use thiserror::Error;

use crate::node::NodeId;
use crate::track::TrackId;

/// Graph wiring failures. Fatal for the unit that hit them, never for the bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The node was removed or never existed
    #[error("node {0:?} is not part of the graph")]
    UnknownNode(NodeId),

    /// The destination and sink live as long as the engine
    #[error("node {0:?} is owned by the engine and can't be removed")]
    Protected(NodeId),
}

/// Failures loading a track or impulse response. The asset is unusable;
/// everything else carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Network or filesystem failure
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Malformed or unsupported audio
    #[error("failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl LoadError {
    pub fn url(&self) -> &str {
        match self {
            LoadError::Fetch { url, .. } | LoadError::Decode { url, .. } => url,
        }
    }
}

/// Errors returned by [`Session`](crate::Session) operations.
///
/// Precondition failures are rejected before the graph is touched; the UI
/// should show them as a no-op with a message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("no track has a loaded buffer")]
    NoTracksLoaded,

    #[error("track {0} has no loaded buffer")]
    TrackNotLoaded(TrackId),

    #[error("unknown track {0}")]
    UnknownTrack(TrackId),

    #[error("transport is not playing")]
    NotPlaying,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl SessionError {
    /// Whether this is a rejected command rather than a failure.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SessionError::NoTracksLoaded
                | SessionError::TrackNotLoaded(_)
                | SessionError::UnknownTrack(_)
                | SessionError::NotPlaying
        )
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for buffer loads
pub type LoadResult<T> = Result<T, LoadError>;
