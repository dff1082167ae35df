//! # stembus
//!
//! The audio core of a multitrack stem mixer: a block-based audio graph, a
//! shared reverb bus, and a transport that keeps many single-use playback
//! sources phase-aligned through play, pause, stop and scrub.
//!
//! ```
//! use std::sync::Arc;
//! use stembus::{BufferCache, MemoryAssetSource, MixerConfig, Session, Engine};
//!
//! let config = MixerConfig::default();
//! let cache = Arc::new(BufferCache::new(MemoryAssetSource::new()));
//! let mut session = Session::new(Engine::new(config.sample_rate), cache, &config).unwrap();
//!
//! // Nothing loaded yet: transport commands are refused, not fatal
//! assert!(session.play_all().unwrap_err().is_precondition());
//! ```
//!
//! ## Threads
//!
//! The graph is owned by one control thread. Faders, pan, wet level, delay
//! times and cutoffs are [`Param`] cells the nodes read every block, so the
//! latest value always wins. Structural changes such as an impulse swap travel
//! as messages over lock-free queues ([`Handle::send`]). The device sink runs
//! on its own cpal thread behind a ring buffer. The audio clock is the number of
//! frames the engine has rendered, so tests can drive time deterministically
//! with [`Engine::render`].

extern crate alloc;

pub mod assignment;
pub mod buffer;
pub mod bus;
pub mod cache;
pub mod command;
pub mod config;
#[cfg(feature = "cpal_sink")]
pub mod device;
pub mod engine;
pub mod error;
mod graph;
pub mod node;
pub mod nodes;
pub mod param;
pub mod registry;
pub mod session;
pub mod track;
pub mod transport;

pub use assignment::{Assignments, ObjectId, TransformMode, UiContext};
pub use buffer::AudioBuffer;
pub use bus::{Bus, BusSettings, FilterBand, StereoChannel};
#[cfg(feature = "http")]
pub use cache::HttpAssetSource;
pub use cache::{AssetSource, BufferCache, CacheStats, FsAssetSource, MemoryAssetSource};
pub use command::{Command, Outcome, Shortcut};
pub use config::MixerConfig;
#[cfg(feature = "cpal_sink")]
pub use device::CpalDevice;
pub use engine::{Engine, Handle};
pub use error::{ConfigError, GraphError, LoadError, LoadResult, SessionError, SessionResult};
pub use node::{AudioNode, NodeId, ProcessContext};
pub use param::Param;
pub use registry::{ActiveNodes, LiveSource};
pub use session::{LoadProgress, PlayReport, Poll, Session, SessionEvent};
pub use track::{LoadState, Track, TrackId, TrackUnit, UnitState};
pub use transport::{Transport, TransportState};
