//! Active node registry
//!
//! At most one live source per track. Replacing a slot retires the previous
//! source before the new one is built, inside one `&mut` call, so two sources
//! for the same track can never play together.

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{GraphError, SessionResult};
use crate::node::NodeId;
use crate::nodes::EndSignal;
use crate::track::TrackId;

/// A source node currently in the graph
#[derive(Clone, Debug)]
pub struct LiveSource {
    node: NodeId,
    offset: f64,
    started_at: f64,
    ended: EndSignal,
}

impl LiveSource {
    pub(crate) fn new(node: NodeId, offset: f64, started_at: f64, ended: EndSignal) -> Self {
        Self {
            node,
            offset,
            started_at,
            ended,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Buffer position the source started from, in seconds
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Audio-clock time the source was started at
    pub fn started_at(&self) -> f64 {
        self.started_at
    }

    /// Whether the source played to the end of its buffer
    pub fn is_ended(&self) -> bool {
        self.ended.is_ended()
    }

    /// Buffer position at audio time `now`
    pub fn position(&self, now: f64) -> f64 {
        self.offset + (now - self.started_at).max(0.0)
    }
}

/// Track id → live source
#[derive(Debug, Default)]
pub struct ActiveNodes {
    live: HashMap<TrackId, LiveSource>,
}

impl ActiveNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retire the track's current source, then start a new one with `spawn`.
    ///
    /// If `spawn` fails the slot is left empty.
    pub fn replace<F>(&mut self, engine: &mut Engine, track: TrackId, spawn: F) -> SessionResult<NodeId>
    where
        F: FnOnce(&mut Engine) -> SessionResult<LiveSource>,
    {
        self.stop(engine, track);
        let live = spawn(engine)?;
        let node = live.node;
        self.live.insert(track, live);
        Ok(node)
    }

    /// Remove the track's source from the graph. Returns what was playing.
    pub fn stop(&mut self, engine: &mut Engine, track: TrackId) -> Option<LiveSource> {
        let live = self.live.remove(&track)?;
        retire(engine, track, live.node);
        Some(live)
    }

    /// Remove every source. Returns the tracks that were playing.
    pub fn stop_all(&mut self, engine: &mut Engine) -> Vec<TrackId> {
        let mut stopped: Vec<TrackId> = Vec::with_capacity(self.live.len());
        for (track, live) in self.live.drain() {
            retire(engine, track, live.node);
            stopped.push(track);
        }
        stopped.sort_unstable();
        stopped
    }

    /// Remove sources that finished on their own. Returns their tracks.
    pub fn reap_ended(&mut self, engine: &mut Engine) -> Vec<TrackId> {
        let mut ended: Vec<TrackId> = self
            .live
            .iter()
            .filter(|(_, live)| live.is_ended())
            .map(|(track, _)| *track)
            .collect();
        ended.sort_unstable();

        for track in &ended {
            if let Some(live) = self.live.remove(track) {
                debug!(%track, "source ended");
                retire(engine, *track, live.node);
            }
        }
        ended
    }

    pub fn get(&self, track: TrackId) -> Option<&LiveSource> {
        self.live.get(&track)
    }

    pub fn contains(&self, track: TrackId) -> bool {
        self.live.contains_key(&track)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrackId, &LiveSource)> {
        self.live.iter().map(|(track, live)| (*track, live))
    }
}

fn retire(engine: &mut Engine, track: TrackId, node: NodeId) {
    match engine.remove(node) {
        Ok(()) => {}
        Err(GraphError::UnknownNode(_)) => warn!(%track, ?node, "source already removed"),
        Err(e) => warn!(%track, error = %e, "failed to remove source"),
    }
}
