//! High-level audio engine API
//!
//! [`Engine`] wraps one [`AudioGraph`] at a fixed sample rate. It owns the
//! destination mixer every audible path ends in, the optional device sink behind
//! it, and the audio clock: the number of frames rendered so far.

use core::marker::PhantomData;
use core::time::Duration;

use dasp_graph::Buffer;
use tracing::{trace, warn};

use crate::error::GraphError;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, NodeId};
use crate::nodes::Mixer;

#[cfg(feature = "cpal_sink")]
use crate::device::CpalDevice;

/// A handle for sending messages to a node in the audio graph.
///
/// Handles are returned when you add a node to the [`Engine`] and provide two capabilities:
/// 1. **Connections** - Pass handles to [`Engine::connect`] or [`Engine::output`]
/// 2. **Messages** - Send discrete updates via [`Handle::send`]
///
/// Messages are buffered in a lock-free ring buffer and processed at the start
/// of the next audio block. If the buffer is full, [`Handle::send`] returns `Err(msg)`
/// with the message that couldn't be sent.
pub struct Handle<M: Send + 'static> {
    pub(crate) node_id: NodeId,
    pub(crate) sender: rtrb::Producer<M>,
    pub(crate) _marker: PhantomData<M>,
}

impl<M: Send + 'static> Handle<M> {
    /// Send a message to the node.
    ///
    /// The message will be processed at the start of the next audio block.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the message was queued successfully
    /// - `Err(msg)` if the queue is full (message dropped)
    pub fn send(&mut self, msg: M) -> Result<(), M> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }

    /// The id of the node this handle talks to.
    #[inline]
    pub fn id(&self) -> NodeId {
        self.node_id
    }

    /// Send, logging instead of failing when the queue is full.
    pub(crate) fn deliver(&mut self, msg: M, what: &'static str) -> bool {
        match self.send(msg) {
            Ok(()) => true,
            Err(_) => {
                warn!(node = ?self.node_id, what, "message queue full, update dropped");
                false
            }
        }
    }
}

impl<M: Send + 'static> core::fmt::Debug for Handle<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handle").field("node_id", &self.node_id).finish()
    }
}

/// The audio engine - manages nodes, connections, and block processing.
///
/// # Building the Graph
///
/// 1. Add nodes with [`add`](Self::add) - returns a [`Handle`] for connections and messages
/// 2. Connect nodes with [`connect`](Self::connect)
/// 3. Connect final node(s) to the destination with [`output`](Self::output)
///
/// ```
/// # use stembus::{Engine, nodes::{Gain, Delay, DelayChannel}};
/// let mut engine = Engine::new(48_000);
/// let delay = engine.add(Delay::new(DelayChannel::Both, 48_000, 1.0).with_time(0.01));
/// let gain = engine.add(Gain::new(0.5));
///
/// engine.connect(&delay, &gain).unwrap();
/// engine.output(&gain).unwrap();
/// engine.render_secs(0.5);
/// assert!(engine.current_time() >= 0.5);
/// ```
///
/// # Processing Audio
///
/// Call [`process`](Self::process) (or [`catch_up`](Self::catch_up)) repeatedly.
/// Every processed block advances [`current_time`](Self::current_time), which is
/// the clock the transport is measured against.
pub struct Engine {
    graph: AudioGraph,
    sample_rate: u32,
    queue_size: usize,

    /// Stereo mixer every audible path ends in
    destination: NodeId,
    /// The device (or test) sink behind the destination
    sink_node: Option<NodeId>,

    blocks_processed: u64,
}

impl Engine {
    /// Create an engine with an explicit sample rate and no device sink.
    ///
    /// Audio reaching the destination is rendered and discarded until a sink is
    /// attached with [`with_output`](Self::with_output).
    pub fn new(sample_rate: u32) -> Self {
        let mut graph = AudioGraph::new(sample_rate);
        let destination = graph.add_with_queue_size(Mixer::stereo(), 1).id();
        // A freshly added node is always present
        let _ = graph.add_terminal(destination);

        Self {
            graph,
            sample_rate,
            queue_size: 64,
            destination,
            sink_node: None,
            blocks_processed: 0,
        }
    }

    /// Create an engine on the system's default audio output device.
    ///
    /// Returns `None` if no audio device is available.
    #[cfg(feature = "cpal_sink")]
    pub fn default_output() -> Option<Self> {
        let device = CpalDevice::default_output()?;
        Some(Self::new(device.sample_rate()).with_output(device.create_sink()))
    }

    /// Set the per-node message queue size (builder pattern).
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size.max(1);
        self
    }

    /// Attach an output sink behind the destination (builder pattern).
    pub fn with_output<S: AudioNode<Message = ()>>(mut self, sink: S) -> Self {
        let sink = self.graph.add_with_queue_size(sink, 1).id();
        // Both ids were just created
        let _ = self.graph.connect(self.destination, sink);
        let _ = self.graph.add_terminal(sink);
        self.sink_node = Some(sink);
        self
    }

    /// Get the output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Message queue capacity given to nodes added from now on.
    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// Whether a sink is attached behind the destination.
    pub fn has_output(&self) -> bool {
        self.sink_node.is_some()
    }

    /// Id of the destination mixer.
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Add a node to the audio graph.
    ///
    /// Returns a [`Handle`] for connecting the node and sending messages to it.
    pub fn add<N: AudioNode>(&mut self, node: N) -> Handle<N::Message> {
        let handle = self.graph.add_with_queue_size(node, self.queue_size);
        Handle {
            node_id: handle.id(),
            sender: handle.sender,
            _marker: PhantomData,
        }
    }

    /// Add a node that nothing downstream consumes (an analyser tap, say) and
    /// make sure it is still processed every block.
    pub fn add_tap<N: AudioNode>(&mut self, node: N) -> Handle<N::Message> {
        let handle = self.add(node);
        // Just created, can't be unknown
        let _ = self.graph.add_terminal(handle.id());
        handle
    }

    /// Connect two nodes together.
    ///
    /// Audio flows from `from` to `to`. Connecting the same pair twice is a no-op.
    pub fn connect<M1, M2>(&mut self, from: &Handle<M1>, to: &Handle<M2>) -> Result<(), GraphError>
    where
        M1: Send + 'static,
        M2: Send + 'static,
    {
        self.connect_ids(from.node_id, to.node_id)
    }

    /// Connect two nodes by id.
    pub fn connect_ids(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.graph.connect(from, to)
    }

    /// Remove the edge between two nodes. Returns whether an edge existed.
    pub fn disconnect_ids(&mut self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.graph.disconnect(from, to)
    }

    /// Connect a node to the destination.
    pub fn output<M: Send + 'static>(&mut self, handle: &Handle<M>) -> Result<(), GraphError> {
        self.graph.connect(handle.node_id, self.destination)
    }

    /// Stop and remove a node. Every edge touching it goes with it.
    pub fn remove(&mut self, id: NodeId) -> Result<(), GraphError> {
        if id == self.destination || Some(id) == self.sink_node {
            return Err(GraphError::Protected(id));
        }
        self.graph.remove(id)?;
        trace!(node = ?id, "node removed");
        Ok(())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains(id)
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.graph.is_connected(from, to)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Process one block of audio (64 frames).
    pub fn process(&mut self) {
        self.graph.process();
        self.blocks_processed += 1;
    }

    /// Process `blocks` blocks back to back.
    pub fn render(&mut self, blocks: u64) {
        for _ in 0..blocks {
            self.process();
        }
    }

    /// Advance the audio clock by at least `secs` seconds.
    pub fn render_secs(&mut self, secs: f64) {
        let frames = (secs.max(0.0) * self.sample_rate as f64).ceil() as u64;
        let blocks = (frames + Buffer::LEN as u64 - 1) / Buffer::LEN as u64;
        self.render(blocks);
    }

    /// Render whatever a real-time driver owes after `elapsed` wall time,
    /// staying `lead_blocks` ahead of the device to prevent underruns.
    ///
    /// Returns how many blocks were rendered.
    ///
    /// ```no_run
    /// # use stembus::Engine;
    /// use std::time::{Duration, Instant};
    ///
    /// let mut engine = Engine::new(48_000);
    /// let start = Instant::now();
    /// loop {
    ///     engine.catch_up(start.elapsed(), 4);
    ///     std::thread::sleep(Duration::from_micros(500));
    /// }
    /// ```
    pub fn catch_up(&mut self, elapsed: Duration, lead_blocks: u64) -> u64 {
        let due = (elapsed.as_secs_f64() * self.sample_rate as f64 / Buffer::LEN as f64) as u64 + lead_blocks;
        let before = self.blocks_processed;
        while self.blocks_processed < due {
            self.process();
        }
        self.blocks_processed - before
    }

    /// Number of blocks processed so far.
    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    /// The audio clock: seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        (self.blocks_processed * Buffer::LEN as u64) as f64 / self.sample_rate as f64
    }

    /// Length of one block in seconds.
    pub fn block_secs(&self) -> f64 {
        Buffer::LEN as f64 / self.sample_rate as f64
    }
}
