//! Audio graph - owns nodes and message queues

use alloc::boxed::Box;
use core::marker::PhantomData;

use dasp_graph::{Buffer, Input, NodeData, Processor};
use hashbrown::HashMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::GraphError;
use crate::node::{AudioNode, NodeId, ProcessContext};

/// Internal handle to send messages to a node in an AudioGraph
pub(crate) struct NodeHandle<M: Send + 'static> {
    pub(crate) id: NodeId,
    pub(crate) sender: Producer<M>,
    pub(crate) _marker: PhantomData<M>,
}

impl<M: Send + 'static> NodeHandle<M> {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

// Type-erased wrapper so we can store heterogeneous nodes
trait ErasedNode: Send {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]);
}

struct NodeWrapper<N: AudioNode> {
    node: N,
    receiver: Consumer<N::Message>,
}

impl<N: AudioNode> ErasedNode for NodeWrapper<N> {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]) {
        // Split borrow to avoid conflict between receiver and node
        let receiver = &mut self.receiver;
        let node = &mut self.node;

        // Create a draining iterator directly from the consumer - no allocation!
        let messages = core::iter::from_fn(|| receiver.pop().ok());
        node.process(ctx, messages, inputs, outputs);
    }
}

// Adapter for dasp_graph
struct DaspAdapter {
    node: Box<dyn ErasedNode>,
    ctx: ProcessContext,
}

impl dasp_graph::Node for DaspAdapter {
    fn process(&mut self, inputs: &[Input], outputs: &mut [Buffer]) {
        self.node.process_erased(&self.ctx, inputs, outputs);
    }
}

/// Hidden node every terminal feeds into, so one traversal reaches all of them.
struct Root;

impl AudioNode for Root {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        _inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
    }

    fn num_outputs(&self) -> usize { 0 }
}

// Stable indices: removing a node must not move any other node.
type InnerGraph = StableGraph<NodeData<DaspAdapter>, ()>;

/// An audio processing graph at a fixed sample rate
pub(crate) struct AudioGraph {
    graph: InnerGraph,
    processor: Processor<InnerGraph>,
    ctx: ProcessContext,

    node_indices: HashMap<NodeId, NodeIndex>,
    next_node_id: u32,

    root: NodeIndex,
}

impl AudioGraph {
    /// Create a new graph with the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        let ctx = ProcessContext {
            sample_rate,
            buffer_size: Buffer::LEN,
        };
        let mut graph = InnerGraph::with_capacity(64, 64);
        let root = graph.add_node(NodeData::new(Self::adapt(Root, RingBuffer::new(1).1, ctx), Vec::new()));

        Self {
            graph,
            processor: Processor::with_capacity(64),
            ctx,
            node_indices: HashMap::new(),
            next_node_id: 0,
            root,
        }
    }

    fn adapt<N: AudioNode>(node: N, receiver: Consumer<N::Message>, ctx: ProcessContext) -> DaspAdapter {
        DaspAdapter {
            node: Box::new(NodeWrapper { node, receiver }),
            ctx,
        }
    }

    /// Add a node with a custom message queue size
    pub fn add_with_queue_size<N: AudioNode>(&mut self, node: N, queue_size: usize) -> NodeHandle<N::Message> {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let (producer, consumer) = RingBuffer::new(queue_size.max(1));

        // 0 outputs = sink, but dasp_graph still wants somewhere to point
        let num_outputs = node.num_outputs().max(1);
        let adapter = Self::adapt(node, consumer, self.ctx);
        let node_data = NodeData::new(adapter, vec![Buffer::SILENT; num_outputs]);

        let idx = self.graph.add_node(node_data);
        self.node_indices.insert(id, idx);

        NodeHandle {
            id,
            sender: producer,
            _marker: PhantomData,
        }
    }

    fn index(&self, id: NodeId) -> Result<NodeIndex, GraphError> {
        self.node_indices.get(&id).copied().ok_or(GraphError::UnknownNode(id))
    }

    /// Connect output of `from` to input of `to`. Connecting twice is a no-op.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let from_idx = self.index(from)?;
        let to_idx = self.index(to)?;
        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    /// Remove the edge between `from` and `to`, if there is one.
    ///
    /// Returns whether an edge was removed.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        let from_idx = self.index(from)?;
        let to_idx = self.index(to)?;
        Ok(match self.graph.find_edge(from_idx, to_idx) {
            Some(edge) => self.graph.remove_edge(edge).is_some(),
            None => false,
        })
    }

    /// Remove a node and every edge touching it. Its message queue is dropped with it.
    pub fn remove(&mut self, id: NodeId) -> Result<(), GraphError> {
        let idx = self.node_indices.remove(&id).ok_or(GraphError::UnknownNode(id))?;
        self.graph.remove_node(idx);
        Ok(())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node_indices.contains_key(&id)
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        match (self.node_indices.get(&from), self.node_indices.get(&to)) {
            (Some(&a), Some(&b)) => self.graph.find_edge(a, b).is_some(),
            _ => false,
        }
    }

    /// Number of user nodes (the hidden root is not counted)
    pub fn node_count(&self) -> usize {
        self.node_indices.len()
    }

    /// Number of edges between user nodes
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count() - self.graph.neighbors_directed(self.root, petgraph::Incoming).count()
    }

    /// Mark a node as a processing terminal (a sink, or a tap with no downstream).
    pub fn add_terminal(&mut self, id: NodeId) -> Result<(), GraphError> {
        let idx = self.index(id)?;
        if self.graph.find_edge(idx, self.root).is_none() {
            self.graph.add_edge(idx, self.root, ());
        }
        Ok(())
    }

    /// Process one block of audio through everything upstream of a terminal
    pub fn process(&mut self) {
        self.processor.process(&mut self.graph, self.root);
    }
}
