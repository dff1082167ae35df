//! Core node trait and context types.

use dasp_graph::{Buffer, Input};

/// Information available during audio processing.
///
/// Passed to every [`AudioNode::process`] call. Contains the graph's sample rate
/// and the buffer size (always 64 frames, the `dasp_graph` block length).
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of frames per buffer (currently always 64)
    pub buffer_size: usize,
}

impl ProcessContext {
    /// Duration of one block in seconds.
    #[inline]
    pub fn block_secs(&self) -> f64 {
        self.buffer_size as f64 / self.sample_rate as f64
    }
}

/// Unique identifier for a node within a graph.
///
/// Ids are never reused, so a stale id of a removed node can't alias a new one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

/// The core trait for audio processing nodes.
///
/// Nodes can be:
/// - **Sources**: generate audio (0 inputs) - buffer sources
/// - **Effects**: process audio (1+ inputs) - gain, filters, delays, convolution
/// - **Sinks**: consume audio (0 outputs) - device outputs, analysers
///
/// # Message-Based Parameters
///
/// Nodes receive discrete updates via messages drained at the start of every
/// block. Continuous controls that may change faster than blocks run (faders,
/// cutoffs) are better held in a [`Param`](crate::Param) the node reads each
/// block, since a full queue would drop the newest value.
///
/// ```
/// use stembus::{AudioNode, ProcessContext};
/// use dasp_graph::{Buffer, Input};
///
/// enum TrimMessage {
///     SetLevel(f32),
/// }
///
/// struct Trim {
///     level: f32,
/// }
///
/// impl AudioNode for Trim {
///     type Message = TrimMessage;
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = TrimMessage>,
///         inputs: &[Input],
///         outputs: &mut [Buffer],
///     ) {
///         for msg in messages {
///             match msg {
///                 TrimMessage::SetLevel(l) => self.level = l,
///             }
///         }
///
///         for (ch, out) in outputs.iter_mut().enumerate() {
///             out.iter_mut().for_each(|s| *s = 0.0);
///             for input in inputs {
///                 if let Some(buf) = input.buffers().get(ch) {
///                     for (o, i) in out.iter_mut().zip(buf.iter()) {
///                         *o += *i * self.level;
///                     }
///                 }
///             }
///         }
///     }
///
///     fn num_inputs(&self) -> usize { 1 }
///     fn num_outputs(&self) -> usize { 2 }
/// }
/// ```
pub trait AudioNode: Send + 'static {
    /// Message type for parameter updates.
    ///
    /// Use a custom enum for nodes with parameters, or `()` for nodes without.
    type Message: Send + 'static;

    /// Process one block of audio.
    ///
    /// Called once per block. Implementations should:
    /// 1. Drain and handle all pending messages
    /// 2. Read from `inputs` (if any)
    /// 3. Write every sample of `outputs`, silence included
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    );

    /// Number of audio input ports (0 for sources).
    fn num_inputs(&self) -> usize { 0 }

    /// Number of audio output channels.
    fn num_outputs(&self) -> usize { 1 }
}
