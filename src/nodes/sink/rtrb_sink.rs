//! Ring buffer sink

use dasp_graph::{Buffer, Input};
use rtrb::Producer;

use crate::node::{AudioNode, ProcessContext};

/// Pushes interleaved audio into an rtrb ring buffer.
///
/// Used to capture the destination in tests and for offline inspection. All
/// inputs are summed first; a mono sink takes the average of both sides. A
/// block that doesn't fit is dropped whole and counted, so the consumer never
/// sees a torn frame.
pub struct RtrbSink {
    producer: Producer<f32>,
    channels: usize,
    mix: [Buffer; 2],
    dropped_blocks: u64,
}

impl RtrbSink {
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.clamp(1, 2),
            mix: [Buffer::SILENT, Buffer::SILENT],
            dropped_blocks: 0,
        }
    }

    pub fn mono(producer: Producer<f32>) -> Self {
        Self::new(producer, 1)
    }

    pub fn stereo(producer: Producer<f32>) -> Self {
        Self::new(producer, 2)
    }

    /// Free sample slots in the ring
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    #[inline]
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }
}

impl AudioNode for RtrbSink {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        crate::nodes::effect::sum_inputs(inputs, &mut self.mix);

        let Ok(chunk) = self.producer.write_chunk_uninit(Buffer::LEN * self.channels) else {
            self.dropped_blocks += 1;
            return;
        };

        chunk.fill_from_iter(super::interleave(&self.mix, self.channels));
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 0 }
}
