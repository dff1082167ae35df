//! Summing node

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};

/// Sums every connected input at unity gain.
///
/// Mono inputs are copied to every output channel; inputs with more channels
/// than the mixer drop the extras. Used as the engine destination and as the
/// merger joining the split stereo delay lines.
pub struct Mixer {
    channels: usize,
}

impl Mixer {
    pub fn new(channels: usize) -> Self {
        Self { channels: channels.max(1) }
    }

    pub fn stereo() -> Self {
        Self::new(2)
    }
}

/// Add every input into `outputs`, upmixing mono. Outputs are cleared first.
pub(crate) fn sum_inputs(inputs: &[Input], outputs: &mut [Buffer]) {
    for out in outputs.iter_mut() {
        out.iter_mut().for_each(|s| *s = 0.0);
    }

    for input in inputs {
        let buffers = input.buffers();
        let Some(last) = buffers.len().checked_sub(1) else {
            continue;
        };
        for (ch, out) in outputs.iter_mut().enumerate() {
            let src = &buffers[ch.min(last)];
            for (o, i) in out.iter_mut().zip(src.iter()) {
                *o += *i;
            }
        }
    }
}

impl AudioNode for Mixer {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        sum_inputs(inputs, outputs);
    }

    fn num_inputs(&self) -> usize {
        usize::MAX
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}
