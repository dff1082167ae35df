//! Single-use buffer source

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use dasp_graph::{Buffer, Input};

use crate::buffer::AudioBuffer;
use crate::node::{AudioNode, ProcessContext};

/// Raised by a [`BufferSource`] once it has played past the end of its buffer.
///
/// The control thread polls it; the source never clears it.
#[derive(Clone, Debug, Default)]
pub struct EndSignal(Arc<AtomicBool>);

impl EndSignal {
    #[inline]
    pub fn is_ended(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Plays a decoded buffer once, from a start offset to the end.
///
/// Sources are single-use: there is no play/seek message. Restarting means
/// building a new source and removing the old one from the graph.
///
/// The buffer is read at its own sample rate and linearly interpolated to the
/// graph's rate, so offsets are in seconds regardless of either rate.
pub struct BufferSource {
    buffer: Arc<AudioBuffer>,
    /// Fractional read position, in buffer frames
    position: f64,
    ended: EndSignal,
}

impl BufferSource {
    /// Create a source that starts `offset_secs` into `buffer`
    pub fn new(buffer: Arc<AudioBuffer>, offset_secs: f64) -> Self {
        let position = offset_secs.max(0.0) * buffer.sample_rate() as f64;
        Self {
            buffer,
            position,
            ended: EndSignal::default(),
        }
    }

    /// A signal that flips once playback reaches the end of the buffer
    pub fn end_signal(&self) -> EndSignal {
        self.ended.clone()
    }

    #[inline]
    pub fn is_ended(&self) -> bool {
        self.ended.is_ended()
    }
}

impl AudioNode for BufferSource {
    type Message = ();

    fn process(
        &mut self,
        ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        let frames = self.buffer.frames();

        // Fast path: finished - output silence
        if self.ended.is_ended() || self.position >= frames as f64 {
            for buffer in outputs.iter_mut() {
                buffer.iter_mut().for_each(|s| *s = 0.0);
            }
            self.ended.raise();
            return;
        }

        let step = self.buffer.sample_rate() as f64 / ctx.sample_rate as f64;
        let buffer_len = outputs.first().map_or(0, |b| b.len());

        for i in 0..buffer_len {
            if self.position >= frames as f64 {
                // Fill remaining with silence
                for buffer in outputs.iter_mut() {
                    for sample in buffer[i..].iter_mut() {
                        *sample = 0.0;
                    }
                }
                self.ended.raise();
                return;
            }

            let index = self.position as usize;
            let t = (self.position - index as f64) as f32;
            let next = (index + 1).min(frames - 1);

            // Map output channel to source channel (mono feeds both sides)
            for (ch, buffer) in outputs.iter_mut().enumerate() {
                let src = self.buffer.channel(ch);
                let a = src[index];
                let b = src[next];
                buffer[i] = a + t * (b - a);
            }

            self.position += step;
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 0 }

    #[inline]
    fn num_outputs(&self) -> usize { 2 }
}
