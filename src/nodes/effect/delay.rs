//! Short delay line with channel selection

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};
use crate::param::Param;

/// Which input channel a [`Delay`] carries.
///
/// A stereo bus is split by giving each side its own `Left` / `Right` delay;
/// each one outputs stereo with only its own side populated, so a summing
/// [`Mixer`](super::Mixer) downstream merges them back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayChannel {
    Left,
    Right,
    Both,
}

impl DelayChannel {
    #[inline]
    fn carries(self, ch: usize) -> bool {
        match self {
            DelayChannel::Left => ch == 0,
            DelayChannel::Right => ch == 1,
            DelayChannel::Both => true,
        }
    }
}

/// A fixed-capacity delay line. Time changes jump (no interpolation), which is
/// fine for the millisecond offsets of a stereo widener.
///
/// The delay time lives in a [`Param`] (seconds) read once per block and
/// clamped to the line's capacity.
pub struct Delay {
    channel: DelayChannel,
    sample_rate: u32,
    lines: [Vec<f32>; 2],
    write_pos: usize,
    time: Param,
}

impl Delay {
    /// `max_secs` sets the capacity; the delay starts at zero (pass-through).
    pub fn new(channel: DelayChannel, sample_rate: u32, max_secs: f32) -> Self {
        // One extra slot so the longest delay still reads before it is overwritten
        let capacity = (max_secs.max(0.0) * sample_rate as f32).ceil() as usize + 1;
        Self {
            channel,
            sample_rate,
            lines: [vec![0.0; capacity], vec![0.0; capacity]],
            write_pos: 0,
            time: Param::new(0.0),
        }
    }

    pub fn with_time(self, secs: f32) -> Self {
        self.time.set(secs);
        self
    }

    #[inline]
    pub fn channel(&self) -> DelayChannel {
        self.channel
    }

    /// Shared cell holding the delay time in seconds
    pub fn time_param(&self) -> Param {
        self.time.clone()
    }

    /// Current delay in frames
    pub fn delay_frames(&self) -> usize {
        // `max` maps NaN to zero
        let frames = (self.time.get().max(0.0) * self.sample_rate as f32).round() as usize;
        frames.min(self.capacity() - 1)
    }

    fn capacity(&self) -> usize {
        self.lines[0].len()
    }
}

impl AudioNode for Delay {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        super::sum_inputs(inputs, outputs);

        let capacity = self.capacity();
        let delay = self.delay_frames();
        let start = self.write_pos;

        for (ch, out) in outputs.iter_mut().enumerate() {
            if ch >= self.lines.len() || !self.channel.carries(ch) {
                out.iter_mut().for_each(|s| *s = 0.0);
                continue;
            }

            let line = &mut self.lines[ch];
            let mut pos = start;
            for sample in out.iter_mut() {
                line[pos] = *sample;
                let read = (pos + capacity - delay) % capacity;
                *sample = line[read];
                pos = (pos + 1) % capacity;
            }
        }

        let frames = outputs.first().map_or(0, |b| b.len());
        self.write_pos = (start + frames) % capacity;
    }

    fn num_inputs(&self) -> usize { 1 }

    fn num_outputs(&self) -> usize { 2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_is_clamped_to_capacity() {
        let delay = Delay::new(DelayChannel::Both, 1000, 0.5).with_time(3.0);
        assert_eq!(delay.delay_frames(), 500);
    }

    #[test]
    fn time_rounds_to_frames() {
        let delay = Delay::new(DelayChannel::Left, 48_000, 1.0).with_time(0.012);
        assert_eq!(delay.delay_frames(), 576);
    }

    #[test]
    fn time_follows_the_shared_cell() {
        let delay = Delay::new(DelayChannel::Both, 1000, 1.0);
        let time = delay.time_param();
        assert_eq!(delay.delay_frames(), 0);
        time.set(0.25);
        assert_eq!(delay.delay_frames(), 250);
        time.set(f32::NAN);
        assert_eq!(delay.delay_frames(), 0);
    }

    #[test]
    fn unconnected_delay_is_silent() {
        let ctx = ProcessContext { sample_rate: 1000, buffer_size: Buffer::LEN };
        let mut delay = Delay::new(DelayChannel::Right, 1000, 0.1).with_time(0.01);
        let mut out = [Buffer::SILENT, Buffer::SILENT];
        out[1].iter_mut().for_each(|s| *s = 0.3);
        delay.process(&ctx, core::iter::empty(), &[], &mut out);
        assert!(out.iter().all(|b| b.iter().all(|s| *s == 0.0)));
    }
}
