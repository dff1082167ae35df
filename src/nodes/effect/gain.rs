//! Gain/volume control effect

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};
use crate::param::Param;

/// A gain (volume) control that sums its inputs and scales them.
///
/// Every connected input is mixed in (mono inputs feed both channels), so the
/// same node works as a track fader and as a bus collecting many tracks.
///
/// Gain and pan are [`Param`] cells: grab them with
/// [`gain_param`](Self::gain_param) / [`pan_param`](Self::pan_param) before
/// adding the node, then set them from the control thread.
pub struct Gain {
    gain: Param,
    /// Smoothing to prevent clicks on rapid gain changes
    smoothed_gain: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
    /// Stereo balance, -1.0 (left) to 1.0 (right)
    pan: Param,
}

impl Gain {
    /// Create a new gain node with the specified gain value
    pub fn new(gain: f32) -> Self {
        Self {
            gain: Param::new(gain),
            smoothed_gain: gain,
            smooth_coeff: 0.995, // ~4ms at 48kHz
            pan: Param::new(0.0),
        }
    }

    /// Set the smoothing time in milliseconds
    pub fn with_smoothing_ms(mut self, ms: f32, sample_rate: u32) -> Self {
        // Time constant: after `ms` milliseconds, we've reached ~63% of target
        let samples = (ms / 1000.0) * sample_rate as f32;
        self.smooth_coeff = if samples > 0.0 { (-1.0 / samples).exp() } else { 0.0 };
        self
    }

    /// Start at a stereo balance position
    pub fn with_pan(self, pan: f32) -> Self {
        self.pan.set(pan.clamp(-1.0, 1.0));
        self
    }

    /// Target gain, as last set
    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    #[inline]
    pub fn pan(&self) -> f32 {
        self.pan.get()
    }

    /// Shared cell holding the target gain (1.0 = unity, 0.0 = silence)
    pub fn gain_param(&self) -> Param {
        self.gain.clone()
    }

    /// Shared cell holding the balance. Values outside `[-1, 1]` are clamped
    /// when read.
    pub fn pan_param(&self) -> Param {
        self.pan.clone()
    }

    /// Per-channel balance law: the far side fades out on a quarter cosine,
    /// the near side stays at unity, so center is transparent.
    #[inline]
    fn pan_gain(pan: f32, ch: usize) -> f32 {
        let pan = pan.clamp(-1.0, 1.0);
        match ch {
            0 if pan > 0.0 => (pan * core::f32::consts::FRAC_PI_2).cos(),
            1 if pan < 0.0 => (-pan * core::f32::consts::FRAC_PI_2).cos(),
            _ => 1.0,
        }
    }
}

impl AudioNode for Gain {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        // Latest targets, read once so every channel sees the same values
        let target_gain = self.gain.get();
        let pan = self.pan.get();

        super::sum_inputs(inputs, outputs);

        let smooth_coeff = self.smooth_coeff;
        let mut current_gain = self.smoothed_gain;

        // Process each output channel
        for (ch, out_buffer) in outputs.iter_mut().enumerate() {
            // Reset smoothed gain for each channel (they should track together)
            let mut gain = self.smoothed_gain;
            let pan_gain = Self::pan_gain(pan, ch);

            for out_sample in out_buffer.iter_mut() {
                // Apply smoothing: gain moves toward target
                gain = target_gain + smooth_coeff * (gain - target_gain);
                *out_sample *= gain * pan_gain;
            }

            // Only update the stored value once (from first channel)
            if ch == 0 {
                current_gain = gain;
            }
        }

        self.smoothed_gain = current_gain;
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 2 } // Stereo pass-through by default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_inputs_means_silence() {
        let ctx = ProcessContext { sample_rate: 48_000, buffer_size: Buffer::LEN };
        let mut out = [Buffer::SILENT, Buffer::SILENT];
        out[0].iter_mut().for_each(|s| *s = 1.0);
        let mut gain = Gain::new(1.0);
        gain.process(&ctx, core::iter::empty(), &[], &mut out);
        assert!(out[0].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn center_pan_is_transparent() {
        let gain = Gain::new(1.0);
        assert_eq!(Gain::pan_gain(gain.pan(), 0), 1.0);
        assert_eq!(Gain::pan_gain(gain.pan(), 1), 1.0);
    }

    #[test]
    fn hard_pan_silences_far_side() {
        let left = Gain::new(1.0).with_pan(-1.0);
        assert_eq!(Gain::pan_gain(left.pan(), 0), 1.0);
        assert!(Gain::pan_gain(left.pan(), 1).abs() < 1e-6);

        let right = Gain::new(1.0).with_pan(1.0);
        assert!(Gain::pan_gain(right.pan(), 0).abs() < 1e-6);
        assert_eq!(Gain::pan_gain(right.pan(), 1), 1.0);

        // Out of range cells read as hard pans
        assert_eq!(Gain::pan_gain(7.0, 1), 1.0);
        assert!(Gain::pan_gain(7.0, 0).abs() < 1e-6);
    }

    #[test]
    fn burst_of_updates_lands_on_the_last_one() {
        let ctx = ProcessContext { sample_rate: 48_000, buffer_size: Buffer::LEN };
        let mut gain = Gain::new(1.0).with_smoothing_ms(0.0, 48_000);
        let volume = gain.gain_param();
        for _ in 0..1_000 {
            volume.set(0.9);
        }
        volume.set(0.0);

        let mut out = [Buffer::SILENT, Buffer::SILENT];
        gain.process(&ctx, core::iter::empty(), &[], &mut out);
        assert_eq!(gain.smoothed_gain, 0.0);
        assert_eq!(gain.gain(), 0.0);
    }

    #[test]
    fn smoothing_converges_on_the_target() {
        let ctx = ProcessContext { sample_rate: 16_000, buffer_size: Buffer::LEN };
        let mut gain = Gain::new(1.0).with_smoothing_ms(5.0, 16_000);
        gain.gain_param().set(0.0);

        let mut out = [Buffer::SILENT, Buffer::SILENT];
        gain.process(&ctx, core::iter::empty(), &[], &mut out);
        assert!(gain.smoothed_gain > 0.0 && gain.smoothed_gain < 1.0);

        for _ in 0..40 {
            gain.process(&ctx, core::iter::empty(), &[], &mut out);
        }
        assert!(gain.smoothed_gain < 1e-6);
    }
}
