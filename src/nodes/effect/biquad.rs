//! Second-order lowpass / highpass filter

use core::f64::consts::PI;

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};
use crate::param::Param;

/// Lowest cutoff a filter accepts, in Hz
pub const MIN_FREQUENCY: f32 = 10.0;

/// Highest cutoff as a fraction of the sample rate (just under Nyquist)
pub const MAX_FREQUENCY_RATIO: f32 = 0.45;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    Lowpass,
    Highpass,
}

/// Clamp a cutoff to `[MIN_FREQUENCY, MAX_FREQUENCY_RATIO * sample_rate]`.
pub fn clamp_frequency(freq: f32, sample_rate: u32) -> f32 {
    let max = (sample_rate as f32 * MAX_FREQUENCY_RATIO).max(MIN_FREQUENCY);
    if freq.is_nan() {
        return max;
    }
    freq.clamp(MIN_FREQUENCY, max)
}

fn clamp_q(q: f32) -> f32 {
    if q.is_nan() {
        return core::f32::consts::FRAC_1_SQRT_2;
    }
    q.clamp(0.1, 20.0)
}

/// Normalized RBJ cookbook coefficients
#[derive(Clone, Copy, Debug, PartialEq)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coefficients {
    fn design(kind: FilterKind, freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * q);

        let (b0, b1, b2) = match kind {
            FilterKind::Lowpass => ((1.0 - cos_w) / 2.0, 1.0 - cos_w, (1.0 - cos_w) / 2.0),
            FilterKind::Highpass => ((1.0 + cos_w) / 2.0, -(1.0 + cos_w), (1.0 + cos_w) / 2.0),
        };
        let a0 = 1.0 + alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Transposed direct form II state, one per channel
#[derive(Clone, Copy, Debug, Default)]
struct State {
    z1: f64,
    z2: f64,
}

impl State {
    #[inline]
    fn tick(&mut self, c: &Coefficients, x: f64) -> f64 {
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }
}

/// A stereo biquad filter.
///
/// Cutoff and Q are [`Param`] cells, clamped when read. Coefficients are
/// redesigned at the start of a block only when either value moved.
pub struct Biquad {
    kind: FilterKind,
    frequency: Param,
    q: Param,
    sample_rate: u32,
    coeffs: Coefficients,
    /// `(frequency, q)` the coefficients were designed for
    designed: (f32, f32),
    state: [State; 2],
}

impl Biquad {
    pub fn new(kind: FilterKind, frequency: f32, sample_rate: u32) -> Self {
        let frequency = clamp_frequency(frequency, sample_rate);
        let q = core::f32::consts::FRAC_1_SQRT_2;
        Self {
            kind,
            frequency: Param::new(frequency),
            q: Param::new(q),
            sample_rate,
            coeffs: Coefficients::design(kind, frequency as f64, q as f64, sample_rate as f64),
            designed: (frequency, q),
            state: [State::default(); 2],
        }
    }

    pub fn lowpass(frequency: f32, sample_rate: u32) -> Self {
        Self::new(FilterKind::Lowpass, frequency, sample_rate)
    }

    pub fn highpass(frequency: f32, sample_rate: u32) -> Self {
        Self::new(FilterKind::Highpass, frequency, sample_rate)
    }

    pub fn with_q(mut self, q: f32) -> Self {
        self.q.set(q);
        self.update();
        self
    }

    #[inline]
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Cutoff in Hz, clamped to the valid range for the sample rate
    #[inline]
    pub fn frequency(&self) -> f32 {
        clamp_frequency(self.frequency.get(), self.sample_rate)
    }

    #[inline]
    pub fn q(&self) -> f32 {
        clamp_q(self.q.get())
    }

    /// Shared cell holding the cutoff in Hz
    pub fn frequency_param(&self) -> Param {
        self.frequency.clone()
    }

    pub fn q_param(&self) -> Param {
        self.q.clone()
    }

    fn update(&mut self) {
        let target = (self.frequency(), self.q());
        if target != self.designed {
            self.coeffs = Coefficients::design(
                self.kind,
                target.0 as f64,
                target.1 as f64,
                self.sample_rate as f64,
            );
            self.designed = target;
        }
    }
}

impl AudioNode for Biquad {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        self.update();

        super::sum_inputs(inputs, outputs);

        let coeffs = self.coeffs;
        for (out, state) in outputs.iter_mut().zip(self.state.iter_mut()) {
            for sample in out.iter_mut() {
                *sample = state.tick(&coeffs, *sample as f64) as f32;
            }
        }
    }

    fn num_inputs(&self) -> usize { 1 }

    fn num_outputs(&self) -> usize { 2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dc_gain(c: &Coefficients) -> f64 {
        (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2)
    }

    #[test]
    fn frequency_is_clamped() {
        assert_eq!(clamp_frequency(1.0, 48_000), MIN_FREQUENCY);
        assert_eq!(clamp_frequency(30_000.0, 48_000), 21_600.0);
        assert_eq!(clamp_frequency(1_000.0, 48_000), 1_000.0);
        assert_eq!(Biquad::lowpass(90_000.0, 16_000).frequency(), 7_200.0);
    }

    #[test]
    fn lowpass_passes_dc_highpass_blocks_it() {
        let lp = Coefficients::design(FilterKind::Lowpass, 1_000.0, 0.707, 48_000.0);
        let hp = Coefficients::design(FilterKind::Highpass, 1_000.0, 0.707, 48_000.0);
        assert!((dc_gain(&lp) - 1.0).abs() < 1e-9);
        assert!(dc_gain(&hp).abs() < 1e-9);
    }

    #[test]
    fn step_response_settles_to_dc_gain() {
        let c = Coefficients::design(FilterKind::Lowpass, 500.0, 0.707, 8_000.0);
        let mut state = State::default();
        let mut y = 0.0;
        for _ in 0..4_000 {
            y = state.tick(&c, 1.0);
        }
        assert!((y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cutoff_changes_redesign_once_per_block() {
        let ctx = ProcessContext { sample_rate: 16_000, buffer_size: Buffer::LEN };
        let mut filter = Biquad::lowpass(1_000.0, 16_000);
        let cutoff = filter.frequency_param();
        for hz in [2_000.0, 3_000.0, 90_000.0] {
            cutoff.set(hz);
        }
        assert_eq!(filter.frequency(), 7_200.0);

        let mut out = [Buffer::SILENT, Buffer::SILENT];
        filter.process(&ctx, core::iter::empty(), &[], &mut out);
        assert_eq!(filter.designed, (7_200.0, core::f32::consts::FRAC_1_SQRT_2));
        assert_eq!(
            filter.coeffs,
            Coefficients::design(FilterKind::Lowpass, 7_200.0, core::f32::consts::FRAC_1_SQRT_2 as f64, 16_000.0)
        );
    }

    #[test]
    fn nan_q_falls_back_to_butterworth() {
        let filter = Biquad::highpass(200.0, 48_000).with_q(f32::NAN);
        assert_eq!(filter.q(), core::f32::consts::FRAC_1_SQRT_2);
        assert_eq!(Biquad::highpass(200.0, 48_000).with_q(99.0).q(), 20.0);
    }
}
