//! Convolution reverb
//!
//! Uniformly partitioned overlap-save convolution: the impulse response is cut
//! into block-sized partitions, each transformed once up front, and every block
//! of input is multiplied against all of them through a frequency-domain delay
//! line. Latency is zero; cost grows linearly with impulse length.

use alloc::boxed::Box;
use alloc::sync::Arc;

use dasp_graph::{Buffer, Input};
use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use tracing::debug;

use crate::buffer::AudioBuffer;
use crate::node::{AudioNode, ProcessContext};

/// Partition length, one graph block
const BLOCK: usize = Buffer::LEN;
/// Transform length: history block plus current block
const FFT_LEN: usize = BLOCK * 2;
const BINS: usize = FFT_LEN / 2 + 1;

/// Impulses are truncated to this length
pub const MAX_IMPULSE_SECS: f32 = 8.0;

type Spectrum = Vec<Complex<f32>>;

/// Per-channel running state: the last two input blocks and the spectra of
/// past input blocks.
struct Lane {
    history: [f32; FFT_LEN],
    delay_line: Vec<Spectrum>,
    head: usize,
}

impl Lane {
    fn new(partitions: usize) -> Self {
        Self {
            history: [0.0; FFT_LEN],
            delay_line: vec![vec![Complex::default(); BINS]; partitions.max(1)],
            head: 0,
        }
    }
}

/// An impulse response transformed for a given engine rate, ready to hand to a
/// [`Convolver`].
///
/// Everything the convolver needs is allocated here, on the control thread, so
/// swapping impulses on the audio thread is a pointer move.
pub struct PreparedImpulse {
    /// `[ir channel][partition]` half spectra
    filters: Vec<Vec<Spectrum>>,
    lanes: [Lane; 2],
    frames: usize,
}

impl PreparedImpulse {
    /// Resample `impulse` to `sample_rate` and transform it.
    ///
    /// A mono impulse is applied to both channels; extra channels past the
    /// second are ignored.
    pub fn prepare(impulse: &AudioBuffer, sample_rate: u32) -> Self {
        let max_frames = (MAX_IMPULSE_SECS * sample_rate as f32) as usize;
        let channels = impulse.channel_count().min(2);

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(FFT_LEN);
        let mut padded = vec![0.0f32; FFT_LEN];

        let mut frames = 0;
        let filters: Vec<Vec<Spectrum>> = (0..channels)
            .map(|ch| {
                let mut samples = resample_linear(impulse.channel(ch), impulse.sample_rate(), sample_rate);
                samples.truncate(max_frames);
                frames = frames.max(samples.len());

                samples
                    .chunks(BLOCK)
                    .map(|segment| {
                        padded.iter_mut().for_each(|s| *s = 0.0);
                        padded[..segment.len()].copy_from_slice(segment);
                        let mut spectrum = vec![Complex::default(); BINS];
                        // Lengths come from the same plan, so this can't fail
                        let _ = forward.process(&mut padded, &mut spectrum);
                        spectrum
                    })
                    .collect()
            })
            .collect();

        let partitions = filters.iter().map(Vec::len).max().unwrap_or(0);
        debug!(frames, partitions, sample_rate, "impulse prepared");

        Self {
            filters,
            lanes: [Lane::new(partitions), Lane::new(partitions)],
            frames,
        }
    }

    /// Length in frames at the engine rate
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn partitions(&self) -> usize {
        self.lanes[0].delay_line.len()
    }
}

impl core::fmt::Debug for PreparedImpulse {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PreparedImpulse")
            .field("frames", &self.frames)
            .field("partitions", &self.partitions())
            .finish()
    }
}

#[derive(Debug)]
pub enum ConvolverMessage {
    SetImpulse(Box<PreparedImpulse>),
    /// Drop the impulse; the convolver goes silent
    Clear,
}

/// A stereo convolver. Silent until an impulse is set.
pub struct Convolver {
    impulse: Option<Box<PreparedImpulse>>,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    time: Vec<f32>,
    accumulator: Spectrum,
    forward_scratch: Spectrum,
    inverse_scratch: Spectrum,
}

impl Convolver {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(FFT_LEN);
        let inverse = planner.plan_fft_inverse(FFT_LEN);
        Self {
            forward_scratch: forward.make_scratch_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
            time: forward.make_input_vec(),
            accumulator: forward.make_output_vec(),
            forward,
            inverse,
            impulse: None,
        }
    }

    pub fn with_impulse(mut self, impulse: PreparedImpulse) -> Self {
        self.impulse = Some(Box::new(impulse));
        self
    }

    #[inline]
    pub fn has_impulse(&self) -> bool {
        self.impulse.is_some()
    }

    /// Convolve one block in place, channel by channel.
    fn convolve(&mut self, blocks: &mut [Buffer]) {
        let Some(impulse) = self.impulse.as_deref_mut() else {
            for block in blocks.iter_mut() {
                block.iter_mut().for_each(|s| *s = 0.0);
            }
            return;
        };
        let scale = 1.0 / FFT_LEN as f32;

        for (ch, block) in blocks.iter_mut().enumerate().take(2) {
            let lane = &mut impulse.lanes[ch];
            let filter = &impulse.filters[ch.min(impulse.filters.len() - 1)];
            let partitions = lane.delay_line.len();

            lane.history.copy_within(BLOCK.., 0);
            lane.history[BLOCK..].copy_from_slice(&block[..]);
            self.time.copy_from_slice(&lane.history);
            let _ = self.forward.process_with_scratch(
                &mut self.time,
                &mut lane.delay_line[lane.head],
                &mut self.forward_scratch,
            );

            self.accumulator.iter_mut().for_each(|c| *c = Complex::default());
            for (p, partition) in filter.iter().enumerate() {
                let past = &lane.delay_line[(lane.head + partitions - p) % partitions];
                for ((acc, x), h) in self.accumulator.iter_mut().zip(past).zip(partition) {
                    *acc += x * h;
                }
            }
            // The inverse real transform rejects non-real DC and Nyquist bins
            self.accumulator[0].im = 0.0;
            self.accumulator[BINS - 1].im = 0.0;

            let _ = self.inverse.process_with_scratch(
                &mut self.accumulator,
                &mut self.time,
                &mut self.inverse_scratch,
            );
            for (out, y) in block.iter_mut().zip(&self.time[BLOCK..]) {
                *out = y * scale;
            }

            lane.head = (lane.head + 1) % partitions;
        }

        for block in blocks.iter_mut().skip(2) {
            block.iter_mut().for_each(|s| *s = 0.0);
        }
    }
}

impl Default for Convolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for Convolver {
    type Message = ConvolverMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = ConvolverMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                ConvolverMessage::SetImpulse(impulse) => self.impulse = Some(impulse),
                ConvolverMessage::Clear => self.impulse = None,
            }
        }

        super::sum_inputs(inputs, outputs);
        self.convolve(outputs);
    }

    fn num_inputs(&self) -> usize { 1 }

    fn num_outputs(&self) -> usize { 2 }
}

/// Linear-interpolating rate conversion, good enough for reverb tails.
fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let step = from as f64 / to as f64;
    let len = ((samples.len() as f64) / step).floor().max(1.0) as usize;
    let last = samples.len() - 1;
    (0..len)
        .map(|i| {
            let pos = i as f64 * step;
            let index = (pos as usize).min(last);
            let next = (index + 1).min(last);
            let t = (pos - index as f64) as f32;
            samples[index] + t * (samples[next] - samples[index])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn impulse(taps: &[(usize, f32)], len: usize, sample_rate: u32) -> AudioBuffer {
        let mut samples = vec![0.0; len];
        for &(i, v) in taps {
            samples[i] = v;
        }
        AudioBuffer::new(vec![samples], sample_rate)
    }

    fn block(f: impl Fn(usize) -> f32) -> Buffer {
        let mut b = Buffer::SILENT;
        for (i, s) in b.iter_mut().enumerate() {
            *s = f(i);
        }
        b
    }

    #[test]
    fn silent_without_impulse() {
        let mut conv = Convolver::new();
        let mut blocks = [block(|_| 1.0), block(|_| 1.0)];
        conv.convolve(&mut blocks);
        assert!(blocks.iter().all(|b| b.iter().all(|s| *s == 0.0)));
    }

    #[test]
    fn unit_impulse_is_identity() {
        let prepared = PreparedImpulse::prepare(&impulse(&[(0, 1.0)], 1, 8000), 8000);
        let mut conv = Convolver::new().with_impulse(prepared);

        let mut blocks = [block(|i| (i as f32 * 0.1).sin()), block(|i| i as f32 / 64.0)];
        let expected = blocks.clone();
        conv.convolve(&mut blocks);

        for (out, want) in blocks.iter().zip(expected.iter()) {
            for (o, w) in out.iter().zip(want.iter()) {
                assert_abs_diff_eq!(*o, *w, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn delayed_tap_crosses_partitions() {
        let prepared = PreparedImpulse::prepare(&impulse(&[(100, 0.5)], 200, 8000), 8000);
        assert_eq!(prepared.partitions(), 4);
        let mut conv = Convolver::new().with_impulse(prepared);

        let mut first = [block(|i| if i == 0 { 1.0 } else { 0.0 }), Buffer::SILENT];
        conv.convolve(&mut first);
        assert!(first[0].iter().all(|s| s.abs() < 1e-4));

        let mut second = [Buffer::SILENT, Buffer::SILENT];
        conv.convolve(&mut second);
        assert_abs_diff_eq!(second[0][36], 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(second[0][35], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn impulse_is_resampled_to_engine_rate() {
        let prepared = PreparedImpulse::prepare(&impulse(&[], 4000, 8000), 16_000);
        assert_eq!(prepared.frames(), 8000);
    }

    #[test]
    fn clear_silences() {
        let prepared = PreparedImpulse::prepare(&impulse(&[(0, 1.0)], 1, 8000), 8000);
        let mut conv = Convolver::new().with_impulse(prepared);
        let ctx = ProcessContext { sample_rate: 8000, buffer_size: BLOCK };
        let mut out = [Buffer::SILENT, Buffer::SILENT];
        conv.process(&ctx, core::iter::once(ConvolverMessage::Clear), &[], &mut out);
        assert!(!conv.has_impulse());
    }
}
