//! Metering tap

use alloc::sync::Arc;

use dasp_graph::{Buffer, Input};
use parking_lot::Mutex;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::node::{AudioNode, ProcessContext};

/// Circular window shared by the tap and its reader. `write` is the oldest
/// sample, so new samples always overwrite the oldest.
struct SharedWindow {
    samples: Vec<f32>,
    write: usize,
    /// Samples written since the reader last looked
    fresh: usize,
}

/// Taps a signal for metering. Produces no audio.
///
/// The node downmixes its input to mono and writes it into a window shared
/// with an [`AnalyserReader`]. The audio side only ever `try_lock`s: a block
/// that lands while the reader is copying is skipped for metering, never
/// waited on.
pub struct Analyser {
    shared: Arc<Mutex<SharedWindow>>,
    mix: [Buffer; 2],
}

impl Analyser {
    /// Create a tap and the reader that consumes it. `window` is the number of
    /// most recent samples the reader analyses.
    pub fn new(window: usize) -> (Self, AnalyserReader) {
        let window = window.max(Buffer::LEN);
        let shared = Arc::new(Mutex::new(SharedWindow {
            samples: vec![0.0; window],
            write: 0,
            fresh: 0,
        }));
        (
            Self {
                shared: shared.clone(),
                mix: [Buffer::SILENT, Buffer::SILENT],
            },
            AnalyserReader::new(shared, window),
        )
    }
}

fn record(shared: &Mutex<SharedWindow>, samples: impl Iterator<Item = f32>) {
    let Some(mut guard) = shared.try_lock() else {
        return;
    };
    let window = &mut *guard;
    let len = window.samples.len();
    for sample in samples {
        window.samples[window.write] = sample;
        window.write = (window.write + 1) % len;
        window.fresh += 1;
    }
}

impl AudioNode for Analyser {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        crate::nodes::effect::sum_inputs(inputs, &mut self.mix);

        let [left, right] = &self.mix;
        record(&self.shared, left.iter().zip(right.iter()).map(|(l, r)| 0.5 * (l + r)));
    }

    fn num_inputs(&self) -> usize { 1 }

    fn num_outputs(&self) -> usize { 0 }
}

/// Control-side view of an [`Analyser`]: level meters and a magnitude spectrum
/// over the most recent window of samples.
pub struct AnalyserReader {
    shared: Arc<Mutex<SharedWindow>>,
    /// Snapshot of the shared window, `write` is the oldest sample
    window: Vec<f32>,
    write: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    fft_input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl AnalyserReader {
    fn new(shared: Arc<Mutex<SharedWindow>>, window: usize) -> Self {
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(window);
        Self {
            shared,
            window: vec![0.0; window],
            write: 0,
            fft_input: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            magnitudes: vec![0.0; window / 2 + 1],
            fft,
        }
    }

    /// Take a snapshot of the most recent window.
    ///
    /// Returns the number of samples the tap produced since the last call,
    /// which can exceed the window when the reader fell behind.
    pub fn update(&mut self) -> usize {
        let mut shared = self.shared.lock();
        self.window.copy_from_slice(&shared.samples);
        self.write = shared.write;
        core::mem::take(&mut shared.fresh)
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Root mean square of the window
    pub fn rms(&self) -> f32 {
        let sum: f32 = self.window.iter().map(|s| s * s).sum();
        (sum / self.window.len() as f32).sqrt()
    }

    /// Largest absolute sample in the window
    pub fn peak(&self) -> f32 {
        self.window.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Hann-windowed magnitude spectrum of the window, `window_len / 2 + 1`
    /// bins from DC to Nyquist, normalized so a full-scale sine reads ~1.0.
    pub fn frequency_data(&mut self) -> &[f32] {
        let len = self.window.len();
        let (newest, oldest) = self.window.split_at(self.write);
        let ordered = oldest.iter().chain(newest.iter());

        let denom = (len.max(2) - 1) as f32;
        for (i, (slot, sample)) in self.fft_input.iter_mut().zip(ordered).enumerate() {
            let hann = 0.5 - 0.5 * (2.0 * core::f32::consts::PI * i as f32 / denom).cos();
            *slot = sample * hann;
        }

        // Buffers come from the plan, so lengths always match
        let _ = self.fft.process_with_scratch(&mut self.fft_input, &mut self.spectrum, &mut self.scratch);

        // Hann has a coherent gain of 0.5
        let scale = 4.0 / len as f32;
        for (mag, bin) in self.magnitudes.iter_mut().zip(self.spectrum.iter()) {
            *mag = bin.norm() * scale;
        }
        &self.magnitudes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(value: f32) -> impl Iterator<Item = f32> {
        core::iter::repeat(value).take(Buffer::LEN)
    }

    #[test]
    fn reader_tracks_the_most_recent_window() {
        let (tap, mut reader) = Analyser::new(128);
        for value in [1.0, 1.0, 0.25, 0.25] {
            record(&tap.shared, block(value));
        }
        assert_eq!(reader.update(), 256);
        assert!((reader.peak() - 0.25).abs() < 1e-6);
        assert!((reader.rms() - 0.25).abs() < 1e-6);
        assert_eq!(reader.update(), 0);
    }

    #[test]
    fn a_stalled_reader_still_sees_the_newest_audio() {
        let (tap, mut reader) = Analyser::new(64);
        for _ in 0..100 {
            record(&tap.shared, block(0.8));
        }
        record(&tap.shared, block(0.0));

        assert_eq!(reader.update(), 101 * Buffer::LEN);
        assert_eq!(reader.peak(), 0.0);
    }

    #[test]
    fn unconnected_tap_meters_silence() {
        let ctx = ProcessContext { sample_rate: 16_000, buffer_size: Buffer::LEN };
        let (mut tap, mut reader) = Analyser::new(64);
        record(&tap.shared, block(0.5));
        tap.process(&ctx, core::iter::empty(), &[], &mut []);
        reader.update();
        assert_eq!(reader.rms(), 0.0);
    }

    #[test]
    fn sine_peaks_in_its_bin() {
        let (tap, mut reader) = Analyser::new(1024);
        // Bin 32 of a 1024-point transform
        record(&tap.shared, (0..1024).map(|i| (2.0 * core::f32::consts::PI * 32.0 * i as f32 / 1024.0).sin()));
        reader.update();
        let bins = reader.frequency_data();
        let loudest = bins
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, m)| if *m > best.1 { (i, *m) } else { best });
        assert_eq!(loudest.0, 32);
        assert!((loudest.1 - 1.0).abs() < 0.05);
    }
}
