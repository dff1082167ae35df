//! Device output through cpal

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, SupportedStreamConfig};
use dasp_graph::{Buffer, Input};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{error, info, warn};

use crate::node::{AudioNode, ProcessContext};

/// Feeds the system audio device.
///
/// The cpal stream lives on its own thread and drains a ring buffer this node
/// fills. The node never blocks: if the ring is full the block is skipped, and
/// if the device runs dry it plays silence and flags an underrun.
pub struct CpalSink {
    buffer: Producer<f32>,
    channels: usize,
    mix: [Buffer; 2],
    samples_consumed: Arc<AtomicUsize>,
    had_underrun: Arc<AtomicBool>,
}

impl CpalSink {
    pub fn new(device: &cpal::Device, config: &SupportedStreamConfig) -> Self {
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config = config.config();
        let sample_rate = stream_config.sample_rate.0;

        // ~100ms of headroom for scheduling jitter on the control thread
        let buffer_samples = ((sample_rate as f32 * 0.1) as usize) * channels;
        let (producer, consumer) = RingBuffer::<f32>::new(buffer_samples.next_power_of_two().max(8192));

        let samples_consumed = Arc::new(AtomicUsize::new(0));
        let had_underrun = Arc::new(AtomicBool::new(false));

        let device = device.clone();
        let consumed = samples_consumed.clone();
        let underrun = had_underrun.clone();
        std::thread::spawn(move || {
            let stream = match build_stream(&device, sample_format, &stream_config, consumer, consumed, underrun) {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "failed to build output stream");
                    return;
                }
            };
            if let Err(e) = stream.play() {
                error!(error = %e, "failed to start output stream");
                return;
            }
            info!(sample_rate, channels = stream_config.channels, "output stream running");

            // The stream stops when dropped, so this thread holds it forever
            loop {
                std::thread::park();
            }
        });

        Self {
            buffer: producer,
            channels,
            mix: [Buffer::SILENT, Buffer::SILENT],
            samples_consumed,
            had_underrun,
        }
    }

    /// Samples the device has pulled so far
    #[inline]
    pub fn samples_consumed(&self) -> usize {
        self.samples_consumed.load(Ordering::Relaxed)
    }

    /// Check and clear the underrun flag
    pub fn check_underrun(&self) -> bool {
        self.had_underrun.swap(false, Ordering::Relaxed)
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    config: &cpal::StreamConfig,
    consumer: Consumer<f32>,
    consumed: Arc<AtomicUsize>,
    underrun: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    match sample_format {
        SampleFormat::F32 => stream_of::<f32>(device, config, consumer, consumed, underrun, |s| s),
        SampleFormat::I16 => stream_of::<i16>(device, config, consumer, consumed, underrun, |s| {
            (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
        }),
        SampleFormat::U16 => stream_of::<u16>(device, config, consumer, consumed, underrun, |s| {
            ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
        }),
        other => {
            warn!(format = ?other, "unsupported sample format");
            Err(cpal::BuildStreamError::StreamConfigNotSupported)
        }
    }
}

fn stream_of<T: SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: Consumer<f32>,
    consumed: Arc<AtomicUsize>,
    underrun: Arc<AtomicBool>,
    convert: fn(f32) -> T,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let mut starved = false;
            for sample in data.iter_mut() {
                *sample = convert(consumer.pop().unwrap_or_else(|_| {
                    starved = true;
                    0.0
                }));
            }
            if starved {
                underrun.store(true, Ordering::Relaxed);
            }
            consumed.fetch_add(data.len(), Ordering::Relaxed);
        },
        |err| error!(error = %err, "output stream error"),
        None,
    )
}

impl AudioNode for CpalSink {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        crate::nodes::effect::sum_inputs(inputs, &mut self.mix);

        let needed = Buffer::LEN * self.channels;
        let Ok(chunk) = self.buffer.write_chunk_uninit(needed) else {
            return;
        };

        // Mono devices get a downmix, extra channels repeat the right side
        chunk.fill_from_iter(super::interleave(&self.mix, self.channels));
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 0 }
}
