//! Decoded audio buffers

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{LoadError, LoadResult};

/// Decoded audio held as planar f32 at its native sample rate.
///
/// Buffers are shared as `Arc<AudioBuffer>`: a playing source keeps its own
/// reference, so evicting the cache entry never cuts playback short.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer from planar channels.
    ///
    /// Channels are truncated to the shortest one; an empty list becomes one
    /// silent, empty channel.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        if channels.is_empty() {
            channels.push(Vec::new());
        }
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for ch in channels.iter_mut() {
            ch.truncate(frames);
        }
        Self {
            channels,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Create a buffer from interleaved samples
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let planar = (0..channels)
            .map(|ch| samples.iter().skip(ch).step_by(channels).copied().collect())
            .collect();
        Self::new(planar, sample_rate)
    }

    /// A buffer of silence, mostly useful for presets and tests
    pub fn silent(channels: usize, frames: usize, sample_rate: u32) -> Self {
        Self::new(vec![vec![0.0; frames]; channels.max(1)], sample_rate)
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel
    #[inline]
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index % self.channels.len()]
    }

    /// Decode a complete audio file held in memory.
    ///
    /// `url` only serves as a format hint (its extension) and for error messages.
    pub fn decode(url: &str, bytes: Vec<u8>) -> LoadResult<Self> {
        let fail = |reason: String| LoadError::Decode {
            url: url.to_owned(),
            reason,
        };

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension_of(url) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| fail(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| fail("no audio track found".into()))?;
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| fail(e.to_string()))?;

        let mut channels: Vec<Vec<f32>> = Vec::new();
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut buf_frames = 0u64;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(fail(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(url, error = e, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(fail(e.to_string())),
            };

            let spec = *decoded.spec();
            let count = spec.channels.count().max(1);
            sample_rate = spec.rate;
            if channels.len() != count {
                channels.resize_with(count, Vec::new);
            }

            // Packets may grow; the sample buffer has to fit the largest one
            if sample_buf.is_none() || decoded.capacity() as u64 > buf_frames {
                buf_frames = decoded.capacity() as u64;
                sample_buf = Some(SampleBuffer::new(buf_frames, spec));
            }

            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                for (i, sample) in buf.samples().iter().enumerate() {
                    channels[i % count].push(*sample);
                }
            }
        }

        if channels.is_empty() || channels[0].is_empty() {
            return Err(fail("no audio frames decoded".into()));
        }
        if sample_rate == 0 {
            return Err(fail("unknown sample rate".into()));
        }

        let buffer = Self::new(channels, sample_rate);
        debug!(
            url,
            channels = buffer.channel_count(),
            sample_rate,
            secs = buffer.duration_secs(),
            "decoded"
        );
        Ok(buffer)
    }
}

fn extension_of(url: &str) -> Option<&str> {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty()).then_some(ext)
}
