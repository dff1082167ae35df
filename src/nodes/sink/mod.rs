mod analyser;
mod rtrb_sink;

#[cfg(feature = "cpal_sink")]
mod cpal_sink;

pub use analyser::{Analyser, AnalyserReader};
pub use rtrb_sink::RtrbSink;

#[cfg(feature = "cpal_sink")]
pub use cpal_sink::CpalSink;

use dasp_graph::Buffer;

/// Interleave one block of a stereo mix into `channels` outputs.
///
/// A mono output gets `0.5 * (L + R)`. Outputs past the second repeat the
/// right channel.
pub(crate) fn interleave(mix: &[Buffer; 2], channels: usize) -> impl Iterator<Item = f32> + '_ {
    let [left, right] = mix;
    (0..Buffer::LEN).flat_map(move |i| {
        (0..channels).map(move |ch| match (channels, ch) {
            (1, _) => 0.5 * (left[i] + right[i]),
            (_, 0) => left[i],
            _ => right[i],
        })
    })
}
