//! Built-in audio nodes.
//!
//! ## Sources ([`source`])
//! - [`BufferSource`] - plays a decoded buffer once from an offset
//!
//! ## Effects ([`effect`])
//! - [`Gain`] - summing fader with smoothing and balance
//! - [`Mixer`] - unity-gain sum of every input
//! - [`Delay`] - short delay line on one or both channels
//! - [`Biquad`] - lowpass / highpass filter
//! - [`Convolver`] - partitioned FFT convolution reverb
//!
//! ## Sinks ([`sink`])
//! - [`Analyser`] - level and spectrum tap, read through [`AnalyserReader`]
//! - [`RtrbSink`] - interleaved capture into a ring buffer
//! - [`CpalSink`] - system audio device (requires `cpal_sink`)
//!
//! Continuous controls are [`Param`](crate::Param) cells. Only the
//! [`Convolver`] takes messages; every other node uses `()`.

pub mod effect;
pub mod sink;
pub mod source;

pub use effect::{Biquad, Convolver, ConvolverMessage, Delay, DelayChannel, FilterKind, Gain, Mixer, PreparedImpulse};
pub use sink::{Analyser, AnalyserReader, RtrbSink};
pub use source::{BufferSource, EndSignal};

#[cfg(feature = "cpal_sink")]
pub use sink::CpalSink;
