mod biquad;
mod convolver;
mod delay;
mod gain;
mod mixer;

pub use biquad::{clamp_frequency, Biquad, FilterKind, MAX_FREQUENCY_RATIO, MIN_FREQUENCY};
pub use convolver::{Convolver, ConvolverMessage, PreparedImpulse, MAX_IMPULSE_SECS};
pub use delay::{Delay, DelayChannel};
pub use gain::Gain;
pub use mixer::Mixer;

pub(crate) use mixer::sum_inputs;
