//! Lock-free parameter cells

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

/// An `f32` control shared between the control thread and a node.
///
/// Clones point at the same cell. The control side stores a target and the
/// node loads it once per block, so any number of writes between two blocks
/// collapse to the last one. Nothing is queued, so nothing can be dropped.
#[derive(Clone, Debug)]
pub struct Param(Arc<AtomicU32>);

impl Param {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for Param {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_cell() {
        let control = Param::new(0.25);
        let node = control.clone();
        control.set(-3.5);
        assert_eq!(node.get(), -3.5);
    }

    #[test]
    fn last_write_wins() {
        let param = Param::default();
        for i in 0..1_000 {
            param.set(i as f32);
        }
        param.set(0.0);
        assert_eq!(param.get(), 0.0);
    }
}
