//! Lock-free `f64` cell for cross-task scalars.

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` stored as its bit pattern in an `AtomicU64`.
///
/// Used for the latest oracle price and the working balance, which are read
/// on the scan hot path and written from other tasks.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    /// Creates a new cell holding `value`.
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    /// Loads the current value.
    #[must_use]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Stores a new value.
    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Applies `f` atomically (CAS loop) and returns the new value.
    pub fn update(&self, mut f: impl FnMut(f64) -> f64) -> f64 {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let next = f(f64::from_bits(current)).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return f64::from_bits(next),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_values() {
        let cell = AtomicF64::new(108_500.25);
        assert!((cell.load() - 108_500.25).abs() < f64::EPSILON);
        cell.store(-0.07);
        assert!((cell.load() + 0.07).abs() < f64::EPSILON);
    }

    #[test]
    fn update_applies_atomically() {
        let cell = AtomicF64::new(10.0);
        let new = cell.update(|v| v - 2.5);
        assert!((new - 7.5).abs() < f64::EPSILON);
        assert!((cell.load() - 7.5).abs() < f64::EPSILON);
    }
}
