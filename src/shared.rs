//! Lock-free shared parameter cells
//!
//! Control-thread-written, callback-read parameter values. The audio callback
//! must never lock, so parameters that change at runtime (amplitude, delay
//! time) are stored as raw f32 bits in an atomic word shared through an `Arc`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A shared f32 parameter readable from the audio callback without locking.
///
/// Writes use `Release` and reads use `Acquire` ordering, which is more than
/// enough to rule out torn reads; exact timing of when the callback observes
/// a new value is unspecified (within one buffer in practice).
///
/// # Example
/// ```
/// use audioprobe::shared::SharedFloat;
///
/// let amplitude = SharedFloat::new(1.0);
/// let reader = amplitude.clone();
/// amplitude.set(0.5);
/// assert_eq!(reader.get(), 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct SharedFloat(Arc<AtomicU32>);

impl SharedFloat {
    /// Create a new cell with an initial value
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    /// Store a new value (control thread)
    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Load the current value (any thread)
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }
}
