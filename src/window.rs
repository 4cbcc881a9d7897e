//! Flow-control window credit accounting.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::WindowError;

/// Default session/stream window size before any negotiation.
pub const DEFAULT_WINDOW_SIZE: i32 = 65_535;

const WINDOW_MAX: i64 = i32::MAX as i64;
const WINDOW_MIN: i64 = i32::MIN as i64;

/// Signed credit counter for one session or stream direction.
///
/// Pure arithmetic, no I/O. A negative value is representable (the caller
/// decides whether it is a protocol violation); values beyond the 32-bit
/// window bounds are reported as errors rather than wrapping.
#[derive(Debug)]
pub struct FlowControlWindow {
    credits: AtomicI64,
}

impl FlowControlWindow {
    pub fn new(initial: i32) -> Self {
        Self {
            credits: AtomicI64::new(initial as i64),
        }
    }

    /// Current credit, non-blocking.
    pub fn value(&self) -> i64 {
        self.credits.load(Ordering::Acquire)
    }

    /// Adjust credit by a signed delta and return the new value.
    pub fn delta(&self, delta: i32) -> Result<i64, WindowError> {
        let mut current = self.credits.load(Ordering::Acquire);
        loop {
            let next = current + delta as i64;
            if next > WINDOW_MAX {
                return Err(WindowError::Overflow { current, delta });
            }
            if next < WINDOW_MIN {
                return Err(WindowError::Underflow { current, delta });
            }
            match self.credits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(observed) => current = observed,
            }
        }
    }
}
