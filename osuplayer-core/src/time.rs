//! Time and duration conversion utilities.

use std::time::Duration;

/// Extension trait for saturating `Duration` conversions.
pub trait DurationExt {
    /// Milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }
}
