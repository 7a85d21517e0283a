//! Time utilities.
//!
//! Frames are stamped with wall-clock microseconds so the stamp can travel
//! with the payload; elapsed-time measurements derived from two stamps
//! saturate at zero if the wall clock steps backwards.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **microseconds** since Unix epoch.
#[inline]
pub fn now_us() -> u64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_secs() * 1_000_000 + u64::from(d.subsec_micros())
}

/// Microseconds elapsed since `earlier_us` (a value from [`now_us`]).
#[inline]
pub fn elapsed_us(earlier_us: u64) -> u64 {
    now_us().saturating_sub(earlier_us)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        assert!(now_us() > 1_577_836_800_000_000);
    }

    #[test]
    fn elapsed_saturates_for_future_stamp() {
        assert_eq!(elapsed_us(now_us() + 60_000_000), 0);
    }
}
