//! Sequence-number continuity tracking.
//!
//! Frames carry a sequence number that the feed connection increments once per
//! upstream data message. The relay pump feeds each number through a
//! [`SequenceTracker`] so that:
//!
//! 1. a jump forward is reported as a gap of `seq - last - 1` missing frames;
//! 2. a number at or below the last accepted one is reported as stale, so the
//!    caller can skip it instead of publishing out of order.

/// Outcome of checking one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// Exactly `last + 1`.
    InOrder,
    /// Accepted, but `missing` numbers were skipped.
    Gap { missing: u64 },
    /// Not newer than `last`; rejected.
    Stale { last: u64 },
}

/// Tracks the last accepted sequence number and running gap totals.
///
/// Not thread-safe. The pump owns its tracker.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: u64,
    gaps: u64,
    missing: u64,
    stale: u64,
}

impl SequenceTracker {
    /// Sequence numbers start at 1, so a fresh tracker expects 1 next.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `seq` and, unless stale, record it as the last accepted number.
    #[inline]
    pub fn check_and_update(&mut self, seq: u64) -> SeqCheck {
        if seq <= self.last {
            self.stale += 1;
            return SeqCheck::Stale { last: self.last };
        }
        let missing = seq - self.last - 1;
        self.last = seq;
        if missing == 0 {
            SeqCheck::InOrder
        } else {
            self.gaps += 1;
            self.missing += missing;
            SeqCheck::Gap { missing }
        }
    }

    /// Last accepted sequence number (0 before the first frame).
    pub fn last(&self) -> u64 {
        self.last
    }

    /// Number of discontinuities seen.
    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    /// Total sequence numbers skipped across all gaps.
    pub fn missing(&self) -> u64 {
        self.missing
    }

    /// Number of stale / duplicate numbers rejected.
    pub fn stale(&self) -> u64 {
        self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_run() {
        let mut t = SequenceTracker::new();
        for seq in 1..=5 {
            assert_eq!(t.check_and_update(seq), SeqCheck::InOrder);
        }
        assert_eq!(t.last(), 5);
        assert_eq!(t.gaps(), 0);
    }

    #[test]
    fn gap_counts_missing_numbers() {
        let mut t = SequenceTracker::new();
        t.check_and_update(1);
        t.check_and_update(2);
        assert_eq!(t.check_and_update(6), SeqCheck::Gap { missing: 3 });
        assert_eq!(t.check_and_update(7), SeqCheck::InOrder);
        assert_eq!(t.check_and_update(9), SeqCheck::Gap { missing: 1 });
        assert_eq!(t.gaps(), 2);
        assert_eq!(t.missing(), 4);
    }

    #[test]
    fn first_frame_after_one_is_a_gap() {
        let mut t = SequenceTracker::new();
        assert_eq!(t.check_and_update(3), SeqCheck::Gap { missing: 2 });
    }

    #[test]
    fn stale_and_duplicate_rejected() {
        let mut t = SequenceTracker::new();
        t.check_and_update(1);
        t.check_and_update(2);
        assert_eq!(t.check_and_update(2), SeqCheck::Stale { last: 2 });
        assert_eq!(t.check_and_update(1), SeqCheck::Stale { last: 2 });
        assert_eq!(t.last(), 2);
        assert_eq!(t.stale(), 2);
    }
}
