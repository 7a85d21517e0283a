//! Exponential retry delays with jitter.
//!
//! The attempt counter grows on every failure and is reset by the owner after
//! a success. Delay for attempt `n` is `min(base * factor^n, max)`, then
//! shortened by a random fraction in `[0, jitter)` so that many clients
//! restarting together do not dial in lockstep.

use std::time::Duration;

use rand::Rng;

/// Retry delay calculator. Not thread-safe; each retry loop owns one.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    factor: u32,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl BackoffPolicy {
    /// `jitter` is clamped to `[0, 1)`; `factor` of 0 is treated as 1.
    pub fn new(base: Duration, factor: u32, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            factor: factor.max(1),
            max: max.max(base),
            jitter: jitter.clamp(0.0, 0.99),
            attempt: 0,
        }
    }

    /// Number of failures recorded since the last [`reset`](Self::reset).
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for a given attempt number.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        self.factor
            .checked_pow(attempt)
            .and_then(|mult| self.base.checked_mul(mult))
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Record one failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter > 0.0 {
            let cut = rand::rng().random_range(0.0..self.jitter);
            ceiling.mul_f64(1.0 - cut)
        } else {
            ceiling
        }
    }

    /// Forget past failures.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(1), 2, Duration::from_secs(30), jitter)
    }

    #[test]
    fn doubles_until_cap() {
        let mut b = policy(0.0);
        let delays: Vec<u64> = (0..7).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(b.attempt(), 7);
    }

    #[test]
    fn jitter_stays_below_ceiling() {
        let mut b = policy(0.2);
        for n in 0..20 {
            let ceiling = b.ceiling(n);
            let d = b.next_delay();
            assert!(d <= ceiling);
            assert!(d >= ceiling.mul_f64(0.8));
        }
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut b = policy(0.0);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let b = policy(0.0);
        assert_eq!(b.ceiling(u32::MAX), Duration::from_secs(30));
    }
}
