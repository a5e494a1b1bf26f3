use std::time::Duration;

/// Exponential reconnect schedule: `min(base * 2^attempt, max)`, at most
/// `max_attempts` retries per connection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (0-based). Non-decreasing in `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|d| d.min(self.max))
            .unwrap_or(self.max)
    }

    /// Delay for the next retry, or `None` once `attempt` has reached the cap
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.delay(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 10)
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let b = backoff();
        assert_eq!(b.delay(0), Duration::from_secs(1));
        assert_eq!(b.delay(1), Duration::from_secs(2));
        assert_eq!(b.delay(2), Duration::from_secs(4));
        assert_eq!(b.delay(4), Duration::from_secs(16));
        assert_eq!(b.delay(5), Duration::from_secs(30));
        assert_eq!(b.delay(9), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_matches_formula_and_is_monotonic() {
        let base = Duration::from_millis(1500);
        let max = Duration::from_secs(30);
        let b = Backoff::new(base, max, 64);

        let mut previous = Duration::ZERO;
        for n in 0..64u32 {
            let expected = if n < 32 {
                base.checked_mul(1u32 << n).map(|d| d.min(max)).unwrap_or(max)
            } else {
                max
            };
            let d = b.delay(n);
            assert_eq!(d, expected, "attempt {}", n);
            assert!(d >= previous, "attempt {} decreased", n);
            previous = d;
        }
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let b = backoff();
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_next_delay_caps_attempts() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 3);
        assert_eq!(b.next_delay(0), Some(Duration::from_secs(1)));
        assert_eq!(b.next_delay(2), Some(Duration::from_secs(4)));
        assert_eq!(b.next_delay(3), None);
        assert_eq!(b.next_delay(4), None);
    }

    #[test]
    fn test_max_below_base_is_clamped() {
        let b = Backoff::new(Duration::from_secs(5), Duration::from_secs(1), 3);
        assert_eq!(b.delay(0), Duration::from_secs(5));
        assert_eq!(b.delay(3), Duration::from_secs(5));
    }
}
