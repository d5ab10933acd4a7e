// core/throttle.rs

// Rate limiter for repeated log lines (map wait, missing inputs). Time is the
// node's tick clock, so replays and tests stay deterministic.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Throttle {
    period: Duration,
    last: Option<Duration>,
}

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Throttle { period, last: None }
    }

    /// Returns true at most once per period.
    pub fn ready(&mut self, now: Duration) -> bool {
        match self.last {
            Some(last) if now.saturating_sub(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_period() {
        let mut throttle = Throttle::new(Duration::from_secs(2));
        assert!(throttle.ready(Duration::from_millis(0)));
        assert!(!throttle.ready(Duration::from_millis(1500)));
        assert!(throttle.ready(Duration::from_millis(2000)));
        assert!(!throttle.ready(Duration::from_millis(3999)));
    }
}
