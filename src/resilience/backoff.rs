//! Retry pacing for sessions that are not listening yet.

use std::time::{Duration, Instant};

use rand::Rng;

/// Doubling delays from `base` up to `cap`, handed out until `budget` has
/// elapsed since the schedule was created.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    base: Duration,
    cap: Duration,
    deadline: Instant,
    attempts: u32,
}

impl RetrySchedule {
    pub fn new(base: Duration, cap: Duration, budget: Duration) -> Self {
        Self {
            base,
            cap,
            deadline: Instant::now() + budget,
            attempts: 0,
        }
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt. Returns how long to wait before the next
    /// one, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if Instant::now() >= self.deadline {
            return None;
        }
        Some(with_jitter(step_delay(self.attempts, self.base, self.cap)))
    }
}

/// `base * 2^(attempt-1)`, never above `cap`. Attempt 0 is immediate.
fn step_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

// Up to a tenth extra, so first requests from many users spread out.
fn with_jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 10;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..spread))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(50);
    const CAP: Duration = Duration::from_millis(1000);

    #[test]
    fn test_step_delay_doubles_to_cap() {
        assert_eq!(step_delay(0, BASE, CAP), Duration::ZERO);
        assert_eq!(step_delay(1, BASE, CAP), Duration::from_millis(50));
        assert_eq!(step_delay(3, BASE, CAP), Duration::from_millis(200));
        assert_eq!(step_delay(6, BASE, CAP), CAP);
        assert_eq!(step_delay(64, BASE, CAP), CAP);
    }

    #[test]
    fn test_jitter_stays_within_a_tenth() {
        for _ in 0..50 {
            let delay = with_jitter(Duration::from_millis(200)).as_millis();
            assert!((200..220).contains(&delay));
        }
        assert_eq!(with_jitter(Duration::from_millis(5)), Duration::from_millis(5));
    }

    #[test]
    fn test_schedule_stops_after_budget() {
        let mut retry = RetrySchedule::new(BASE, CAP, Duration::from_secs(60));
        let first = retry.next_delay().unwrap().as_millis();
        assert!((50..55).contains(&first));
        assert_eq!(retry.attempts(), 1);

        let mut spent = RetrySchedule::new(BASE, CAP, Duration::ZERO);
        assert_eq!(spent.next_delay(), None);
        assert_eq!(spent.attempts(), 1);
    }
}
