//! Reconnect backoff
//!
//! Consecutive disconnects double the wait from `floor` up to `ceiling`. A
//! disconnect arriving more than `reset_after` since the previous one means the
//! connection was healthy for a while, so the wait starts over at `floor`.

use crate::config::ServiceConfig;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    floor: Duration,
    ceiling: Duration,
    reset_after: Duration,
    attempt: u32,
    last_disconnect: Option<Instant>,
}

impl ReconnectBackoff {
    pub fn new(floor: Duration, ceiling: Duration, reset_after: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            reset_after,
            attempt: 0,
            last_disconnect: None,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            Duration::from_secs(config.backoff_floor_secs),
            Duration::from_secs(config.backoff_ceiling_secs),
            Duration::from_secs(config.backoff_reset_secs),
        )
    }

    /// Wait before reconnecting after a disconnect observed at `now`
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        if let Some(last) = self.last_disconnect {
            if now.saturating_duration_since(last) > self.reset_after {
                self.attempt = 0;
            }
        }
        self.last_disconnect = Some(now);

        let factor = 2u32.saturating_pow(self.attempt.min(31));
        let delay = self.floor.saturating_mul(factor).min(self.ceiling);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> ReconnectBackoff {
        ReconnectBackoff::new(
            Duration::from_secs(2),
            Duration::from_secs(120),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn test_doubles_up_to_ceiling() {
        let mut b = backoff();
        let start = Instant::now();

        let delays: Vec<u64> = (0..9)
            .map(|n| b.next_delay(start + Duration::from_secs(n)).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 64, 120, 120, 120]);
    }

    #[test]
    fn test_nth_delay_formula() {
        for n in 1..=12u32 {
            let mut b = backoff();
            let start = Instant::now();
            let mut last = Duration::ZERO;
            for i in 0..n {
                last = b.next_delay(start + Duration::from_secs(i as u64 * 10));
            }
            let expected = Duration::from_secs(2)
                .saturating_mul(2u32.pow(n - 1))
                .min(Duration::from_secs(120));
            assert_eq!(last, expected, "disconnect #{}", n);
        }
    }

    #[test]
    fn test_long_connection_resets() {
        let mut b = backoff();
        let start = Instant::now();
        b.next_delay(start);
        b.next_delay(start + Duration::from_secs(5));
        assert_eq!(
            b.next_delay(start + Duration::from_secs(10)),
            Duration::from_secs(8)
        );

        let later = start + Duration::from_secs(10 + 301);
        assert_eq!(b.next_delay(later), Duration::from_secs(2));
        assert_eq!(
            b.next_delay(later + Duration::from_secs(1)),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_from_config() {
        let mut b = ReconnectBackoff::from_config(&ServiceConfig::default());
        assert_eq!(b.next_delay(Instant::now()), Duration::from_secs(2));
    }
}
