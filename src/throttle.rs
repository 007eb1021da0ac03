//! Request pacing for remote calls.
//!
//! Every page request and every item download is separated by a randomized
//! pause, keeping the traffic within the remote service's acceptable use.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::config::ArchiverSettings;

/// Trait for pausing between consecutive remote operations.
#[async_trait]
pub trait RequestThrottle: Send + Sync {
    /// Sleep before the next remote operation.
    async fn pause(&self);
}

/// Sleeps for a uniformly random duration within configured bounds.
#[derive(Debug, Clone)]
pub struct RandomDelayThrottle {
    min: Duration,
    max: Duration,
}

impl RandomDelayThrottle {
    /// Create a throttle pausing between `min` and `max` (inclusive).
    ///
    /// Bounds given in the wrong order are swapped.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Create a throttle from the configured millisecond bounds.
    pub fn from_settings(settings: &ArchiverSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.throttle_min_ms),
            Duration::from_millis(settings.throttle_max_ms),
        )
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }

    /// Pick the next delay.
    pub fn next_delay(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if min == max {
            return self.min;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[async_trait]
impl RequestThrottle for RandomDelayThrottle {
    async fn pause(&self) {
        let delay = self.next_delay();
        debug!("Throttling for {} ms", delay.as_millis());
        tokio::time::sleep(delay).await;
    }
}

/// No-op throttle that never waits.
/// Used in tests.
pub struct NoOpThrottle;

#[async_trait]
impl RequestThrottle for NoOpThrottle {
    async fn pause(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_within_bounds() {
        let throttle =
            RandomDelayThrottle::new(Duration::from_millis(100), Duration::from_millis(250));
        for _ in 0..200 {
            let delay = throttle.next_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_bounds_are_swapped_when_reversed() {
        let throttle = RandomDelayThrottle::new(Duration::from_millis(900), Duration::from_millis(300));
        assert_eq!(
            throttle.bounds(),
            (Duration::from_millis(300), Duration::from_millis(900))
        );
    }

    #[test]
    fn test_equal_bounds_are_fixed_delay() {
        let throttle = RandomDelayThrottle::new(Duration::from_millis(42), Duration::from_millis(42));
        assert_eq!(throttle.next_delay(), Duration::from_millis(42));
    }

    #[test]
    fn test_from_settings() {
        let settings = ArchiverSettings {
            throttle_min_ms: 1000,
            throttle_max_ms: 3000,
            ..Default::default()
        };
        let throttle = RandomDelayThrottle::from_settings(&settings);
        assert_eq!(
            throttle.bounds(),
            (Duration::from_secs(1), Duration::from_secs(3))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_sleeps() {
        let throttle = RandomDelayThrottle::new(Duration::from_secs(2), Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        throttle.pause().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_no_op_throttle_returns_immediately() {
        let start = std::time::Instant::now();
        NoOpThrottle.pause().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
