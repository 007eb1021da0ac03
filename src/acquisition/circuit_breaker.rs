//! Consecutive-failure circuit breaker.
//!
//! Counts failed items in a row and tells the engine to stop once the count
//! reaches the configured limit. Any success closes the breaker again.

use tracing::{debug, error};

/// Action to take after recording an item's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerAction {
    /// Continue with the next item
    Continue,
    /// Stop the run, the session is presumably no longer valid
    Trip,
}

/// Stops a run after too many consecutive item failures.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    limit: u32,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    /// Create a breaker that trips after `limit` failures in a row.
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_tripped(&self) -> bool {
        self.consecutive_failures >= self.limit
    }

    /// Record a successful item.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(
                "Circuit breaker reset after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Record a failed item.
    ///
    /// Returns `Trip` once the number of failures in a row reaches the limit.
    pub fn record_failure(&mut self) -> BreakerAction {
        self.consecutive_failures += 1;

        if self.is_tripped() {
            error!(
                "Circuit breaker tripped after {} consecutive failures",
                self.consecutive_failures
            );
            BreakerAction::Trip
        } else {
            debug!(
                "Consecutive failures: {}/{}",
                self.consecutive_failures, self.limit
            );
            BreakerAction::Continue
        }
    }
}
