//! Retry policy for Conduit calls
//!
//! Retry control flow is expressed as an explicit state machine driven by
//! the client's call loop. The policy itself is pure: it classifies an
//! attempt's outcome into the next state and computes backoff delays, so the
//! whole progression is testable without a network or a clock.

use super::ConduitError;
use std::time::Duration;

/// State of one logical call's retry progression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt `n` (1-based) is next to run
    Attempting(u32),

    /// The call returned a result
    Succeeded,

    /// The call failed with a non-retryable error
    FailedTerminal,

    /// The call failed with a retryable error after exhausting attempts
    FailedRetryable,
}

/// Bounded exponential backoff policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` total attempts with the given
    /// base delay. `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Total attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classify the outcome of attempt `attempt` into the next state.
    pub fn evaluate(&self, attempt: u32, outcome: Result<(), &ConduitError>) -> RetryState {
        match outcome {
            Ok(()) => RetryState::Succeeded,
            Err(err) if !err.is_retryable() => RetryState::FailedTerminal,
            Err(_) if attempt >= self.max_attempts => RetryState::FailedRetryable,
            Err(_) => RetryState::Attempting(attempt + 1),
        }
    }

    /// Backoff delay after attempt `attempt` (1-based): base * 2^(attempt-1).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.base_delay.saturating_mul(factor)
    }
}
