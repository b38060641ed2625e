//! Fail-fast guard for sustained Graph throttling or outages.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected until the cool-down elapses.
    Open,
    /// One probe is let through; its outcome decides the next state.
    HalfOpen,
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Opens after `failure_threshold` consecutive failures and stays open for
/// `open_duration`.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            failure_threshold: failure_threshold.max(1),
            open_duration,
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns true if a request may be sent now. Moves an expired open
    /// circuit to half-open.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let cooled_down = self
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.open_duration);
                if cooled_down {
                    self.state = CircuitBreakerState::HalfOpen;
                    info!("Circuit breaker half-open, sending probe");
                }
                cooled_down
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let trip = match self.state {
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Closed => self.consecutive_failures >= self.failure_threshold,
            CircuitBreakerState::Open => false,
        };
        if trip {
            self.state = CircuitBreakerState::Open;
            self.opened_at = Some(Instant::now());
            warn!(
                failures = self.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitBreakerState::HalfOpen {
            info!("Circuit breaker closed after successful probe");
        }
        self.state = CircuitBreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }
}
