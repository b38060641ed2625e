//! Throttling and transient-failure handling for Graph requests.
//!
//! Graph answers 429 with a `Retry-After` header when a tenant or app is
//! throttled. The limiter honours that header (capped), falls back to
//! exponential backoff with jitter, and trips a [`CircuitBreaker`] when
//! failures keep coming.

use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::{EntraError, EntraResult};

/// Tunables for [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// First backoff step in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single wait, including `Retry-After`.
    pub max_delay_ms: u64,
    /// Extra random delay as a fraction of the computed one.
    pub jitter_factor: f64,
    /// 429 responses tolerated per request before giving up.
    pub max_throttle_retries: u32,
    /// 502/503/504 responses retried per request.
    pub max_transient_retries: u32,
    /// Consecutive failures that open the circuit.
    pub circuit_failure_threshold: u32,
    pub circuit_open_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 120_000,
            jitter_factor: 0.25,
            max_throttle_retries: 6,
            max_transient_retries: 4,
            circuit_failure_threshold: 10,
            circuit_open_secs: 30,
        }
    }
}

impl RateLimitConfig {
    /// Millisecond delays and few retries.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 50,
            jitter_factor: 0.0,
            max_throttle_retries: 2,
            max_transient_retries: 2,
            circuit_failure_threshold: 50,
            circuit_open_secs: 1,
        }
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("base_delay_ms must be > 0".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be >= base_delay_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("jitter_factor must be in range [0.0, 1.0]".to_string());
        }
        Ok(())
    }
}

/// Shared by every request a [`crate::GraphClient`] sends.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, String> {
        config.validate()?;
        let breaker = CircuitBreaker::new(
            config.circuit_failure_threshold,
            Duration::from_secs(config.circuit_open_secs),
        );
        Ok(Self {
            config,
            breaker: Mutex::new(breaker),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Rejects the request if the circuit is open.
    pub async fn check(&self) -> EntraResult<()> {
        if self.breaker.lock().await.allow_request() {
            Ok(())
        } else {
            Err(EntraError::CircuitOpen)
        }
    }

    /// Parses a delta-seconds `Retry-After` value. HTTP-date values are ignored.
    #[must_use]
    pub fn parse_retry_after(value: &str) -> Option<u64> {
        value.trim().parse().ok()
    }

    /// Exponential backoff for `attempt` (zero-based) with jitter, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.config.max_delay_ms);
        self.with_jitter(Duration::from_millis(exp))
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        let spread = delay.as_millis() as f64 * self.config.jitter_factor;
        if spread <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=spread);
        delay + Duration::from_millis(extra as u64)
    }

    /// Handles a 429: records the failure, then sleeps before the next attempt.
    ///
    /// `attempt` counts previous 429s for the same request.
    pub async fn on_throttled(
        &self,
        retry_after_secs: Option<u64>,
        attempt: u32,
    ) -> EntraResult<()> {
        {
            let mut breaker = self.breaker.lock().await;
            breaker.record_failure();
            if breaker.state() == CircuitBreakerState::Open {
                return Err(EntraError::CircuitOpen);
            }
        }

        if attempt >= self.config.max_throttle_retries {
            return Err(EntraError::MaxRetriesExceeded {
                attempts: attempt + 1,
            });
        }

        let delay = match retry_after_secs {
            Some(secs) => {
                let cap = Duration::from_millis(self.config.max_delay_ms);
                let wanted = Duration::from_secs(secs);
                if wanted > cap {
                    warn!(retry_after = secs, "Retry-After exceeds maximum wait, capping");
                }
                self.with_jitter(wanted.min(cap))
            }
            None => self.backoff(attempt),
        };

        warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Throttled by Graph, waiting"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    pub async fn record_success(&self) {
        self.breaker.lock().await.record_success();
    }

    /// Counts a server-side failure towards opening the circuit.
    pub async fn record_failure(&self) {
        let mut breaker = self.breaker.lock().await;
        breaker.record_failure();
        debug!(
            failures = breaker.consecutive_failures(),
            state = %breaker.state(),
            "Recorded Graph failure"
        );
    }

    pub async fn circuit_state(&self) -> CircuitBreakerState {
        self.breaker.lock().await.state()
    }
}
