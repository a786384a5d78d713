// =============================================================================
// circuit_breaker.rs - LETTING A FAILING TICKER COOL OFF
// =============================================================================
//
// Every ticker's loop owns one breaker. After enough consecutive failures
// it opens, and the loop's next retry waits out the cooldown instead of
// hammering the SEC on the backoff schedule. Then a trial request goes
// through (half-open) and decides whether we resume. Siblings never see
// each other's breakers.
// =============================================================================

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    /// Requests flow.
    Closed,
    /// Tripped; requests are refused until the reset timeout elapses.
    Open,
    /// Cooldown elapsed; trial requests decide the next state.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    trips: u64,
}

pub struct CircuitBreaker {
    name: String,
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreaker {
    /// # Arguments
    /// * `name` - Label used in logs
    /// * `failure_threshold` - Consecutive failures before the breaker opens
    /// * `reset_timeout` - How long it stays open
    /// * `success_threshold` - Half-open successes needed to close again
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        let name = name.into();
        info!(
            name = %name,
            failure_threshold = failure_threshold,
            reset_timeout_secs = reset_timeout.as_secs(),
            success_threshold = success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
                trips: 0,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            success_threshold: success_threshold.max(1),
        }
    }

    /// Whether a request may go out right now. An open breaker whose cooldown
    /// has elapsed moves to half-open and lets the request through.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.state.lock();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    info!(name = %self.name, "Circuit breaker OPEN -> HALF_OPEN, sending a trial request");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                }
                cooled_down
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.state.lock();

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.success_threshold {
                    info!(name = %self.name, "Circuit breaker HALF_OPEN -> CLOSED, source is healthy again");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.opened_at = None;
                }
            }
            // A request admitted before the trip finished late.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.state.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        name = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker TRIPPED, CLOSED -> OPEN"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.trips += 1;
                }
            }
            CircuitState::HalfOpen => {
                warn!(name = %self.name, "Trial request failed, HALF_OPEN -> OPEN");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trips += 1;
            }
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
        }
    }

    /// Time left before an open breaker admits a trial request. `None` when
    /// a request would be allowed now.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let inner = self.state.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        let opened_at = inner.opened_at?;
        self.reset_timeout
            .checked_sub(opened_at.elapsed())
            .filter(|left| !left.is_zero())
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn trips(&self) -> u64 {
        self.state.lock().trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::new("sec", 3, Duration::from_secs(5), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("sec", 2, Duration::from_secs(60), 1);
        cb.record_failure();
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
        assert_eq!(cb.trips(), 1);
    }

    #[test]
    fn test_success_breaks_the_failure_streak() {
        let cb = CircuitBreaker::new("sec", 2, Duration::from_secs(60), 1);
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_cooldown_remaining_only_while_open() {
        let cb = CircuitBreaker::new("aapl", 1, Duration::from_secs(60), 1);
        assert_eq!(cb.cooldown_remaining(), None);
        cb.record_failure();
        let left = cb.cooldown_remaining().unwrap();
        assert!(left > Duration::from_secs(59) && left <= Duration::from_secs(60));

        let quick = CircuitBreaker::new("tsla", 1, Duration::from_millis(0), 1);
        quick.record_failure();
        assert_eq!(quick.cooldown_remaining(), None);
        assert!(quick.allow_request());
    }

    #[test]
    fn test_half_open_trial_closes_or_reopens() {
        let cb = CircuitBreaker::new("sec", 1, Duration::from_millis(0), 1);
        cb.record_failure();
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.trips(), 2);
    }
}
