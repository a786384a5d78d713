// =============================================================================
// retry.rs - HOW LONG TO WAIT BEFORE ASKING THE SEC AGAIN
// =============================================================================
//
// A single dropped connection used to end monitoring for a ticker forever.
// Now a failing fetch gets a bounded number of retries, spaced out with
// exponential backoff and a little jitter so a dozen tickers don't all come
// knocking at the same instant.
// =============================================================================

use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay every time.
    Fixed { delay: Duration },
    /// `base * factor^attempt`, capped at `max`, optionally jittered by ±50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let secs = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let capped = Duration::from_secs_f64(secs.max(0.0));
                if jitter {
                    apply_jitter(capped)
                } else {
                    capped
                }
            }
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let spread = millis / 2;
    if spread == 0 {
        return delay;
    }
    let offset = fastrand::u64(0..=spread * 2);
    Duration::from_millis((millis - spread).saturating_add(offset))
}

/// How many times a scheduling loop retries a failed fetch before it gives up
/// on the ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 4,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32, base: Duration, max: Duration) -> Self {
        Self {
            enabled: true,
            max_retries,
            backoff: Backoff::Exponential {
                base,
                factor: 2.0,
                max,
                jitter: true,
            },
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            enabled: true,
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        self.enabled && failed_attempts <= self.max_retries
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(250),
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(7), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_backoff_doubles_then_caps() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(3),
            jitter: false,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay(3), Duration::from_secs(3));
        assert_eq!(backoff.delay(40), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_within_half_either_side() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(400),
            factor: 2.0,
            max: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..20 {
            for attempt in 0..4 {
                let expected = 400.0 * 2_f64.powi(attempt as i32);
                let got = backoff.delay(attempt).as_millis() as f64;
                assert!(got >= expected * 0.5 && got <= expected * 1.5, "attempt={attempt} got={got}");
            }
        }
    }

    #[test]
    fn test_jitter_survives_huge_caps() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_millis(u64::MAX),
            jitter: true,
        };
        for _ in 0..50 {
            assert!(backoff.delay(200) >= Duration::from_millis(u64::MAX / 4));
            assert!(apply_jitter(Duration::from_millis(u64::MAX)) <= Duration::from_millis(u64::MAX));
        }
    }

    #[test]
    fn test_retry_budget() {
        let config = RetryConfig::fixed(Duration::from_millis(10), 2);
        assert!(config.allows_retry(1));
        assert!(config.allows_retry(2));
        assert!(!config.allows_retry(3));

        let none = RetryConfig::no_retry();
        assert!(!none.allows_retry(1));
    }
}
