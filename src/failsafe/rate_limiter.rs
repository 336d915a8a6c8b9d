//! Global dispatch rate limiting (`rate_limit.rps`).

use std::num::NonZeroU32;

use governor::{Quota, RateLimiter as GovernorLimiter};

use crate::config::RateLimitConfig;

/// Token-bucket limiter shared across all dispatches. `rps == 0` disables
/// limiting entirely (the common default).
pub struct RateLimiter {
    inner: Option<
        GovernorLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
    >,
}

impl RateLimiter {
    /// Build a limiter from config. `rps = 0` means "disabled".
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let inner = NonZeroU32::new(config.rps).map(|rps| {
            let quota = Quota::per_second(rps);
            GovernorLimiter::direct(quota)
        });
        Self { inner }
    }

    /// Whether a call may proceed right now.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        match &self.inner {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Whether rate limiting is active (`rps > 0`).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_rps_zero() {
        let limiter = RateLimiter::new(&RateLimitConfig { rps: 0 });
        assert!(!limiter.is_enabled());
        for _ in 0..100 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn enabled_throttles_past_quota() {
        let limiter = RateLimiter::new(&RateLimitConfig { rps: 1 });
        assert!(limiter.is_enabled());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
