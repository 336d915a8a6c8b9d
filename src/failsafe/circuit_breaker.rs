//! Per-group circuit breaker: closed/open/half-open fast-fail gate.
//!
//! Half-open admits exactly one probe call rather than a configurable
//! success threshold, and the breaker is owned by a
//! [`crate::gateway::group::ProviderGroup`] rather than by an individual
//! provider.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// All dispatches reject immediately.
    Open,
    /// A single probe call is admitted to test recovery.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase label used in API responses.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Whether a dispatch may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Proceed with the call.
    Admit,
    /// Reject with `circuit_open`.
    Reject,
}

/// Observability snapshot, cheap to clone.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Number of Closed→Open trips so far.
    pub trips_count: u64,
    /// Epoch-millisecond timestamp of the last trip (0 = never).
    pub last_trip_ms: u64,
    /// Milliseconds until a half-open probe is allowed (0 when not open).
    pub retry_after_ms: u64,
    /// Current consecutive failure count.
    pub current_failures: u32,
    /// Configured failure threshold.
    pub failure_threshold: u32,
}

/// Per-group circuit breaker. Guards only group dispatch; a
/// raw single-provider target bypasses it entirely.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: RwLock<CircuitState>,
    failures: AtomicU32,
    opened_at_ms: AtomicU64,
    /// Set while a half-open probe is in flight, so concurrent callers
    /// during the probe window all reject instead of racing onto the
    /// backend: at most one backend call may be in flight during a reset window.
    probe_inflight: AtomicBool,
    trips_count: AtomicU64,
}

impl CircuitBreaker {
    /// Build a breaker named after its owning group.
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            state: RwLock::new(CircuitState::Closed),
            failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            probe_inflight: AtomicBool::new(false),
            trips_count: AtomicU64::new(0),
        }
    }

    /// Decide whether a dispatch may proceed, transitioning Open→HalfOpen
    /// when the reset timeout has elapsed.
    #[tracing::instrument(skip(self), fields(group = %self.name))]
    pub fn try_acquire(&self) -> Decision {
        let state = *self.state.read();
        match state {
            CircuitState::Closed => Decision::Admit,
            CircuitState::Open => {
                let opened_at = self.opened_at_ms.load(Ordering::Relaxed);
                let elapsed = epoch_millis_now().saturating_sub(opened_at);
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = self.reset_timeout.as_millis() as u64;
                if elapsed < timeout_ms {
                    return Decision::Reject;
                }
                self.transition_to(CircuitState::HalfOpen);
                self.admit_probe()
            }
            CircuitState::HalfOpen => self.admit_probe(),
        }
    }

    fn admit_probe(&self) -> Decision {
        if self
            .probe_inflight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Decision::Admit
        } else {
            Decision::Reject
        }
    }

    /// Record a successful outcome. Returns `true` if this closed the
    /// circuit (i.e. the caller should emit `CircuitReset`).
    #[tracing::instrument(skip(self), fields(group = %self.name))]
    pub fn record_success(&self) -> bool {
        let state = *self.state.read();
        match state {
            CircuitState::Closed => {
                self.failures.store(0, Ordering::Relaxed);
                false
            }
            CircuitState::HalfOpen => {
                self.probe_inflight.store(false, Ordering::Release);
                self.transition_to(CircuitState::Closed);
                true
            }
            CircuitState::Open => false,
        }
    }

    /// Record a failed outcome. Returns `true` if this opened the circuit
    /// (i.e. the caller should emit `CircuitOpened`).
    #[tracing::instrument(skip(self), fields(group = %self.name))]
    pub fn record_failure(&self) -> bool {
        let state = *self.state.read();
        match state {
            CircuitState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.failure_threshold {
                    self.transition_to(CircuitState::Open);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                self.probe_inflight.store(false, Ordering::Release);
                self.transition_to(CircuitState::Open);
                true
            }
            CircuitState::Open => false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    /// Observability snapshot.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = *self.state.read();
        let opened_at = self.opened_at_ms.load(Ordering::Relaxed);
        let retry_after_ms = if state == CircuitState::Open && opened_at > 0 {
            let elapsed = epoch_millis_now().saturating_sub(opened_at);
            #[allow(clippy::cast_possible_truncation)]
            let reset_ms = self.reset_timeout.as_millis() as u64;
            reset_ms.saturating_sub(elapsed)
        } else {
            0
        };
        CircuitBreakerStats {
            state,
            trips_count: self.trips_count.load(Ordering::Relaxed),
            last_trip_ms: opened_at,
            retry_after_ms,
            current_failures: self.failures.load(Ordering::Relaxed),
            failure_threshold: self.failure_threshold,
        }
    }

    fn transition_to(&self, new_state: CircuitState) {
        let mut state = self.state.write();
        if *state == new_state {
            return;
        }
        *state = new_state;
        match new_state {
            CircuitState::Closed => {
                self.failures.store(0, Ordering::Relaxed);
                info!(group = %self.name, "circuit breaker closed");
            }
            CircuitState::Open => {
                let epoch_ms = epoch_millis_now();
                self.opened_at_ms.store(epoch_ms, Ordering::Relaxed);
                self.trips_count.fetch_add(1, Ordering::Relaxed);
                warn!(group = %self.name, "circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                tracing::debug!(group = %self.name, "circuit breaker half-open, admitting one probe");
            }
        }
    }
}

/// Build a human-readable message for a rejected dispatch.
#[must_use]
pub fn build_circuit_breaker_error(group: &str, stats: &CircuitBreakerStats) -> String {
    match stats.state {
        CircuitState::Open => format!(
            "circuit breaker for group '{group}' is open (tripped {} time(s)); retry probe allowed in ~{}ms",
            stats.trips_count, stats.retry_after_ms
        ),
        _ => format!("circuit breaker for group '{group}' is {}", stats.state.as_str()),
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn epoch_millis_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(failure_threshold: u32, reset_timeout_s: f64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            reset_timeout_s,
        }
    }

    #[test]
    fn starts_closed_and_admits() {
        let cb = CircuitBreaker::new("g", &cfg(3, 30.0));
        assert_eq!(cb.try_acquire(), Decision::Admit);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_after_failure_threshold() {
        let cb = CircuitBreaker::new("g", &cfg(3, 30.0));
        assert!(!cb.record_failure());
        assert!(!cb.record_failure());
        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.try_acquire(), Decision::Reject);
    }

    #[test]
    fn failure_threshold_of_one_opens_immediately() {
        let cb = CircuitBreaker::new("g", &cfg(1, 30.0));
        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_exactly_one_concurrent_probe() {
        let cb = CircuitBreaker::new("g", &cfg(1, 0.0));
        cb.record_failure();
        assert_eq!(cb.try_acquire(), Decision::Admit);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // A second concurrent caller must be rejected while the probe is outstanding.
        assert_eq!(cb.try_acquire(), Decision::Reject);
    }

    #[test]
    fn half_open_success_closes_circuit() {
        let cb = CircuitBreaker::new("g", &cfg(1, 0.0));
        cb.record_failure();
        cb.try_acquire();
        assert!(cb.record_success());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_resets_timer() {
        let cb = CircuitBreaker::new("g", &cfg(1, 0.0));
        cb.record_failure();
        cb.try_acquire();
        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_in_closed_state_resets_failure_count() {
        let cb = CircuitBreaker::new("g", &cfg(3, 30.0));
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.record_success());
        let stats = cb.stats();
        assert_eq!(stats.current_failures, 0);
    }

    #[test]
    fn stats_retry_after_ms_nonzero_when_open() {
        let cb = CircuitBreaker::new("g", &cfg(1, 60.0));
        cb.record_failure();
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert!(stats.retry_after_ms > 0);
        assert!(stats.retry_after_ms <= 60_000);
    }
}
