//! Provider Group: a named set of members sharing a routing strategy, a
//! circuit breaker, and a `min_healthy` policy.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{CircuitBreakerConfig, Strategy};
use crate::failsafe::{CircuitBreaker, CircuitBreakerStats, CircuitState, Decision};
use crate::provider::{ProviderId, ProviderManager};
use crate::{Error, Result};

use super::event_bus::{Event, EventBus};
use super::load_balancer::{Candidate, LoadBalancer};
use super::registry::Registry;

/// One statically-configured member reference: `(id, weight, priority)`.
pub struct Member {
    /// Member provider id.
    pub id: ProviderId,
    /// Weight for `weighted_round_robin`.
    pub weight: u32,
    /// Priority for `priority` (lower wins).
    pub priority: i32,
}

/// A logical set of providers. Holds only [`ProviderId`] references to its
/// members, never an owning reference; the [`Registry`] resolves them to
/// live [`ProviderManager`] handles on every dispatch.
pub struct ProviderGroup {
    id: ProviderId,
    members: Vec<Member>,
    min_healthy: usize,
    breaker: CircuitBreaker,
    balancer: LoadBalancer,
    events: EventBus,
    /// Last dispatchability observed by [`Self::is_dispatchable`], so a
    /// transition publishes `GroupStateChanged` exactly once. `None` until
    /// the first check.
    last_dispatchable: Mutex<Option<bool>>,
}

impl ProviderGroup {
    /// Build a group from its config-derived parts.
    #[must_use]
    pub fn new(
        id: ProviderId,
        strategy: Strategy,
        min_healthy: usize,
        circuit_breaker: &CircuitBreakerConfig,
        members: Vec<(ProviderId, u32, i32)>,
        events: EventBus,
    ) -> Self {
        let breaker = CircuitBreaker::new(id.as_str(), circuit_breaker);
        let balancer = LoadBalancer::new(strategy);
        Self {
            id,
            members: members
                .into_iter()
                .map(|(id, weight, priority)| Member { id, weight, priority })
                .collect(),
            min_healthy,
            breaker,
            balancer,
            events,
            last_dispatchable: Mutex::new(None),
        }
    }

    /// This group's id.
    #[must_use]
    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    /// Static member list, for `registry_list`/`registry_details`.
    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Circuit breaker snapshot, for `registry_details`/`registry_health`.
    #[must_use]
    pub fn breaker_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    /// Count of currently dispatchable (ready or degraded) members,
    /// resolved through `registry`.
    #[must_use]
    pub fn healthy_count(&self, registry: &Registry) -> usize {
        self.members
            .iter()
            .filter_map(|m| registry.provider(&m.id))
            .filter(|p| p.state().is_dispatchable())
            .count()
    }

    /// Whether this group currently satisfies `min_healthy` and its breaker
    /// is not open. Publishes `GroupStateChanged` the first time this
    /// differs from the last-observed value.
    #[must_use]
    pub fn is_dispatchable(&self, registry: &Registry) -> bool {
        let dispatchable =
            self.healthy_count(registry) >= self.min_healthy && self.breaker.state() != CircuitState::Open;
        let mut last = self.last_dispatchable.lock();
        if *last != Some(dispatchable) {
            *last = Some(dispatchable);
            self.events.publish(Event::GroupStateChanged {
                group: self.id.to_string(),
                dispatchable,
            });
        }
        dispatchable
    }

    /// Select a member to dispatch to: enforce `min_healthy`, consult the
    /// breaker, then ask the load balancer. On success returns the chosen
    /// member's manager and a guard that must be fed back via
    /// [`Self::record_outcome`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::GroupUnavailable`] if fewer than `min_healthy`
    /// members are dispatchable, or [`Error::CircuitOpen`] if the breaker
    /// rejects this call.
    pub fn select_member(&self, registry: &Registry) -> Result<Arc<ProviderManager>> {
        let candidates: Vec<(Candidate, Arc<ProviderManager>)> = self
            .members
            .iter()
            .filter_map(|m| {
                let manager = registry.provider(&m.id)?;
                if !manager.state().is_dispatchable() {
                    return None;
                }
                Some((
                    Candidate {
                        id: m.id.clone(),
                        weight: m.weight,
                        priority: m.priority,
                        in_flight: manager.in_flight(),
                    },
                    manager,
                ))
            })
            .collect();

        if candidates.len() < self.min_healthy {
            return Err(Error::GroupUnavailable(self.id.to_string()));
        }

        if self.breaker.try_acquire() == Decision::Reject {
            return Err(Error::CircuitOpen(self.id.to_string()));
        }

        let lb_candidates: Vec<Candidate> = candidates.iter().map(|(c, _)| c.clone()).collect();
        let Some(chosen_id) = self.balancer.select(&lb_candidates) else {
            self.breaker.record_failure();
            return Err(Error::GroupUnavailable(self.id.to_string()));
        };

        candidates
            .into_iter()
            .find(|(c, _)| c.id == chosen_id)
            .map(|(_, manager)| manager)
            .ok_or_else(|| Error::GroupUnavailable(self.id.to_string()))
    }

    /// Report a dispatch outcome to the breaker. Returns `true` if this
    /// caused a state transition (caller should publish `CircuitOpened`/
    /// `CircuitReset` on the Event Bus).
    #[must_use]
    pub fn record_outcome(&self, success: bool) -> bool {
        if success {
            self.breaker.record_success()
        } else {
            self.breaker.record_failure()
        }
    }
}
