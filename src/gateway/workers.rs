//! Health Worker and Idle GC Worker: the two periodic background tasks
//! orthogonal to the dispatch path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::event_bus::{Event, EventBus};
use super::registry::Registry;
use crate::provider::ProviderState;

/// Deadline applied to every health probe.
const HEALTH_PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Periodically probes every ready/degraded provider with a cheap
/// `tools/list` call, structured as a standalone, independently testable
/// type rather than an inline task.
pub struct HealthWorker {
    registry: Arc<Registry>,
    events: EventBus,
    interval: Duration,
}

impl HealthWorker {
    /// Build a worker probing at `interval`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, events: EventBus, interval: Duration) -> Self {
        Self {
            registry,
            events,
            interval,
        }
    }

    /// Run until `shutdown` fires, probing every provider once per tick.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.probe_all().await,
                _ = shutdown.recv() => {
                    debug!("health worker shutting down");
                    break;
                }
            }
        }
    }

    async fn probe_all(&self) {
        for (id, manager) in self.registry.providers() {
            if !manager.state().is_dispatchable() {
                continue;
            }
            let was_degraded = manager.state() == ProviderState::Degraded;
            match manager.probe_health(HEALTH_PROBE_DEADLINE).await {
                Ok(()) => {
                    if was_degraded && manager.state() == ProviderState::Ready {
                        self.events.publish(Event::ProviderRecovered { provider: id.to_string() });
                    }
                }
                Err(e) => {
                    debug!(provider = %id, error = %e, "health probe failed");
                    if !was_degraded && manager.state() == ProviderState::Degraded {
                        self.events.publish(Event::ProviderDegraded { provider: id.to_string() });
                    }
                }
            }
        }
    }
}

/// Periodically shuts down providers idle past their TTL with zero
/// in-flight calls, exempting members of groups currently below
/// `min_healthy`.
pub struct IdleGcWorker {
    registry: Arc<Registry>,
    events: EventBus,
    scan_interval: Duration,
}

impl IdleGcWorker {
    /// Build a worker scanning every `scan_interval`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, events: EventBus, scan_interval: Duration) -> Self {
        Self {
            registry,
            events,
            scan_interval,
        }
    }

    /// Run until `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.recv() => {
                    debug!("idle GC worker shutting down");
                    break;
                }
            }
        }
    }

    async fn sweep(&self) {
        let exempt = self.providers_in_unhealthy_groups();
        for (id, manager) in self.registry.providers() {
            if exempt.contains(id.as_str()) {
                continue;
            }
            if manager.is_idle() {
                manager.shutdown().await;
                info!(provider = %id, "idle GC shut down provider");
                self.events.publish(Event::ProviderStopped { provider: id.to_string() });
            }
        }
    }

    /// Providers that belong to a group currently below `min_healthy`;
    /// shutting one of them down would only make the group's outage worse.
    fn providers_in_unhealthy_groups(&self) -> std::collections::HashSet<String> {
        let mut exempt = std::collections::HashSet::new();
        for (_, group) in self.registry.groups() {
            if !group.is_dispatchable(&self.registry) {
                for member in group.members() {
                    exempt.insert(member.id.to_string());
                }
            }
        }
        exempt
    }
}
