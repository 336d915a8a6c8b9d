//! Event Bus: in-process pub/sub of domain events.
//!
//! Built on `tokio::sync::broadcast`. Its native lag-based drop-on-slow-
//! receiver behavior already satisfies "slow subscribers must not block
//! producers", giving a bounded, drop-oldest delivery queue per subscriber
//! without a second queueing layer in front of it.

use serde::Serialize;
use serde_json::Value;

/// Typed domain event published by provider runtime components.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A provider's cold start has begun.
    ProviderStarting {
        /// provider id
        provider: String,
    },
    /// A provider finished cold start and is serving traffic.
    ProviderReady {
        /// provider id
        provider: String,
    },
    /// A provider was flipped to degraded.
    ProviderDegraded {
        /// provider id
        provider: String,
    },
    /// A provider recovered from degraded back to ready.
    ProviderRecovered {
        /// provider id
        provider: String,
    },
    /// A provider was shut down (idle GC or explicit stop).
    ProviderStopped {
        /// provider id
        provider: String,
    },
    /// A tool call succeeded.
    ToolInvoked {
        /// provider id
        provider: String,
        /// tool name
        tool: String,
        /// latency in milliseconds
        latency_ms: u64,
    },
    /// A tool call failed.
    ToolFailed {
        /// provider id
        provider: String,
        /// tool name
        tool: String,
        /// taxonomy label, see [`crate::error::ErrorKind::as_str`]
        error_kind: String,
    },
    /// A group's circuit breaker opened.
    CircuitOpened {
        /// group id
        group: String,
    },
    /// A group's circuit breaker closed after a successful probe.
    CircuitReset {
        /// group id
        group: String,
    },
    /// A group's dispatchability changed.
    GroupStateChanged {
        /// group id
        group: String,
        /// whether the group currently satisfies `min_healthy`
        dispatchable: bool,
    },
    /// A batch finished.
    BatchCompleted {
        /// number of calls in the batch
        size: usize,
        /// number that succeeded
        success_count: usize,
        /// number cancelled (deadline or fail_fast)
        cancelled_count: usize,
        /// wall-clock duration in milliseconds
        duration_ms: u64,
    },
}

impl Event {
    /// Render as a JSON value, for audit/metrics subscribers.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Bound on the broadcast channel; a subscriber lagging behind by more than
/// this many events silently drops the oldest.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Process-wide event bus, passed explicitly wherever a component needs to
/// publish or subscribe; never a hidden global.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    /// Build a new bus with no subscribers yet.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Never blocks; if there are no subscribers the
    /// event is simply dropped.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream. A lagging subscriber's next `recv`
    /// returns [`tokio::sync::broadcast::error::RecvError::Lagged`] and then
    /// resumes from the oldest still-buffered event.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::ProviderReady {
            provider: "math".to_string(),
        });
        let event = rx.recv().await.unwrap();
        matches!(event, Event::ProviderReady { provider } if provider == "math");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::ProviderStopped {
            provider: "x".to_string(),
        });
    }
}
