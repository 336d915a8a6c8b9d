//! Dispatch Engine: the single entry point for `invoke(target, tool, args)`
//! (resolve target, enforce rate limit, dispatch, record outcome).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::failsafe::RateLimiter;
use crate::protocol::ToolsCallResult;
use crate::{Error, Result};

use super::event_bus::{Event, EventBus};
use super::registry::{Registry, Target};

/// Default per-call deadline when the caller does not supply one.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Owns the global rate limiter and coordinates target resolution, breaker
/// consultation, and outcome recording for every dispatch in the process.
pub struct DispatchEngine {
    registry: Arc<Registry>,
    rate_limiter: RateLimiter,
    events: EventBus,
}

impl DispatchEngine {
    /// Build a dispatch engine over `registry`, sharing `events` with the
    /// rest of the gateway.
    #[must_use]
    pub fn new(registry: Arc<Registry>, rate_limiter: RateLimiter, events: EventBus) -> Self {
        Self {
            registry,
            rate_limiter,
            events,
        }
    }

    /// The shared registry, for MCP surface handlers that need raw lookups.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The shared event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Dispatch one call to `target_id`, resolving it to a provider or
    /// group, then enforcing the rate limit, breaker, and outcome bookkeeping.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownTarget`] if `target_id` names neither a provider
    ///   nor a group.
    /// - [`Error::RateLimited`] if the global token bucket is empty.
    /// - [`Error::GroupUnavailable`] / [`Error::CircuitOpen`] for groups.
    /// - Whatever [`crate::provider::ProviderManager::invoke`] returns for
    ///   the resolved provider.
    pub async fn dispatch(
        &self,
        target_id: &str,
        tool: &str,
        args: serde_json::Value,
        deadline: Duration,
        correlation_id: Option<String>,
    ) -> Result<ToolsCallResult> {
        let correlation_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let started = Instant::now();

        if deadline.is_zero() {
            return Err(Error::Timeout);
        }

        if !self.rate_limiter.try_acquire() {
            debug!(target = target_id, correlation_id = %correlation_id, "dispatch rejected: rate limited");
            return Err(Error::RateLimited);
        }

        let target = self.registry.resolve(target_id)?;

        let result = match target {
            Target::Provider(manager) => manager.invoke(tool, args, deadline).await,
            Target::Group(group) => {
                let member = group.select_member(&self.registry)?;
                let member_id = member.id().to_string();
                let outcome = member.invoke(tool, args, deadline).await;
                let success = outcome.is_ok()
                    || matches!(
                        outcome.as_ref().err().and_then(crate::Error::kind),
                        Some(crate::error::ErrorKind::ToolError)
                    );
                let transitioned = group.record_outcome(success);
                if transitioned {
                    let event = if success {
                        Event::CircuitReset { group: group.id().to_string() }
                    } else {
                        Event::CircuitOpened { group: group.id().to_string() }
                    };
                    self.events.publish(event);
                }
                debug!(group = %group.id(), member = %member_id, "group dispatch resolved member");
                outcome
            }
        };

        self.record(target_id, tool, &result, started);
        result
    }

    fn record(
        &self,
        target_id: &str,
        tool: &str,
        result: &Result<ToolsCallResult>,
        started: Instant,
    ) {
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(_) => {
                self.events.publish(Event::ToolInvoked {
                    provider: target_id.to_string(),
                    tool: tool.to_string(),
                    latency_ms,
                });
            }
            Err(e) => {
                let kind = e.kind().map_or("internal", crate::error::ErrorKind::as_str);
                if e.kind().is_none() {
                    warn!(target = target_id, tool, error = %e, "dispatch failed with an untagged error");
                }
                self.events.publish(Event::ToolFailed {
                    provider: target_id.to_string(),
                    tool: tool.to_string(),
                    error_kind: kind.to_string(),
                });
            }
        }
    }
}
