//! Provider Manager: owns one provider's lifecycle state machine and the
//! single-flight cold-start guarantee.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::{ProviderId, ProviderSession, ProviderState};
use crate::config::{ContainerResources, HttpTimeouts, LifecycleConfig, NetworkMode};
use crate::failsafe::{RetryPolicy, with_retry};
use crate::gateway::{Event, EventBus};
use crate::protocol::{Tool, ToolsCallResult};
use crate::transport::{ContainerTransport, RemoteTransport, StdioTransport, Transport};
use crate::{Error, Result};

/// Single-flight future shared by every caller racing to start a provider.
/// The output wraps [`Error`] in an [`Arc`] because [`Shared`] requires a
/// `Clone` output and `Error` itself is not `Clone`.
type StartFuture = Shared<BoxFuture<'static, std::result::Result<(), Arc<Error>>>>;

/// Max concurrent in-flight tool calls per provider. Chosen conservatively;
/// most MCP servers are single-threaded over stdio.
const MAX_PROVIDER_CONCURRENCY: usize = 8;

/// How a provider is launched, resolved once from [`crate::config::ProviderSpec`].
pub enum Launch {
    /// `command`/`env` for a [`StdioTransport`].
    Subprocess {
        /// argv
        command: Vec<String>,
        /// environment
        env: HashMap<String, String>,
    },
    /// Parameters for a [`ContainerTransport`].
    Container {
        /// image reference
        image: String,
        /// volume specs
        volumes: Vec<String>,
        /// resource limits
        resources: ContainerResources,
        /// network mode
        network: NetworkMode,
        /// read-only root fs
        read_only: bool,
        /// environment
        env: HashMap<String, String>,
    },
    /// Parameters for a [`RemoteTransport`].
    Remote {
        /// endpoint URL
        endpoint: String,
        /// connect/read timeouts
        http: HttpTimeouts,
    },
}

/// Runtime state of one provider, owned exclusively by its [`ProviderManager`].
struct Inner {
    state: ProviderState,
    session: Option<Arc<ProviderSession>>,
    consecutive_failures: u32,
    last_used: Option<Instant>,
    last_error: Option<String>,
    start_future: Option<StartFuture>,
}

/// Owns one provider's transport/session lifecycle: cold-start,
/// single-flight readiness, dispatch-time invocation, idle shutdown.
pub struct ProviderManager {
    id: ProviderId,
    launch: Launch,
    lifecycle: LifecycleConfig,
    /// Parsed from `lifecycle.tools`, served before the first successful
    /// `tools/list` discovery completes.
    declared_tools: Vec<Tool>,
    inner: Mutex<Inner>,
    /// Bounds concurrent in-flight calls to this one provider.
    concurrency: Semaphore,
    retry_policy: RetryPolicy,
    events: EventBus,
}

impl ProviderManager {
    /// Construct a manager for `id`, not yet started.
    #[must_use]
    pub fn new(id: ProviderId, launch: Launch, lifecycle: LifecycleConfig, events: EventBus) -> Arc<Self> {
        let declared_tools = lifecycle
            .tools
            .as_ref()
            .map(|raw| {
                raw.iter()
                    .filter_map(|v| serde_json::from_value::<Tool>(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Arc::new(Self {
            id,
            launch,
            lifecycle,
            declared_tools,
            inner: Mutex::new(Inner {
                state: ProviderState::Cold,
                session: None,
                consecutive_failures: 0,
                last_used: None,
                last_error: None,
                start_future: None,
            }),
            concurrency: Semaphore::new(MAX_PROVIDER_CONCURRENCY),
            retry_policy: RetryPolicy::default(),
            events,
        })
    }

    /// This provider's id.
    #[must_use]
    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    /// Launch mode label (`subprocess`/`container`/`remote`), for
    /// `registry_list`.
    #[must_use]
    pub fn mode(&self) -> &'static str {
        match &self.launch {
            Launch::Subprocess { .. } => "subprocess",
            Launch::Container { .. } => "container",
            Launch::Remote { .. } => "remote",
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProviderState {
        self.inner.lock().state
    }

    /// Timestamp of the last successful dispatch, for the Idle GC Worker.
    #[must_use]
    pub fn last_used(&self) -> Option<Instant> {
        self.inner.lock().last_used
    }

    /// Last error message observed, for `registry_details`.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Current consecutive-failure count, for `registry_details`.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Calls currently in flight against this provider.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        MAX_PROVIDER_CONCURRENCY - self.concurrency.available_permits()
    }

    /// Tool catalog: the session's discovered catalog once available,
    /// otherwise the declared fallback from config.
    #[must_use]
    pub fn cached_tools(&self) -> Vec<Tool> {
        let session = self.inner.lock().session.clone();
        match session {
            Some(session) => {
                let tools = session.cached_tools();
                if tools.is_empty() {
                    self.declared_tools.clone()
                } else {
                    tools
                }
            }
            None => self.declared_tools.clone(),
        }
    }

    /// Recent stderr lines from the underlying transport, if any.
    #[must_use]
    pub fn stderr_tail(&self) -> Vec<String> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|s| s.stderr_tail())
            .unwrap_or_default()
    }

    /// Ensure the provider is ready, starting it if cold and joining an
    /// in-flight start if one is already underway. Every concurrent caller
    /// observes the *same* outcome: either all succeed or all see the same
    /// [`Error`] (wrapped, since the shared future's output must be `Clone`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderColdStartFailed`] if launch or handshake
    /// fails, or [`Error::Internal`] if the provider is [`ProviderState::Dead`].
    pub async fn ensure_ready(self: &Arc<Self>) -> Result<()> {
        loop {
            let fut = {
                let mut guard = self.inner.lock();
                match guard.state {
                    ProviderState::Ready | ProviderState::Degraded => return Ok(()),
                    ProviderState::Dead => {
                        return Err(Error::ProviderColdStartFailed(self.id.to_string()));
                    }
                    ProviderState::Initializing => guard
                        .start_future
                        .clone()
                        .expect("initializing state always has a start future"),
                    ProviderState::Cold => {
                        guard.state = ProviderState::Initializing;
                        let this = Arc::clone(self);
                        let fut: BoxFuture<'static, std::result::Result<(), Arc<Error>>> =
                            Box::pin(async move { this.do_start().await.map_err(Arc::new) });
                        let shared = fut.shared();
                        guard.start_future = Some(shared.clone());
                        drop(guard);
                        self.events.publish(Event::ProviderStarting { provider: self.id.to_string() });
                        shared
                    }
                },
            };

            let result = fut.await;
            // Clear the completed future so a future cold start (after
            // idle shutdown) creates a fresh one instead of replaying this
            // one's cached result forever.
            let became_ready = {
                let mut guard = self.inner.lock();
                let became_ready = matches!(guard.state, ProviderState::Initializing) && result.is_ok();
                if !matches!(guard.state, ProviderState::Initializing) {
                    // another racer already observed completion and moved
                    // the state on; nothing to do.
                } else if result.is_ok() {
                    guard.state = ProviderState::Ready;
                } else {
                    guard.state = ProviderState::Dead;
                }
                guard.start_future = None;
                became_ready
            };
            if became_ready {
                self.events.publish(Event::ProviderReady { provider: self.id.to_string() });
            }
            return result.map_err(|e| (*e).to_string()).map_err(Error::ProviderColdStartFailed);
        }
    }

    async fn do_start(self: &Arc<Self>) -> Result<()> {
        info!(provider = %self.id, "starting provider");
        let this = Arc::clone(self);
        let session = with_retry(&self.retry_policy, self.id.as_str(), move || {
            let this = Arc::clone(&this);
            async move {
                let transport = this.spawn_transport().await?;
                let session = ProviderSession::new(transport);
                session.discover_tools().await?;
                Ok(session)
            }
        })
        .await?;
        self.inner.lock().session = Some(session);
        Ok(())
    }

    async fn spawn_transport(&self) -> Result<Arc<dyn Transport>> {
        match &self.launch {
            Launch::Subprocess { command, env } => {
                let transport = StdioTransport::new(command, env.clone(), None);
                transport.start().await?;
                Ok(transport as Arc<dyn Transport>)
            }
            Launch::Container {
                image,
                volumes,
                resources,
                network,
                read_only,
                env,
            } => {
                let transport = ContainerTransport::new(
                    image,
                    volumes.clone(),
                    resources.clone(),
                    *network,
                    *read_only,
                    env.clone(),
                )?;
                transport.start().await?;
                Ok(transport as Arc<dyn Transport>)
            }
            Launch::Remote { endpoint, http } => {
                let transport = RemoteTransport::new(endpoint, http.connect(), http.read())?;
                transport.initialize().await?;
                Ok(transport as Arc<dyn Transport>)
            }
        }
    }

    /// Dispatch one tool call: ensure readiness, invoke under this
    /// provider's concurrency limit, then report the outcome to the local
    /// failure counter (the Health Tracker observes this via [`Self::state`]
    /// and [`Self::last_error`]).
    ///
    /// # Errors
    ///
    /// Propagates [`Self::ensure_ready`]'s error, or the session's
    /// [`ProviderSession::invoke`] error.
    pub async fn invoke(
        self: &Arc<Self>,
        tool: &str,
        args: Value,
        deadline: Duration,
    ) -> Result<ToolsCallResult> {
        self.ensure_ready().await?;

        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| Error::Shutdown)?;

        let session = self
            .inner
            .lock()
            .session
            .clone()
            .ok_or_else(|| Error::Internal("provider ready with no session".to_string()))?;

        let result = session.invoke(self.id.as_str(), tool, args, deadline).await;
        self.record_outcome(&result);
        result
    }

    fn record_outcome(&self, result: &Result<ToolsCallResult>) {
        let mut guard = self.inner.lock();
        match result {
            Ok(_) => {
                guard.consecutive_failures = 0;
                guard.last_used = Some(Instant::now());
                guard.last_error = None;
                if guard.state == ProviderState::Degraded {
                    guard.state = ProviderState::Ready;
                }
            }
            Err(e) => {
                guard.last_error = Some(e.to_string());
                if e.kind().is_some_and(crate::error::ErrorKind::counts_against_health) {
                    guard.consecutive_failures += 1;
                    if guard.consecutive_failures >= self.lifecycle.max_consecutive_failures
                        && guard.state == ProviderState::Ready
                    {
                        guard.state = ProviderState::Degraded;
                        warn!(provider = %self.id, "provider degraded after consecutive failures");
                    }
                }
            }
        }
    }

    /// Probe health via `tools/list` without going through the normal
    /// dispatch path, for the Health Worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider has no session yet or the probe
    /// request fails.
    pub async fn probe_health(&self, deadline: Duration) -> Result<()> {
        let session = self
            .inner
            .lock()
            .session
            .clone()
            .ok_or_else(|| Error::Internal("probe on a provider with no session".to_string()))?;
        match tokio::time::timeout(deadline, session.discover_tools()).await {
            Ok(Ok(_)) => {
                self.mark_probe_success();
                Ok(())
            }
            Ok(Err(e)) => {
                self.mark_probe_failure();
                Err(e)
            }
            Err(_) => {
                self.mark_probe_failure();
                Err(Error::Timeout)
            }
        }
    }

    /// Mark this provider degraded from an external health-probe failure
    /// (used by the Health Worker, which runs `tools/list` pings rather
    /// than real invocations).
    pub fn mark_probe_failure(&self) {
        let mut guard = self.inner.lock();
        guard.consecutive_failures += 1;
        if guard.consecutive_failures >= self.lifecycle.max_consecutive_failures
            && guard.state == ProviderState::Ready
        {
            guard.state = ProviderState::Degraded;
        }
    }

    /// Mark this provider recovered from an external health-probe success.
    pub fn mark_probe_success(&self) {
        let mut guard = self.inner.lock();
        guard.consecutive_failures = 0;
        guard.last_error = None;
        if guard.state == ProviderState::Degraded {
            guard.state = ProviderState::Ready;
            info!(provider = %self.id, "provider recovered");
        }
    }

    /// Idle-shutdown threshold for this provider.
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.lifecycle.idle_ttl_s)
    }

    /// Whether the provider has been idle (no dispatch, nothing in flight)
    /// longer than its configured TTL. Providers that never served a call
    /// are not idle — they are simply cold.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        if self.in_flight() > 0 {
            return false;
        }
        let guard = self.inner.lock();
        matches!(guard.state, ProviderState::Ready | ProviderState::Degraded)
            && guard
                .last_used
                .is_some_and(|t| t.elapsed() >= self.idle_ttl())
    }

    /// Idempotent shutdown: closes the transport (if any) and resets to
    /// [`ProviderState::Cold`] so a later dispatch can cold-start it again.
    pub async fn shutdown(self: &Arc<Self>) {
        let session = {
            let mut guard = self.inner.lock();
            if guard.state == ProviderState::Cold {
                return;
            }
            guard.state = ProviderState::Cold;
            guard.start_future = None;
            guard.session.take()
        };
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                warn!(provider = %self.id, error = %e, "error closing provider session");
            }
        }
        info!(provider = %self.id, "provider shut down");
    }
}
