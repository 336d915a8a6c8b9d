//! Gateway: top-level orchestrator wiring Registry, Dispatch, Batch, Surface,
//! and the two background workers together: builds the registry, starts the
//! Health/Idle-GC workers, serves whichever transport was selected, and
//! drains providers on graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};

use crate::config::{Config, LifecycleConfig, ProviderSpec};
use crate::failsafe::RateLimiter;
use crate::provider::{Launch, ProviderId, ProviderManager};
use crate::{Error, Result};

use super::batch::BatchExecutor;
use super::dispatch::DispatchEngine;
use super::event_bus::EventBus;
use super::registry::Registry;
use super::surface::GatewaySurface;
use super::workers::{HealthWorker, IdleGcWorker};

/// Which front door the gateway listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC over stdin/stdout (default).
    Stdio,
    /// Streamable HTTP at `/mcp`, plus `/health/*` and `/metrics`.
    Http,
}

/// How the process ended, so `main` can map it to an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ran to normal completion (stdin closed, or an HTTP shutdown request).
    Completed,
    /// Ctrl+C / SIGINT.
    Interrupted,
}

/// Builds one leaf provider's [`ProviderManager`] from its config entry.
/// Called once per provider at registry construction time; groups are built
/// separately by [`Registry::from_config`] once every leaf exists.
///
/// # Errors
///
/// Returns [`Error::Config`] if `spec` is a `Group` (leaf providers only).
pub fn build_provider_manager(
    id: &ProviderId,
    spec: &ProviderSpec,
    events: EventBus,
) -> Result<Arc<ProviderManager>> {
    let (launch, lifecycle): (Launch, LifecycleConfig) = match spec {
        ProviderSpec::Subprocess { command, env, lifecycle } => (
            Launch::Subprocess { command: command.clone(), env: env.clone() },
            lifecycle.clone(),
        ),
        ProviderSpec::Container {
            image,
            volumes,
            resources,
            network,
            read_only,
            lifecycle,
        } => (
            Launch::Container {
                image: image.clone(),
                volumes: volumes.clone(),
                resources: resources.clone(),
                network: *network,
                read_only: *read_only,
                env: std::collections::HashMap::new(),
            },
            lifecycle.clone(),
        ),
        ProviderSpec::Remote { endpoint, http, lifecycle } => (
            Launch::Remote { endpoint: endpoint.clone(), http: http.clone() },
            lifecycle.clone(),
        ),
        ProviderSpec::Group { .. } => {
            return Err(Error::Config(format!("'{id}' is a group, not a leaf provider")));
        }
    };
    Ok(ProviderManager::new(id.clone(), launch, lifecycle, events))
}

/// Owns every long-lived gateway resource and the two background workers.
pub struct Gateway {
    config: Config,
    registry: Arc<Registry>,
    surface: Arc<GatewaySurface>,
    events: EventBus,
}

impl Gateway {
    /// Build the gateway from `config`: construct every provider and group,
    /// but start none of them (cold start happens lazily on first dispatch).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the registry cannot be built (invalid
    /// id, dangling group member, or similar).
    pub fn new(config: Config) -> Result<Self> {
        let events = EventBus::new();
        let registry = Arc::new(Registry::from_config(&config, events.clone())?);
        let rate_limiter = RateLimiter::new(&config.rate_limit);
        let dispatch = Arc::new(DispatchEngine::new(Arc::clone(&registry), rate_limiter, events.clone()));
        let batch = Arc::new(BatchExecutor::new(Arc::clone(&dispatch)));
        let surface = Arc::new(GatewaySurface::new(dispatch, batch));

        info!(
            providers = registry.provider_count(),
            "MCP Hangar gateway constructed"
        );

        Ok(Self { config, registry, surface, events })
    }

    /// Run until shutdown, serving `transport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP listener cannot bind, or if the stdio
    /// loop hits an unrecoverable I/O error.
    pub async fn run(self, transport: TransportKind) -> Result<ShutdownReason> {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        if self.config.health_check.enabled {
            let worker = HealthWorker::new(
                Arc::clone(&self.registry),
                self.events.clone(),
                Duration::from_secs(self.config.health_check.interval_s),
            );
            let rx = shutdown_tx.subscribe();
            tokio::spawn(async move { worker.run(rx).await; });
        }

        {
            let worker = IdleGcWorker::new(Arc::clone(&self.registry), self.events.clone(), Duration::from_secs(30));
            let rx = shutdown_tx.subscribe();
            tokio::spawn(async move { worker.run(rx).await; });
        }

        info!("============================================================");
        info!("MCP HANGAR v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(providers = self.registry.provider_count(), "providers registered");

        let surface = Arc::clone(&self.surface);
        let rx = shutdown_tx.subscribe();
        type BoxedRun = std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>;
        let run_result: BoxedRun = match transport {
            TransportKind::Stdio => Box::pin(super::stdio::run(surface, rx)),
            TransportKind::Http => {
                let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
                Box::pin(super::http::run(addr, surface, rx))
            }
        };

        let reason = wait_or_signal(run_result, &shutdown_tx).await?;

        info!("draining providers...");
        for (id, manager) in self.registry.providers() {
            if manager.state().is_dispatchable() {
                manager.shutdown().await;
                info!(provider = %id, "provider shut down");
            }
        }

        Ok(reason)
    }
}

/// Races the transport loop against Ctrl+C/SIGTERM. Whichever finishes first
/// decides [`ShutdownReason`]; the other side is signalled to stop.
async fn wait_or_signal(
    run_result: impl std::future::Future<Output = Result<()>>,
    shutdown_tx: &tokio::sync::broadcast::Sender<()>,
) -> Result<ShutdownReason> {
    tokio::pin!(run_result);

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = &mut run_result => {
            result?;
            Ok(ShutdownReason::Completed)
        }
        () = ctrl_c => {
            warn!("interrupt received, shutting down");
            let _ = shutdown_tx.send(());
            let _ = run_result.await;
            Ok(ShutdownReason::Interrupted)
        }
        () = terminate => {
            info!("termination signal received, shutting down");
            let _ = shutdown_tx.send(());
            let _ = run_result.await;
            Ok(ShutdownReason::Completed)
        }
    }
}
