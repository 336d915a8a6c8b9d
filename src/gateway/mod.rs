//! Gateway: the public-facing half of MCP Hangar, wiring the provider
//! runtime (registry, dispatch, batch) to the two client-facing transports
//! (stdio, HTTP).

mod batch;
mod dispatch;
mod event_bus;
mod group;
mod http;
mod load_balancer;
mod registry;
mod server;
mod stdio;
mod surface;
mod workers;

pub use batch::{BatchCall, BatchCallResult, BatchExecutor, BatchOptions};
pub use dispatch::DispatchEngine;
pub use event_bus::{Event, EventBus};
pub use group::ProviderGroup;
pub use load_balancer::LoadBalancer;
pub use registry::{Registry, Target};
pub use server::{Gateway, ShutdownReason, TransportKind, build_provider_manager};
pub use surface::GatewaySurface;
pub use workers::{HealthWorker, IdleGcWorker};
