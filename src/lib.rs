//! MCP Hangar
//!
//! A control-plane gateway that multiplexes Model Context Protocol clients
//! onto a fleet of backend providers (subprocess, container, or remote),
//! tracking provider health, breaking circuits on repeated failure, and
//! load-balancing across provider groups.
//!
//! # Features
//!
//! - **Unified tool surface**: one MCP endpoint fronting many providers
//! - **Health tracking & circuit breaking**: failing providers are degraded
//!   and admitted back in gradually via half-open probes
//! - **Provider groups**: round-robin, weighted, priority, and
//!   least-connections load balancing across redundant providers
//! - **Batch fan-out**: invoke several tools across providers concurrently
//! - **Idle GC**: subprocess/container providers are shut down when unused
//! - **Multi-transport**: stdio and Streamable HTTP front ends

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod gateway;
pub mod protocol;
pub mod provider;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
