//! Provider Session and Provider Manager: per-provider identity, handshake,
//! and lifecycle state machine.

mod id;
mod manager;
mod session;

pub use id::ProviderId;
pub use manager::ProviderManager;
pub use session::ProviderSession;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single provider, owned exclusively by its
/// [`ProviderManager`]. Never represented as scattered booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    /// Not started; no transport, no session.
    Cold,
    /// Launch + handshake in progress.
    Initializing,
    /// Handshake and tool discovery succeeded; serving traffic.
    Ready,
    /// Ready but the Health Tracker has seen too many consecutive failures.
    Degraded,
    /// Unrecoverable: retry budget exhausted. Requires explicit restart.
    Dead,
}

impl ProviderState {
    /// Lowercase label, used in `registry_list`/`registry_details` output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Dead => "dead",
        }
    }

    /// Whether a provider in this state may serve a dispatch (ready or
    /// degraded both count).
    #[must_use]
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}
