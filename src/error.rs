//! Error taxonomy for the provider runtime.
//!
//! Every variant maps to one entry of the error taxonomy and to a stable
//! JSON-RPC error code via [`Error::to_rpc_code`] / [`Error::kind`].

use std::io;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Provider-runtime errors.
#[derive(Error, Debug)]
pub enum Error {
    /// No such provider or group.
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Tool is not in the provider's cached catalog.
    #[error("unknown tool '{tool}' on provider '{provider}'")]
    UnknownTool {
        /// Provider id
        provider: String,
        /// Tool name
        tool: String,
    },

    /// Schema validation failed for the supplied arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Launch or handshake failed and the retry budget was exhausted.
    #[error("provider '{0}' failed to cold-start")]
    ProviderColdStartFailed(String),

    /// Connection/framing/process-exit failure.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Deadline exceeded before a result was available.
    #[error("deadline exceeded")]
    Timeout,

    /// The operation was explicitly cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The global rate limiter rejected the request.
    #[error("rate limited")]
    RateLimited,

    /// The group's circuit breaker is open.
    #[error("circuit open for group '{0}'")]
    CircuitOpen(String),

    /// Fewer than `min_healthy` members are ready.
    #[error("group '{0}' unavailable: below min_healthy")]
    GroupUnavailable(String),

    /// The backend returned an application-level tool error.
    #[error("tool error: {message}")]
    ToolError {
        /// Human message forwarded from the backend
        message: String,
        /// Optional structured data forwarded from the backend
        data: Option<serde_json::Value>,
    },

    /// Configuration is malformed or violates an invariant.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wrapped I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Wrapped JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapped HTTP client failure (remote transport).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway is shutting down.
    #[error("shutdown in progress")]
    Shutdown,

    /// Anything else; should be rare outside of bugs.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The error taxonomy used for metrics tags and the `error_kind` field of
/// batch results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No such provider/group
    UnknownTarget,
    /// Tool not in catalog
    UnknownTool,
    /// Schema validation failed
    InvalidArgument,
    /// Launch or handshake failed
    ProviderColdStartFailed,
    /// Connection/framing/process-exit
    TransportError,
    /// Deadline exceeded
    Timeout,
    /// Explicit cancel
    Cancelled,
    /// Token bucket empty
    RateLimited,
    /// Group breaker open
    CircuitOpen,
    /// `min_healthy` not met
    GroupUnavailable,
    /// Backend application-level error
    ToolError,
}

impl ErrorKind {
    /// Lowercase snake-case label for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownTarget => "unknown_target",
            Self::UnknownTool => "unknown_tool",
            Self::InvalidArgument => "invalid_argument",
            Self::ProviderColdStartFailed => "provider_cold_start_failed",
            Self::TransportError => "transport_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::GroupUnavailable => "group_unavailable",
            Self::ToolError => "tool_error",
        }
    }

    /// Whether the Health Tracker and Circuit Breaker should count an
    /// outcome of this kind as a failure.
    #[must_use]
    pub fn counts_against_health(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::TransportError | Self::ProviderColdStartFailed
        )
    }
}

impl Error {
    /// Build a tool-error carrying a backend-supplied message.
    #[must_use]
    pub fn tool_error(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::ToolError {
            message: message.into(),
            data,
        }
    }

    /// Classify this error into the taxonomy used for metrics and batch
    /// results. `Io`/`Json`/`Internal`/`Shutdown`/`Config` have no kind of
    /// their own: they only ever appear before a target is resolved.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::UnknownTarget(_) => Some(ErrorKind::UnknownTarget),
            Self::UnknownTool { .. } => Some(ErrorKind::UnknownTool),
            Self::InvalidArgument(_) => Some(ErrorKind::InvalidArgument),
            Self::ProviderColdStartFailed(_) => Some(ErrorKind::ProviderColdStartFailed),
            Self::TransportError(_) | Self::Http(_) | Self::Io(_) => {
                Some(ErrorKind::TransportError)
            }
            Self::Timeout => Some(ErrorKind::Timeout),
            Self::Cancelled => Some(ErrorKind::Cancelled),
            Self::RateLimited => Some(ErrorKind::RateLimited),
            Self::CircuitOpen(_) => Some(ErrorKind::CircuitOpen),
            Self::GroupUnavailable(_) => Some(ErrorKind::GroupUnavailable),
            Self::ToolError { .. } => Some(ErrorKind::ToolError),
            Self::Config(_) | Self::Json(_) | Self::Shutdown | Self::Internal(_) => None,
        }
    }

    /// Stable JSON-RPC error code for this error.
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::UnknownTarget(_) | Self::UnknownTool { .. } => rpc_codes::METHOD_NOT_FOUND,
            Self::InvalidArgument(_) | Self::Json(_) => rpc_codes::INVALID_PARAMS,
            Self::ProviderColdStartFailed(_) => -32001,
            Self::TransportError(_) | Self::Http(_) | Self::Io(_) => -32002,
            Self::Timeout => -32003,
            Self::Cancelled => -32004,
            Self::RateLimited => -32005,
            Self::CircuitOpen(_) => -32006,
            Self::GroupUnavailable(_) => -32007,
            Self::ToolError { .. } => -32008,
            Self::Config(_) | Self::Shutdown | Self::Internal(_) => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC 2.0 error codes.
pub mod rpc_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_counting_matches_spec_taxonomy() {
        assert!(ErrorKind::Timeout.counts_against_health());
        assert!(ErrorKind::TransportError.counts_against_health());
        assert!(ErrorKind::ProviderColdStartFailed.counts_against_health());
        assert!(!ErrorKind::ToolError.counts_against_health());
        assert!(!ErrorKind::CircuitOpen.counts_against_health());
        assert!(!ErrorKind::RateLimited.counts_against_health());
    }

    #[test]
    fn kind_as_str_is_snake_case() {
        assert_eq!(ErrorKind::ProviderColdStartFailed.as_str(), "provider_cold_start_failed");
        assert_eq!(ErrorKind::GroupUnavailable.as_str(), "group_unavailable");
    }

    #[test]
    fn error_kind_roundtrips_for_each_variant() {
        assert_eq!(
            Error::UnknownTarget("x".into()).kind(),
            Some(ErrorKind::UnknownTarget)
        );
        assert_eq!(
            Error::ToolError { message: "boom".into(), data: None }.kind(),
            Some(ErrorKind::ToolError)
        );
        assert_eq!(Error::Shutdown.kind(), None);
    }
}
