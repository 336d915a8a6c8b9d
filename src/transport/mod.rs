//! Process Transport: the framed JSON-RPC 2.0 channel to a backend provider.
//!
//! Three variants share one contract ([`Transport`]): [`StdioTransport`]
//! (subprocess), [`ContainerTransport`] (container runtime, wraps the same
//! stdio framing as `StdioTransport`), and [`RemoteTransport`] (HTTP).

mod container;
mod http;
mod stdio;

pub use self::container::ContainerTransport;
pub use self::http::RemoteTransport;
pub use self::stdio::StdioTransport;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Result, protocol::JsonRpcNotification, protocol::JsonRpcResponse};

/// Callback invoked for every id-less, method-bearing frame a transport
/// receives from its backend (e.g. `notifications/tools/list_changed`).
pub type NotificationHandler = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;

/// Capped ring buffer of the last N lines of a subprocess's stderr, kept for
/// diagnostics and surfaced via `registry_details`.
#[derive(Debug, Default)]
pub struct StderrRingBuffer {
    lines: parking_lot::Mutex<std::collections::VecDeque<String>>,
    capacity: usize,
}

impl StderrRingBuffer {
    /// Create a ring buffer holding at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a line, evicting the oldest if at capacity.
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Snapshot the buffered lines, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

/// Transport trait shared by all three provider modes: mode-specific logic
/// never leaks above this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and await its correlated response, or a transport
    /// error (connection-refused, timeout, framing-error,
    /// process-exited-with-status, http-status).
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a fire-and-forget notification.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Whether the transport currently believes itself connected.
    fn is_connected(&self) -> bool;

    /// Graceful shutdown: best-effort `shutdown` notice, then terminate the
    /// underlying process/connection.
    async fn close(&self) -> Result<()>;

    /// Last buffered stderr lines, for `registry_details` diagnostics.
    /// Transports with no stderr stream (remote HTTP) keep the default.
    fn stderr_tail(&self) -> Vec<String> {
        Vec::new()
    }

    /// Register the handler invoked for server-initiated notifications.
    /// Transports with no push channel (remote HTTP, one-POST-per-request)
    /// keep the default no-op.
    fn set_notification_handler(&self, _handler: NotificationHandler) {}
}
