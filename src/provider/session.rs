//! Provider Session: one initialized MCP session over one transport.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::protocol::{Tool, ToolsCallResult, ToolsListResult};
use crate::transport::Transport;
use crate::{Error, Result};

/// Method name of the server-initiated notification that invalidates the
/// cached tool catalog.
const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// An initialized MCP session: capabilities, tool catalog, last-used clock.
pub struct ProviderSession {
    transport: Arc<dyn Transport>,
    catalog: RwLock<Option<Vec<Tool>>>,
}

impl ProviderSession {
    /// Wrap an already-handshaken transport. The handshake itself
    /// (`initialize` → `notifications/initialized`) happens inside the
    /// transport's own `start()`, before a session is built around it.
    ///
    /// Registers a notification handler on `transport` so a
    /// `tools/list_changed` push from the backend invalidates the cached
    /// catalog; held via a [`std::sync::Weak`] so the handler does not keep
    /// the session alive past the transport it's registered on.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let session = Arc::new(Self {
            transport: Arc::clone(&transport),
            catalog: RwLock::new(None),
        });
        let weak = Arc::downgrade(&session);
        transport.set_notification_handler(Arc::new(move |notification| {
            if notification.method == TOOLS_LIST_CHANGED {
                if let Some(session) = weak.upgrade() {
                    session.invalidate_cache();
                }
            }
        }));
        session
    }

    /// Discover (or re-discover) the tool catalog via `tools/list`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportError`] if the provider rejects the
    /// request or the response cannot be parsed as a tool list.
    pub async fn discover_tools(&self) -> Result<Vec<Tool>> {
        let response = self.transport.request("tools/list", None).await?;
        if let Some(err) = response.error {
            return Err(Error::TransportError(err.message));
        }
        let result: ToolsListResult = serde_json::from_value(response.result.unwrap_or_default())?;
        *self.catalog.write() = Some(result.tools.clone());
        Ok(result.tools)
    }

    /// Tool catalog, served from cache. Empty until [`Self::discover_tools`]
    /// has run at least once.
    #[must_use]
    pub fn cached_tools(&self) -> Vec<Tool> {
        self.catalog.read().clone().unwrap_or_default()
    }

    /// Recent stderr lines from the underlying transport, for diagnostics.
    #[must_use]
    pub fn stderr_tail(&self) -> Vec<String> {
        self.transport.stderr_tail()
    }

    /// Invalidate the cached catalog; called when a `tools/list_changed`
    /// notification arrives. The next [`Self::invoke`] or
    /// [`Self::discover_tools`] call re-fetches it.
    pub fn invalidate_cache(&self) {
        *self.catalog.write() = None;
    }

    /// Invoke `tool` with `args`, validating membership in the cached
    /// catalog first: an unknown tool never touches the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTool`] if the tool is not in the cached
    /// catalog, [`Error::Timeout`] if `deadline` elapses first, or
    /// [`Error::ToolError`] if the backend reports an application-level
    /// failure.
    pub async fn invoke(
        &self,
        provider: &str,
        tool: &str,
        args: Value,
        deadline: Duration,
    ) -> Result<ToolsCallResult> {
        let known = {
            let catalog = self.catalog.read();
            catalog
                .as_ref()
                .is_none_or(|tools| tools.iter().any(|t| t.name == tool))
        };
        if !known {
            return Err(Error::UnknownTool {
                provider: provider.to_string(),
                tool: tool.to_string(),
            });
        }

        let params = serde_json::json!({ "name": tool, "arguments": args });
        let fut = self.transport.request("tools/call", Some(params));
        let response = match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout),
        };

        if let Some(err) = response.error {
            return Err(Error::tool_error(err.message, err.data));
        }

        let result: ToolsCallResult = serde_json::from_value(response.result.unwrap_or_default())?;
        if result.is_error {
            let message = result
                .content
                .first()
                .map(|c| format!("{c:?}"))
                .unwrap_or_else(|| "tool reported an error".to_string());
            return Err(Error::tool_error(message, None));
        }
        Ok(result)
    }

    /// Notify the session's transport that the caller wants to close down;
    /// forwarded to the transport's own [`Transport::close`].
    ///
    /// # Errors
    ///
    /// Propagates any error from the underlying transport's close.
    pub async fn close(&self) -> Result<()> {
        debug!("closing provider session");
        self.transport.close().await
    }
}
