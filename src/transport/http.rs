//! Remote transport: one Streamable-HTTP `POST` per JSON-RPC request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, header};
use serde_json::Value;
use tracing::debug;

use super::Transport;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId};
use crate::{Error, Result};

/// HTTP(S) transport to a remote MCP endpoint.
pub struct RemoteTransport {
    client: Client,
    url: String,
    session_id: RwLock<Option<String>>,
    request_id: AtomicU64,
    connected: AtomicBool,
}

impl RemoteTransport {
    /// Build a transport for `url`, with the given connect/read timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportError`] if the underlying HTTP client
    /// cannot be constructed (e.g. an invalid TLS configuration).
    pub fn new(url: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<Arc<Self>> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| Error::TransportError(e.to_string()))?;

        Ok(Arc::new(Self {
            client,
            url: url.to_string(),
            session_id: RwLock::new(None),
            request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }))
    }

    /// Perform the MCP handshake (`initialize` then `notifications/initialized`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportError`] if the remote rejects `initialize`.
    pub async fn initialize(&self) -> Result<()> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(0),
            method: "initialize".to_string(),
            params: Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "mcp-hangar",
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        };

        let response = self.send_request(&request).await?;
        if response.error.is_some() {
            return Err(Error::TransportError("initialize failed".to_string()));
        }

        self.notify("notifications/initialized", None).await?;
        self.connected.store(true, Ordering::Relaxed);
        debug!(url = %self.url, "remote transport initialized");
        Ok(())
    }

    async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(
            header::ACCEPT,
            "application/json, text/event-stream".parse().unwrap(),
        );
        headers.insert("MCP-Protocol-Version", PROTOCOL_VERSION.parse().unwrap());
        if let Some(ref session_id) = *self.session_id.read() {
            if let Ok(v) = session_id.parse() {
                headers.insert("MCP-Session-Id", v);
            }
        }

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::TransportError(e.to_string()))?;

        if let Some(session_id) = response.headers().get("mcp-session-id") {
            if let Ok(id) = session_id.to_str() {
                *self.session_id.write() = Some(id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TransportError(format!("http status {status}")));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            self.parse_sse_response(response).await
        } else {
            response
                .json()
                .await
                .map_err(|e| Error::TransportError(e.to_string()))
        }
    }

    async fn parse_sse_response(&self, response: reqwest::Response) -> Result<JsonRpcResponse> {
        let text = response
            .text()
            .await
            .map_err(|e| Error::TransportError(e.to_string()))?;
        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                return serde_json::from_str(data)
                    .map_err(|e| Error::TransportError(e.to_string()));
            }
        }
        Err(Error::TransportError("no data in SSE response".to_string()))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed) as i64)
    }
}

#[async_trait]
impl Transport for RemoteTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_id(),
            method: method.to_string(),
            params,
        };
        self.send_request(&request).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });

        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        if let Some(ref session_id) = *self.session_id.read() {
            if let Ok(v) = session_id.parse() {
                headers.insert("MCP-Session-Id", v);
            }
        }

        let _ = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(&notification)
            .send()
            .await
            .map_err(|e| Error::TransportError(e.to_string()))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        let session_id = self.session_id.read().clone();
        if let Some(ref id) = session_id {
            let _ = self
                .client
                .delete(&self.url)
                .header("MCP-Session-Id", id)
                .send()
                .await;
        }
        Ok(())
    }
}
